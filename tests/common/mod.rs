//! In-memory stand-in for a SQL server, good enough to exercise the
//! lockers end to end. It understands the statements both dialects
//! issue; one server is shared by many connections across threads.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use storelock::driver::{Connection, DriverError, Row, SqlValue};
use storelock::Session;

/// Scaled-down "second", so timeout behavior is observable without
/// slowing the suite down.
pub const WAIT_UNIT: Duration = Duration::from_millis(10);

#[derive(Default)]
struct RowState {
    exclusive: Option<u64>,
    shared: Vec<u64>,
}

pub struct TestServer {
    version: String,
    row_locks: Mutex<HashMap<u64, RowState>>,
    advisory: DashMap<String, u64>,
    denied: Mutex<Vec<String>>,
    statements: Mutex<Vec<(u64, String)>>,
    next_conn_id: AtomicU64,
    /// Server-wide lock wait default, in scaled seconds.
    default_lock_timeout: u64,
}

impl TestServer {
    fn new(version: &str) -> Arc<TestServer> {
        Arc::new(TestServer {
            version: version.to_string(),
            row_locks: Mutex::new(HashMap::new()),
            advisory: DashMap::with_capacity(4),
            denied: Mutex::new(Vec::new()),
            statements: Mutex::new(Vec::new()),
            next_conn_id: AtomicU64::new(1),
            default_lock_timeout: 50,
        })
    }

    /// Make statements containing `fragment` fail, the way a server
    /// refuses a view the user may not read.
    pub fn deny(&self, fragment: &str) {
        self.denied.lock().unwrap().push(fragment.to_string());
    }

    pub fn statements_for(&self, conn_id: u64) -> Vec<String> {
        self.statements
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == conn_id)
            .map(|(_, stmt)| stmt.clone())
            .collect()
    }

    pub fn statement_count(&self) -> usize {
        self.statements.lock().unwrap().len()
    }

    fn log_statement(&self, conn_id: u64, statement: &str) {
        self.statements
            .lock()
            .unwrap()
            .push((conn_id, statement.to_string()));
    }

    fn is_denied(&self, statement: &str) -> bool {
        self.denied
            .lock()
            .unwrap()
            .iter()
            .any(|fragment| statement.contains(fragment.as_str()))
    }

    /// All-or-nothing try, so two sessions cannot interleave halfway
    /// through overlapping oid sets.
    fn try_lock_rows(&self, conn_id: u64, oids: &[u64], exclusive: bool) -> bool {
        let mut table = self.row_locks.lock().unwrap();
        for oid in oids {
            if let Some(state) = table.get(oid) {
                let exclusive_elsewhere = state.exclusive.map_or(false, |c| c != conn_id);
                let shared_elsewhere = state.shared.iter().any(|&c| c != conn_id);
                let conflict = if exclusive {
                    exclusive_elsewhere || shared_elsewhere
                } else {
                    exclusive_elsewhere
                };
                if conflict {
                    return false;
                }
            }
        }
        for &oid in oids {
            let state = table.entry(oid).or_insert_with(RowState::default);
            if exclusive {
                state.exclusive = Some(conn_id);
            } else if !state.shared.contains(&conn_id) {
                state.shared.push(conn_id);
            }
        }
        true
    }

    fn release_rows(&self, conn_id: u64) {
        let mut table = self.row_locks.lock().unwrap();
        table.retain(|_, state| {
            if state.exclusive == Some(conn_id) {
                state.exclusive = None;
            }
            state.shared.retain(|&c| c != conn_id);
            state.exclusive.is_some() || !state.shared.is_empty()
        });
    }

    fn try_advisory(&self, name: &str, conn_id: u64) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.advisory.entry(name.to_string()) {
            Entry::Occupied(occupied) => *occupied.get() == conn_id,
            Entry::Vacant(vacant) => {
                vacant.insert(conn_id);
                true
            }
        }
    }

    /// `Some(true)` released, `Some(false)` owned by another session,
    /// `None` not held at all.
    fn release_advisory(&self, name: &str, conn_id: u64) -> Option<bool> {
        use dashmap::mapref::entry::Entry;
        match self.advisory.entry(name.to_string()) {
            Entry::Occupied(occupied) => {
                if *occupied.get() == conn_id {
                    occupied.remove();
                    Some(true)
                } else {
                    Some(false)
                }
            }
            Entry::Vacant(_) => None,
        }
    }

    fn release_all_advisory(&self, conn_id: u64) {
        self.advisory.retain(|_, owner| *owner != conn_id);
    }

    fn lock_view_rows(&self) -> Vec<Row> {
        let table = self.row_locks.lock().unwrap();
        let mut rows = Vec::new();
        for (oid, state) in table.iter() {
            if let Some(owner) = state.exclusive {
                rows.push(vec![
                    SqlValue::Int(*oid as i64),
                    SqlValue::Text("X".to_string()),
                    SqlValue::Int(owner as i64),
                ]);
            }
            for &owner in &state.shared {
                rows.push(vec![
                    SqlValue::Int(*oid as i64),
                    SqlValue::Text("S".to_string()),
                    SqlValue::Int(owner as i64),
                ]);
            }
        }
        rows
    }
}

pub struct TestConn {
    server: Arc<TestServer>,
    id: u64,
    lock_timeout: Option<u64>,
    pending: Vec<Row>,
}

impl TestConn {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Session lock wait override in scaled seconds; `None` means the
    /// server default is active.
    pub fn lock_timeout(&self) -> Option<u64> {
        self.lock_timeout
    }

    /// Commit or roll back; either way the server frees this
    /// connection's row locks. Advisory locks stay held.
    pub fn end_transaction(&mut self) {
        self.server.release_rows(self.id);
    }

    fn run_lock_statement(
        &mut self,
        statement: &str,
        params: &[SqlValue],
    ) -> Result<(), DriverError> {
        let exclusive = statement.contains("FOR UPDATE");
        let nowait = statement.contains("NOWAIT");
        let oids: Vec<u64> = params
            .iter()
            .filter_map(|p| p.as_int())
            .map(|i| i as u64)
            .collect();
        let wait_secs = if nowait {
            0
        } else {
            self.lock_timeout.unwrap_or(self.server.default_lock_timeout)
        };
        let deadline = Instant::now() + WAIT_UNIT * (wait_secs as u32);
        loop {
            if self.server.try_lock_rows(self.id, &oids, exclusive) {
                self.pending = oids
                    .iter()
                    .map(|&oid| vec![SqlValue::Int(oid as i64)])
                    .collect();
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DriverError::LockNotAvailable(
                    "lock wait timeout exceeded".to_string(),
                ));
            }
            thread::sleep(WAIT_UNIT / 4);
        }
    }
}

impl Connection for TestConn {
    fn execute(&mut self, statement: &str, params: &[SqlValue]) -> Result<(), DriverError> {
        self.server.log_statement(self.id, statement);
        self.pending.clear();
        if self.server.is_denied(statement) {
            return Err(DriverError::Statement(format!(
                "access denied: {}",
                statement
            )));
        }
        if statement == "SELECT version()" {
            self.pending = vec![vec![SqlValue::Text(self.server.version.clone())]];
            return Ok(());
        }
        if statement == "SELECT connection_id()" || statement == "SELECT pg_backend_pid()" {
            self.pending = vec![vec![SqlValue::Int(self.id as i64)]];
            return Ok(());
        }
        if statement.starts_with("SET SESSION innodb_lock_wait_timeout") {
            // a parameter sets an override; the bare DEFAULT form
            // goes back to the server-wide value
            self.lock_timeout = params.first().and_then(|p| p.as_int()).map(|t| t as u64);
            return Ok(());
        }
        if statement.starts_with("SELECT set_config('lock_timeout'") {
            let value = params.first().cloned().unwrap_or(SqlValue::Null);
            self.pending = vec![vec![value]];
            return Ok(());
        }
        if statement == "SELECT GET_LOCK(CONCAT(DATABASE(), '.pack'), 0)" {
            let granted = self.server.try_advisory("testdb.pack", self.id);
            self.pending = vec![vec![SqlValue::Int(granted as i64)]];
            return Ok(());
        }
        if statement == "SELECT RELEASE_LOCK(CONCAT(DATABASE(), '.pack'))" {
            let released = match self.server.release_advisory("testdb.pack", self.id) {
                Some(done) => SqlValue::Int(done as i64),
                None => SqlValue::Null,
            };
            self.pending = vec![vec![released]];
            return Ok(());
        }
        if statement == "SELECT pg_try_advisory_lock(1)" {
            let granted = self.server.try_advisory("advisory:1", self.id);
            self.pending = vec![vec![SqlValue::Bool(granted)]];
            return Ok(());
        }
        if statement == "SELECT pg_advisory_unlock(1)" {
            let released = self.server.release_advisory("advisory:1", self.id) == Some(true);
            self.pending = vec![vec![SqlValue::Bool(released)]];
            return Ok(());
        }
        if statement == "SELECT * FROM pg_locks WHERE NOT granted" {
            // waiters never appear in the fake's lock table
            self.pending = Vec::new();
            return Ok(());
        }
        if statement.starts_with("SELECT * FROM performance_schema.data_wait_locks")
            || statement.starts_with("SELECT * FROM information_schema.innodb_locks")
            || statement.starts_with("SELECT * FROM pg_locks")
        {
            self.pending = self.server.lock_view_rows();
            return Ok(());
        }
        if statement.starts_with("SELECT oid FROM commit_row_lock") {
            return self.run_lock_statement(statement, params);
        }
        Err(DriverError::Statement(format!(
            "unrecognized statement: {}",
            statement
        )))
    }

    fn fetch_one(&mut self) -> Result<Option<Row>, DriverError> {
        if self.pending.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.pending.remove(0)))
        }
    }

    fn fetch_all(&mut self) -> Result<Vec<Row>, DriverError> {
        Ok(std::mem::take(&mut self.pending))
    }
}

impl Drop for TestConn {
    fn drop(&mut self) {
        self.server.release_rows(self.id);
        self.server.release_all_advisory(self.id);
    }
}

pub fn mysql8_server() -> Arc<TestServer> {
    TestServer::new("8.0.32")
}

pub fn mysql57_server() -> Arc<TestServer> {
    TestServer::new("5.7.44-log")
}

pub fn postgres_server() -> Arc<TestServer> {
    TestServer::new("13.7")
}

pub fn broken_version_server() -> Arc<TestServer> {
    TestServer::new("development build")
}

pub fn connect(server: &Arc<TestServer>) -> Session<TestConn> {
    let id = server.next_conn_id.fetch_add(1, Ordering::SeqCst);
    Session::new(TestConn {
        server: server.clone(),
        id,
        lock_timeout: None,
        pending: Vec::new(),
    })
}

pub fn init_log() {
    let _ = env_logger::try_init();
}
