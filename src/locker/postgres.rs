//! Locking on PostgreSQL.
//!
//! Everything here is native: `NOWAIT` and `FOR SHARE` work on every
//! supported server, so no version probe runs and no timeout emulation
//! is ever needed. The session wait bound is `lock_timeout`, set in
//! milliseconds through `set_config`. The pack lock is an advisory
//! lock; the advisory keyspace is already scoped per database, so a
//! constant key is enough.

use crate::driver::{Connection, SqlValue};
use crate::error::LockerError;
use crate::locker::capability::CapabilityProfile;
use crate::locker::{
    acquire_row_locks, row_lock_statement, sorted_oid_params, LockWait, Locker, Oid,
    RowLockStrength,
};
use crate::options::LockOptions;
use crate::session::Session;
use crate::Result;

const SET_TIMEOUT_STMT: &str = "SELECT set_config('lock_timeout', ?, false)";
const CONNECTION_ID_STMT: &str = "SELECT pg_backend_pid()";
const LOCK_VIEW_STMTS: &[&str] = &[
    "SELECT * FROM pg_locks WHERE NOT granted",
    "SELECT * FROM pg_locks",
];
const HOLD_PACK_LOCK_STMT: &str = "SELECT pg_try_advisory_lock(1)";
const RELEASE_PACK_LOCK_STMT: &str = "SELECT pg_advisory_unlock(1)";

pub struct PostgresLocker {
    options: LockOptions,
}

impl PostgresLocker {
    pub fn new(options: LockOptions) -> PostgresLocker {
        PostgresLocker { options }
    }
}

fn lock_clause(strength: RowLockStrength, wait: LockWait) -> &'static str {
    match (strength, wait) {
        (RowLockStrength::Share, LockWait::Block) => "FOR SHARE",
        (RowLockStrength::Share, LockWait::NoWait) => "FOR SHARE NOWAIT",
        (RowLockStrength::Exclusive, LockWait::Block) => "FOR UPDATE",
        (RowLockStrength::Exclusive, LockWait::NoWait) => "FOR UPDATE NOWAIT",
    }
}

impl<C: Connection> Locker<C> for PostgresLocker {
    fn on_store_opened(&self, session: &mut Session<C>, restart: bool) -> Result<()> {
        if restart {
            return Ok(());
        }
        let millis = self.options.commit_lock_timeout.saturating_mul(1000);
        session
            .conn_mut()
            .execute(SET_TIMEOUT_STMT, &[SqlValue::Text(millis.to_string())])?;
        // set_config returns the new value
        session.conn_mut().fetch_one()?;
        session.profile = Some(CapabilityProfile::native());
        Ok(())
    }

    fn lock_current_objects(
        &self,
        session: &mut Session<C>,
        oids: &[Oid],
        ensure_current: bool,
        wait: LockWait,
    ) -> Result<()> {
        if oids.is_empty() {
            return Ok(());
        }
        session.profile.get_or_insert(CapabilityProfile::native());
        let strength = if ensure_current {
            RowLockStrength::Share
        } else {
            RowLockStrength::Exclusive
        };
        let params = sorted_oid_params(oids);
        let stmt = row_lock_statement(params.len(), lock_clause(strength, wait));
        acquire_row_locks(
            session.conn_mut(),
            &stmt,
            &params,
            CONNECTION_ID_STMT,
            LOCK_VIEW_STMTS,
        )
    }

    /// Auto-released by transaction end.
    fn release_commit_lock(&self, _session: &mut Session<C>) -> Result<()> {
        Ok(())
    }

    fn hold_pack_lock(&self, session: &mut Session<C>) -> Result<()> {
        debug_assert!(!session.pack_lock_held);
        session.conn_mut().execute(HOLD_PACK_LOCK_STMT, &[])?;
        let row = session.conn_mut().fetch_one()?;
        let granted = row
            .and_then(|r| r.into_iter().next())
            .map(|v| v.is_truthy())
            .unwrap_or(false);
        if !granted {
            return Err(LockerError::UnableToAcquirePackUndoLock);
        }
        session.pack_lock_held = true;
        Ok(())
    }

    fn release_pack_lock(&self, session: &mut Session<C>) -> Result<()> {
        session.conn_mut().execute(RELEASE_PACK_LOCK_STMT, &[])?;
        // stay in sync
        let rows = session.conn_mut().fetch_all()?;
        debug_assert!(!rows.is_empty());
        session.pack_lock_held = false;
        Ok(())
    }
}
