pub mod capability;
pub(crate) mod diagnostics;
pub mod mysql;
pub mod postgres;
pub(crate) mod timeout;

use crate::driver::{Connection, DriverError, SqlValue};
use crate::error::LockerError;
use crate::locker::diagnostics::collect_debug_info;
use crate::session::Session;
use crate::Result;

/// Object identifier in the store.
pub type Oid = u64;

/// How long a commit lock attempt may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    /// Wait up to the session's standing lock timeout.
    Block,
    /// Fail immediately if any requested row is already locked.
    NoWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowLockStrength {
    Share,
    Exclusive,
}

/// The locking contract every backend adapter implements.
///
/// Commit locks are row locks on the `commit_row_lock` table, released
/// by the server at transaction end. The pack lock is a named advisory
/// lock, held across transactions until explicitly released.
pub trait Locker<C: Connection> {
    /// Session-start hook. Installs the standing row-lock wait timeout
    /// and probes server capabilities. Does nothing when `restart` is
    /// true: the connection was merely reused, not replaced.
    fn on_store_opened(&self, session: &mut Session<C>, restart: bool) -> Result<()>;

    /// Lock the rows for `oids` before a commit may proceed.
    /// `ensure_current` asks for share-strength locks (other committers
    /// checking currency may hold them too); otherwise the locks are
    /// exclusive.
    fn lock_current_objects(
        &self,
        session: &mut Session<C>,
        oids: &[Oid],
        ensure_current: bool,
        wait: LockWait,
    ) -> Result<()>;

    /// Auto-released by transaction end.
    fn release_commit_lock(&self, session: &mut Session<C>) -> Result<()>;

    /// Acquire the pack/undo advisory lock without waiting. Fails with
    /// `UnableToAcquirePackUndoLock` while another session holds it.
    fn hold_pack_lock(&self, session: &mut Session<C>) -> Result<()>;

    /// Release the pack/undo advisory lock.
    fn release_pack_lock(&self, session: &mut Session<C>) -> Result<()>;
}

/// Run a maintenance job under the pack lock, releasing it on every exit
/// path. The job's own error wins; a release failure after a failed job
/// is only logged.
pub fn with_pack_lock<C, L, T, F>(locker: &L, session: &mut Session<C>, job: F) -> Result<T>
where
    C: Connection,
    L: Locker<C>,
    F: FnOnce(&mut Session<C>) -> Result<T>,
{
    locker.hold_pack_lock(session)?;
    let outcome = job(session);
    match locker.release_pack_lock(session) {
        Ok(()) => outcome,
        Err(release_err) => match outcome {
            Ok(_) => Err(release_err),
            Err(job_err) => {
                warn!("pack lock release failed after job error: {}", release_err);
                Err(job_err)
            }
        },
    }
}

/// Deduplicated, ascending lock parameters. Every committer locking its
/// rows in one global order keeps lock waits from crossing.
pub(crate) fn sorted_oid_params(oids: &[Oid]) -> Vec<SqlValue> {
    let mut oids = oids.to_vec();
    oids.sort_unstable();
    oids.dedup();
    oids.into_iter()
        .map(|oid| SqlValue::Int(oid as i64))
        .collect()
}

pub(crate) fn row_lock_statement(oid_count: usize, lock_clause: &str) -> String {
    debug_assert!(oid_count > 0);
    let mut placeholders = String::with_capacity(oid_count * 3);
    for i in 0..oid_count {
        if i > 0 {
            placeholders.push_str(", ");
        }
        placeholders.push('?');
    }
    format!(
        "SELECT oid FROM commit_row_lock WHERE oid IN ({}) ORDER BY oid {}",
        placeholders, lock_clause
    )
}

/// Issue a row-lock statement, mapping a refusal to the commit-lock
/// error with diagnostics attached and any other failure to the
/// distinguished query-failure error.
pub(crate) fn acquire_row_locks<C: Connection>(
    conn: &mut C,
    stmt: &str,
    params: &[SqlValue],
    conn_id_stmt: &str,
    view_stmts: &[&str],
) -> Result<()> {
    match conn.execute(stmt, params) {
        Ok(()) => {
            // drain the locked rows to keep the result stream in sync
            conn.fetch_all()?;
            Ok(())
        }
        Err(DriverError::LockNotAvailable(reason)) => {
            debug!("commit row lock refused: {}", reason);
            let diagnostics = collect_debug_info(conn, conn_id_stmt, view_stmts);
            Err(LockerError::UnableToAcquireCommitLock { diagnostics })
        }
        Err(source) => Err(LockerError::CommitLockQueryFailed { source }),
    }
}
