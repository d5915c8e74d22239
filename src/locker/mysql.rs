//! Locking on MySQL-family servers.
//!
//! The commit lock is an ordinary InnoDB row lock on the
//! `commit_row_lock` table: lightweight, released automatically when the
//! transaction commits or aborts, and covered by the server's deadlock
//! detection. It must not be taken against the object-state tables,
//! where arbitrary rows may already be locked by other transactions.
//!
//! Servers before 8.0 have no `NOWAIT` row locks and spell share locks
//! `LOCK IN SHARE MODE`, so on those a zero `innodb_lock_wait_timeout`
//! window stands in for `NOWAIT`. A lock wait timeout only rolls back
//! the statement, not the transaction, which is exactly what the
//! emulation needs. The choice is probed from `SELECT version()` once
//! per session.
//!
//! The pack lock is a server-side named user lock (`GET_LOCK`), scoped
//! to one database by building the name from `DATABASE()`. It survives
//! transaction end and must be released explicitly.

use crate::driver::Connection;
use crate::error::LockerError;
use crate::locker::capability::{
    parse_major_version, CapabilityProfile, LockStrategy, ShareLockClause,
};
use crate::locker::timeout::{set_row_lock_timeout, with_lock_timeout};
use crate::locker::{
    acquire_row_locks, row_lock_statement, sorted_oid_params, LockWait, Locker, Oid,
    RowLockStrength,
};
use crate::options::LockOptions;
use crate::session::Session;
use crate::Result;

/// First major version with NOWAIT row locks.
pub(crate) const NATIVE_NOWAIT_MAJOR: u32 = 8;

const VERSION_STMT: &str = "SELECT version()";
const CONNECTION_ID_STMT: &str = "SELECT connection_id()";
const LOCK_VIEW_STMTS: &[&str] = &[
    "SELECT * FROM performance_schema.data_wait_locks",
    "SELECT * FROM information_schema.innodb_locks",
];
const HOLD_PACK_LOCK_STMT: &str = "SELECT GET_LOCK(CONCAT(DATABASE(), '.pack'), 0)";
const RELEASE_PACK_LOCK_STMT: &str = "SELECT RELEASE_LOCK(CONCAT(DATABASE(), '.pack'))";

pub struct MysqlLocker {
    options: LockOptions,
}

impl MysqlLocker {
    pub fn new(options: LockOptions) -> MysqlLocker {
        MysqlLocker { options }
    }

    /// Profile for this session, probing the server on first use.
    fn capabilities<C: Connection>(&self, session: &mut Session<C>) -> Result<CapabilityProfile> {
        if let Some(profile) = session.profile {
            return Ok(profile);
        }
        let profile = probe_capabilities(session.conn_mut())?;
        session.profile = Some(profile);
        Ok(profile)
    }
}

fn probe_capabilities<C: Connection>(conn: &mut C) -> Result<CapabilityProfile> {
    conn.execute(VERSION_STMT, &[])?;
    let row = conn.fetch_one()?;
    let version = row
        .and_then(|r| r.into_iter().next())
        .and_then(|v| v.as_text().map(str::to_string))
        .unwrap_or_default();
    match parse_major_version(&version) {
        Some(major) if major >= NATIVE_NOWAIT_MAJOR => {
            debug!("server {} has native NOWAIT row locks", version);
            Ok(CapabilityProfile::native())
        }
        Some(major) => {
            debug!("server {} (major {}) gets emulated NOWAIT", version, major);
            Ok(CapabilityProfile::emulated())
        }
        None => Err(LockerError::UnrecognizedServerVersion { version }),
    }
}

fn lock_clause(
    profile: CapabilityProfile,
    strength: RowLockStrength,
    nowait: bool,
) -> &'static str {
    match (strength, profile.share_lock_clause, nowait) {
        (RowLockStrength::Share, ShareLockClause::Native, true) => "FOR SHARE NOWAIT",
        (RowLockStrength::Share, ShareLockClause::Native, false) => "FOR SHARE",
        (RowLockStrength::Share, ShareLockClause::Default, _) => "LOCK IN SHARE MODE",
        (RowLockStrength::Exclusive, _, true) => "FOR UPDATE NOWAIT",
        (RowLockStrength::Exclusive, _, false) => "FOR UPDATE",
    }
}

impl<C: Connection> Locker<C> for MysqlLocker {
    fn on_store_opened(&self, session: &mut Session<C>, restart: bool) -> Result<()> {
        if restart {
            return Ok(());
        }
        set_row_lock_timeout(session.conn_mut(), self.options.commit_lock_timeout)?;
        self.capabilities(session)?;
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
        let profile = self.capabilities(session)?;
        let strength = if ensure_current {
            RowLockStrength::Share
        } else {
            RowLockStrength::Exclusive
        };
        let params = sorted_oid_params(oids);

        let nowait = match wait {
            LockWait::Block => false,
            LockWait::NoWait => profile.nowait_strategy() == LockStrategy::Native,
        };
        let stmt = row_lock_statement(params.len(), lock_clause(profile, strength, nowait));

        if wait == LockWait::NoWait && profile.nowait_strategy() == LockStrategy::Emulated {
            // zero-wait window around the blocking statement, coming
            // back to the standing commit lock timeout afterwards
            let restore_to = self.options.commit_lock_timeout;
            with_lock_timeout(session.conn_mut(), Some(0), Some(restore_to), |conn| {
                acquire_row_locks(conn, &stmt, &params, CONNECTION_ID_STMT, LOCK_VIEW_STMTS)
            })
        } else {
            acquire_row_locks(
                session.conn_mut(),
                &stmt,
                &params,
                CONNECTION_ID_STMT,
                LOCK_VIEW_STMTS,
            )
        }
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
