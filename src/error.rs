use crate::driver::DriverError;

#[derive(thiserror::Error, Debug)]
pub enum LockerError {
    /// The commit row lock could not be granted before the wait bound
    /// (or immediately, under NOWAIT). Carries a server-state snapshot
    /// for the operator.
    #[error("unable to acquire commit lock\n{diagnostics}")]
    UnableToAcquireCommitLock { diagnostics: String },

    /// The lock statement itself failed to run, as opposed to timing
    /// out. Usually a schema or connectivity problem.
    #[error("commit lock query failed: {source}")]
    CommitLockQueryFailed {
        #[source]
        source: DriverError,
    },

    #[error("a pack or undo operation is in progress")]
    UnableToAcquirePackUndoLock,

    /// The server version string did not parse, so no locking strategy
    /// could be chosen for the session.
    #[error("unrecognized server version: {version:?}")]
    UnrecognizedServerVersion { version: String },

    #[error("{0}")]
    Driver(#[from] DriverError),
}

impl LockerError {
    /// True for both ways a commit lock attempt can fail.
    pub fn is_commit_lock_failure(&self) -> bool {
        matches!(
            self,
            LockerError::UnableToAcquireCommitLock { .. }
                | LockerError::CommitLockQueryFailed { .. }
        )
    }

    /// Contention clears on its own; callers may retry these.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LockerError::UnableToAcquireCommitLock { .. }
                | LockerError::UnableToAcquirePackUndoLock
        )
    }
}

impl PartialEq for LockerError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::UnableToAcquireCommitLock { .. },
                Self::UnableToAcquireCommitLock { .. },
            )
            | (Self::CommitLockQueryFailed { .. }, Self::CommitLockQueryFailed { .. })
            | (Self::UnableToAcquirePackUndoLock, Self::UnableToAcquirePackUndoLock)
            | (Self::Driver(_), Self::Driver(_)) => true,
            (
                Self::UnrecognizedServerVersion { version: v1 },
                Self::UnrecognizedServerVersion { version: v2 },
            ) => v1.eq(v2),
            _ => false,
        }
    }
}
