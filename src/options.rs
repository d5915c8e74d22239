/// Tuning knobs for the locking layer. Loading these from the store
/// configuration is the embedder's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Standing wait bound in seconds for commit row locks. Also the
    /// value restored after an emulated try-lock window.
    pub commit_lock_timeout: u64,
}

impl Default for LockOptions {
    fn default() -> LockOptions {
        LockOptions {
            commit_lock_timeout: 30,
        }
    }
}
