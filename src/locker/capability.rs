/// Which locking primitives the connected server offers. Probed once
/// per session and cached; never re-branched per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityProfile {
    pub supports_native_nowait: bool,
    pub share_lock_clause: ShareLockClause,
}

/// How a share-strength row lock is spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareLockClause {
    /// Legacy spelling, the only one old servers accept.
    Default,
    /// Modern spelling, which also admits a NOWAIT modifier.
    Native,
}

/// How a try-lock is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrategy {
    /// The server refuses a contended lock itself.
    Native,
    /// A zero-wait timeout window around a blocking lock statement.
    Emulated,
}

impl CapabilityProfile {
    pub fn native() -> CapabilityProfile {
        CapabilityProfile {
            supports_native_nowait: true,
            share_lock_clause: ShareLockClause::Native,
        }
    }

    pub fn emulated() -> CapabilityProfile {
        CapabilityProfile {
            supports_native_nowait: false,
            share_lock_clause: ShareLockClause::Default,
        }
    }

    pub fn nowait_strategy(&self) -> LockStrategy {
        if self.supports_native_nowait {
            LockStrategy::Native
        } else {
            LockStrategy::Emulated
        }
    }
}

/// Major version is the leading digit run: "8.0.32" is 8, "5.7.44-log"
/// is 5, "10.6.1-MariaDB" is 10.
pub(crate) fn parse_major_version(version: &str) -> Option<u32> {
    let end = version
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(version.len());
    version[..end].parse().ok()
}
