use crate::driver::Connection;
use crate::locker::capability::CapabilityProfile;

/// One logical backend connection plus the locker state that rides with
/// it. A reconnect means a fresh `Session`; cached state never outlives
/// the connection it was probed on.
pub struct Session<C: Connection> {
    pub(crate) conn: C,
    pub(crate) profile: Option<CapabilityProfile>,
    pub(crate) pack_lock_held: bool,
}

impl<C: Connection> Session<C> {
    pub fn new(conn: C) -> Session<C> {
        Session {
            conn,
            profile: None,
            pack_lock_held: false,
        }
    }

    pub fn conn(&self) -> &C {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    /// Capability profile probed for this session, if any yet.
    pub fn capabilities(&self) -> Option<&CapabilityProfile> {
        self.profile.as_ref()
    }

    pub fn holds_pack_lock(&self) -> bool {
        self.pack_lock_held
    }
}
