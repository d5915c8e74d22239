#[macro_use]
extern crate log;

pub use locker::mysql::MysqlLocker;
pub use locker::postgres::PostgresLocker;
pub use locker::{with_pack_lock, LockWait, Locker, Oid};
pub use options::LockOptions;
pub use session::Session;

pub mod driver;
pub mod error;
pub mod locker;
pub mod options;
pub mod session;

pub type Result<T> = std::result::Result<T, error::LockerError>;
