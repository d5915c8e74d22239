//! Scoped override of the session's row-lock wait timeout.

use crate::driver::{Connection, DriverError, SqlValue};
use std::fmt::Display;

pub(crate) const SET_TIMEOUT_STMT: &str = "SET SESSION innodb_lock_wait_timeout = ?";
// DEFAULT is a literal, not a bindable parameter.
pub(crate) const SET_TIMEOUT_DEFAULT_STMT: &str = "SET SESSION innodb_lock_wait_timeout = DEFAULT";

/// Set the session's row-lock wait timeout in seconds.
pub(crate) fn set_row_lock_timeout<C: Connection>(
    conn: &mut C,
    timeout: u64,
) -> Result<(), DriverError> {
    // values below 1 get truncated to 1 with a warning, so clamp here
    let timeout = if timeout >= 1 { timeout } else { 1 };
    conn.execute(SET_TIMEOUT_STMT, &[SqlValue::Int(timeout as i64)])?;
    // must read a row after the SET; drivers built on libmysqlclient
    // corrupt their heap when the result is left unconsumed
    conn.fetch_one()?;
    Ok(())
}

fn restore_default_timeout<C: Connection>(conn: &mut C) -> Result<(), DriverError> {
    conn.execute(SET_TIMEOUT_DEFAULT_STMT, &[])?;
    conn.fetch_one()?;
    Ok(())
}

/// Run `body` with the lock timeout set to `timeout`, restoring it
/// afterwards on every exit path. `restore_to` names the value to come
/// back to; without it the server DEFAULT is restored. A `timeout` of
/// `None` makes no changes to the connection at all.
///
/// When both the body and the restoration fail, the restoration error
/// wins and the body error is logged.
pub(crate) fn with_lock_timeout<C, T, E, F>(
    conn: &mut C,
    timeout: Option<u64>,
    restore_to: Option<u64>,
    body: F,
) -> Result<T, E>
where
    C: Connection,
    E: From<DriverError> + Display,
    F: FnOnce(&mut C) -> Result<T, E>,
{
    let timeout = match timeout {
        Some(timeout) => timeout,
        None => return body(conn),
    };
    set_row_lock_timeout(conn, timeout)?;
    let outcome = body(conn);
    let restored = match restore_to {
        Some(value) => set_row_lock_timeout(conn, value),
        None => restore_default_timeout(conn),
    };
    match restored {
        Ok(()) => outcome,
        Err(restore_err) => {
            if let Err(body_err) = outcome {
                warn!(
                    "discarding lock error {} because the timeout restore failed",
                    body_err
                );
            }
            Err(E::from(restore_err))
        }
    }
}
