//! Best-effort capture of server-side lock state for failed commit
//! lock attempts.

use crate::driver::{Connection, DriverError, Row};

/// Gather whatever lock introspection the server lets us see. Tries the
/// given views in order and uses the first one that runs; if none do,
/// the connection id alone is returned. Never fails: diagnostics must
/// not mask the lock error they describe.
pub(crate) fn collect_debug_info<C: Connection>(
    conn: &mut C,
    conn_id_stmt: &str,
    view_stmts: &[&str],
) -> String {
    let conn_id = fetch_connection_id(conn, conn_id_stmt);
    for stmt in view_stmts {
        match query_rows(conn, stmt) {
            Ok(rows) => {
                if rows.is_empty() {
                    return format!("Connection: {}", conn_id);
                }
                return format!("Connection: {}\n{}", conn_id, rows_as_pretty_string(&rows));
            }
            Err(e) => {
                debug!("lock view unavailable ({}): {}", stmt, e);
            }
        }
    }
    format!("Connection: {}", conn_id)
}

fn fetch_connection_id<C: Connection>(conn: &mut C, stmt: &str) -> String {
    let row = match query_one(conn, stmt) {
        Ok(row) => row,
        Err(_) => None,
    };
    match row.and_then(|r| r.into_iter().next()) {
        Some(value) => value.to_string(),
        None => "unknown".to_string(),
    }
}

fn query_one<C: Connection>(conn: &mut C, stmt: &str) -> Result<Option<Row>, DriverError> {
    conn.execute(stmt, &[])?;
    conn.fetch_one()
}

fn query_rows<C: Connection>(conn: &mut C, stmt: &str) -> Result<Vec<Row>, DriverError> {
    conn.execute(stmt, &[])?;
    conn.fetch_all()
}

/// One line per row, cells tab-separated.
fn rows_as_pretty_string(rows: &[Row]) -> String {
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|value| value.to_string())
                .collect::<Vec<_>>()
                .join("\t")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
