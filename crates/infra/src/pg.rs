//! Shared sqlx error handling for the Postgres-backed stores.

/// Render a sqlx failure together with the operation it interrupted.
///
/// Unique-constraint violations (SQLSTATE 23505) and pool shutdown are called
/// out distinctly so operators can tell a data race from an outage; every
/// other failure keeps the driver's message.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                format!(
                    "unique constraint violation in {}: {}",
                    operation,
                    db_err.message()
                )
            } else {
                format!("database error in {}: {}", operation, db_err.message())
            }
        }
        sqlx::Error::PoolClosed => format!("connection pool closed during {}", operation),
        other => format!("sqlx error in {}: {}", operation, other),
    }
}
