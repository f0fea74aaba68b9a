use rusqlite::{params, Connection, OptionalExtension};
use tessera_core::error::{Result, TesseraError};

/// Create the projection table if needed
///
/// `table` must already be validated as a plain identifier.
pub fn ensure_table(conn: &Connection, table: &str) -> Result<()> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                no INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                position INTEGER NOT NULL DEFAULT 0,
                state BLOB NOT NULL DEFAULT x'',
                locked INTEGER NOT NULL DEFAULT 0
            )"
        ),
        [],
    )
    .map_err(|e| TesseraError::Storage(e.to_string()))?;

    Ok(())
}

/// Register a projection row, returning its row number
///
/// Existing rows are left untouched.
pub fn register_projection(conn: &Connection, table: &str, name: &str) -> Result<i64> {
    conn.execute(
        &format!("INSERT OR IGNORE INTO \"{table}\" (name) VALUES (?1)"),
        params![name],
    )
    .map_err(|e| TesseraError::Storage(e.to_string()))?;

    row_number(conn, table, name)?
        .ok_or_else(|| TesseraError::NotFound(format!("projection {}", name)))
}

/// Row number of a projection, if registered
pub fn row_number(conn: &Connection, table: &str, name: &str) -> Result<Option<i64>> {
    conn.query_row(
        &format!("SELECT no FROM \"{table}\" WHERE name = ?1"),
        params![name],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| TesseraError::Storage(e.to_string()))
}
