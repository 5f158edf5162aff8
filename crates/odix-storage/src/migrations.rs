//! Versioned schema. Each step runs in one transaction together with its
//! `schema_version` row, so a failed upgrade leaves the previous version.

use odix_core::OdixError;
use rusqlite::{params, Connection};

/// `(version, description, sql)`, in ascending version order.
const STEPS: &[(u32, &str, &str)] = &[
    (
        1,
        "Entities, relationships and file records",
        include_str!("migrations/001_initial.sql"),
    ),
    (
        2,
        "Per-file entity definitions",
        include_str!("migrations/002_entity_definitions.sql"),
    ),
];

fn storage_err(e: rusqlite::Error) -> OdixError {
    OdixError::Storage(e.to_string())
}

/// Highest applied schema version, 0 for a new database.
pub(crate) fn schema_version(conn: &Connection) -> Result<u32, OdixError> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(storage_err)
}

/// Bring the schema up to the latest version.
pub(crate) fn run_migrations(conn: &Connection) -> Result<(), OdixError> {
    upgrade_to(conn, u32::MAX)
}

fn upgrade_to(conn: &Connection, target: u32) -> Result<(), OdixError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        );",
    )
    .map_err(storage_err)?;

    let applied = schema_version(conn)?;
    for &(version, description, sql) in STEPS
        .iter()
        .filter(|(version, ..)| *version > applied && *version <= target)
    {
        tracing::info!("Upgrading index schema to v{version}: {description}");
        let tx = conn.unchecked_transaction().map_err(storage_err)?;
        tx.execute_batch(sql).map_err(|e| {
            OdixError::Storage(format!("schema v{version} ({description}): {e}"))
        })?;
        tx.execute(
            "INSERT INTO schema_version (version, description, applied_at) VALUES (?1, ?2, ?3)",
            params![version, description, chrono::Utc::now().timestamp()],
        )
        .map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;
    }
    Ok(())
}
