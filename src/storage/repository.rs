use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO app_config (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Sync Runs ──────────────────────────────────────────────────────

/// One row of the `sync_runs` history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRun {
    pub id: i64,
    pub unit_key: String,
    pub triggered_by: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub rows_synced: Option<i64>,
    pub error_message: Option<String>,
}

pub fn insert_sync_run(
    conn: &Connection,
    unit_key: &str,
    triggered_by: &str,
    started_at: &str,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_runs (unit_key, triggered_by, status, started_at)
         VALUES (?1, ?2, 'running', ?3)",
        params![unit_key, triggered_by, started_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn finish_sync_run(
    conn: &Connection,
    run_id: i64,
    status: &str,
    completed_at: &str,
    rows_synced: Option<u64>,
    error_message: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE sync_runs SET
            status = ?2, completed_at = ?3, rows_synced = ?4, error_message = ?5
         WHERE id = ?1",
        params![
            run_id,
            status,
            completed_at,
            rows_synced.map(|n| n as i64),
            error_message,
        ],
    )?;
    Ok(())
}

/// Most recent runs first.
pub fn list_recent_sync_runs(conn: &Connection, limit: u32) -> Result<Vec<SyncRun>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, unit_key, triggered_by, status, started_at, completed_at,
                rows_synced, error_message
         FROM sync_runs ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(SyncRun {
            id: row.get(0)?,
            unit_key: row.get(1)?,
            triggered_by: row.get(2)?,
            status: row.get(3)?,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            rows_synced: row.get(6)?,
            error_message: row.get(7)?,
        })
    })?;
    rows.collect()
}

pub fn last_completed_sync_at(conn: &Connection) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT MAX(completed_at) FROM sync_runs WHERE status = 'completed'",
        [],
        |row| row.get(0),
    )
}
