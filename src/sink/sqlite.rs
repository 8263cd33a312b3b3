use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, ErrorCode};
use serde_json::Value;

use crate::error::SinkError;
use crate::sink::DataSink;
use crate::source::{column_names, Record};
use crate::sync::unit::is_valid_identifier;
use crate::sync::TargetDescriptor;

pub const STORE_KIND: &str = "sqlite";

/// Replaces a table in an SQLite database file with the synced rows.
///
/// Targets use kind `sqlite` and a `path` connection parameter. Each write
/// drops and recreates the table inside one transaction, so readers never
/// see a half-written table.
#[derive(Debug, Default, Clone)]
pub struct SqliteSink;

impl SqliteSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DataSink for SqliteSink {
    async fn write(&self, target: &TargetDescriptor, records: &[Record]) -> Result<u64, SinkError> {
        if target.kind != STORE_KIND {
            return Err(SinkError::Unavailable(format!(
                "unsupported store kind '{}'",
                target.kind
            )));
        }
        let path = target
            .param("path")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| SinkError::Unavailable("missing 'path' connection parameter".into()))?
            .to_string();
        if !is_valid_identifier(&target.table) {
            return Err(SinkError::Schema(format!("invalid table name: {:?}", target.table)));
        }

        let columns = column_names(records);
        let rows: Vec<Vec<SqlValue>> = records
            .iter()
            .map(|r| columns.iter().map(|c| to_sql_value(r.get(c))).collect())
            .collect();

        log::info!(
            "Writing {} rows to {}:{} ({})",
            rows.len(),
            STORE_KIND,
            target.table,
            path
        );

        let conn = tokio_rusqlite::Connection::open(&path)
            .await
            .map_err(|e| SinkError::Unavailable(format!("cannot open {path}: {e}")))?;
        let table = target.table.clone();
        let result = conn
            .call(move |conn| Ok::<_, rusqlite::Error>(replace_table(conn, &table, &columns, &rows)))
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        let written = result.map_err(classify_sqlite_error)?;
        log::debug!("Replaced {} with {written} rows", target.table);
        Ok(written)
    }
}

fn replace_table(
    conn: &mut Connection,
    table: &str,
    columns: &[String],
    rows: &[Vec<SqlValue>],
) -> Result<u64, rusqlite::Error> {
    let tx = conn.transaction()?;
    let quoted_table = quote_ident(table);

    // No columns means a header-only sheet with zero data rows: keep the
    // existing table shape and clear it.
    if columns.is_empty() {
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table],
            |row| row.get(0),
        )?;
        if exists {
            tx.execute(&format!("DELETE FROM {quoted_table}"), [])?;
        }
        tx.commit()?;
        return Ok(0);
    }

    tx.execute(&format!("DROP TABLE IF EXISTS {quoted_table}"), [])?;
    let column_defs: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} {}", quote_ident(c), column_affinity(rows, i)))
        .collect();
    tx.execute(
        &format!("CREATE TABLE {quoted_table} ({})", column_defs.join(", ")),
        [],
    )?;

    {
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {quoted_table} VALUES ({})",
            placeholders.join(", ")
        ))?;
        for row in rows {
            stmt.execute(params_from_iter(row.iter()))?;
        }
    }

    tx.commit()?;
    Ok(rows.len() as u64)
}

/// Declared type for a column: INTEGER or REAL when every non-null value is
/// numeric, TEXT otherwise.
fn column_affinity(rows: &[Vec<SqlValue>], index: usize) -> &'static str {
    let mut affinity = "INTEGER";
    let mut seen = false;
    for value in rows.iter().filter_map(|r| r.get(index)) {
        match value {
            SqlValue::Null => {}
            SqlValue::Integer(_) => seen = true,
            SqlValue::Real(_) => {
                seen = true;
                affinity = "REAL";
            }
            _ => return "TEXT",
        }
    }
    if seen {
        affinity
    } else {
        "TEXT"
    }
}

fn to_sql_value(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(*b as i64),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn classify_sqlite_error(e: rusqlite::Error) -> SinkError {
    let code = match &e {
        rusqlite::Error::SqliteFailure(err, _) => Some(err.code),
        _ => None,
    };
    match code {
        Some(ErrorCode::AuthorizationForStatementDenied)
        | Some(ErrorCode::PermissionDenied)
        | Some(ErrorCode::ReadOnly) => SinkError::Auth(e.to_string()),
        Some(ErrorCode::CannotOpen)
        | Some(ErrorCode::DatabaseBusy)
        | Some(ErrorCode::DatabaseLocked)
        | Some(ErrorCode::SystemIoFailure)
        | Some(ErrorCode::DiskFull)
        | Some(ErrorCode::NotADatabase)
        | Some(ErrorCode::DatabaseCorrupt) => SinkError::Unavailable(e.to_string()),
        _ => SinkError::Schema(e.to_string()),
    }
}
