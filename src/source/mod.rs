pub mod google;
pub mod rate_limit;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SourceError;
use crate::sync::SourceDescriptor;

pub use google::GoogleSheetsReader;

/// One spreadsheet row: column name to cell value, in column order.
pub type Record = serde_json::Map<String, Value>;

/// Fetches the current rows of a spreadsheet source.
#[async_trait]
pub trait SheetReader: Send + Sync {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<Record>, SourceError>;
}

/// Turn a values grid into records, using the first row as the header.
///
/// Blank headers become `column_<n>` and repeated headers get a `_<k>`
/// suffix. Short rows are padded with empty strings; cells past the
/// header are dropped.
pub fn records_from_values(values: Vec<Vec<Value>>) -> Result<Vec<Record>, SourceError> {
    let mut rows = values.into_iter();
    let header = rows
        .next()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| SourceError::NotFound("no data found in the specified sheet".into()))?;

    let columns = header_names(&header);
    let records = rows
        .map(|row| {
            let mut cells = row.into_iter();
            columns
                .iter()
                .map(|col| {
                    let cell = cells.next().unwrap_or_else(|| Value::String(String::new()));
                    (col.clone(), cell)
                })
                .collect::<Record>()
        })
        .collect();
    Ok(records)
}

fn header_names(header: &[Value]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(header.len());
    for (i, cell) in header.iter().enumerate() {
        let raw = match cell {
            Value::String(s) => s.trim().to_string(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let base = if raw.is_empty() {
            format!("column_{}", i + 1)
        } else {
            raw
        };
        let mut name = base.clone();
        let mut k = 2;
        while names.contains(&name) {
            name = format!("{base}_{k}");
            k += 1;
        }
        names.push(name);
    }
    names
}

/// Union of column names across records, in first-seen order.
pub fn column_names(records: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}
