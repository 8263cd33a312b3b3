use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static RE_SPREADSHEET_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{10,}$").unwrap());

/// Parsed information from a Google Sheets URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetUrlInfo {
    pub spreadsheet_id: String,
}

/// Parse a Google Sheets URL into its component identifiers.
///
/// Supported URL patterns (any `gid` tab selector is ignored; sheets are
/// addressed by name):
/// - `https://docs.google.com/spreadsheets/d/<id>`
/// - `https://docs.google.com/spreadsheets/d/<id>/edit#gid=<gid>`
/// - `https://docs.google.com/spreadsheets/u/0/d/<id>/edit?gid=<gid>`
pub fn parse_sheet_url(input: &str) -> Result<SheetUrlInfo> {
    let url = url::Url::parse(input).map_err(|e| Error::UrlParse(e.to_string()))?;

    let host = url.host_str().unwrap_or("");
    if host != "docs.google.com" {
        return Err(Error::UrlParse(format!("not a Google Sheets URL: {input}")));
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.collect())
        .unwrap_or_default();

    if segments.first() != Some(&"spreadsheets") {
        return Err(Error::UrlParse(format!("not a spreadsheet URL: {input}")));
    }

    let id = segments
        .iter()
        .position(|s| *s == "d")
        .and_then(|i| segments.get(i + 1))
        .filter(|s| is_spreadsheet_id(s))
        .ok_or_else(|| Error::UrlParse(format!("missing spreadsheet id in URL: {input}")))?;

    Ok(SheetUrlInfo {
        spreadsheet_id: id.to_string(),
    })
}

/// Check if a string looks like a spreadsheet id.
pub fn is_spreadsheet_id(s: &str) -> bool {
    RE_SPREADSHEET_ID.is_match(s)
}

/// Extract a spreadsheet id from either a raw id or a Google Sheets URL.
pub fn resolve_spreadsheet_id(input: &str) -> Result<String> {
    let input = input.trim();
    if is_spreadsheet_id(input) {
        return Ok(input.to_string());
    }
    if input.contains("docs.google.com") {
        return parse_sheet_url(input).map(|info| info.spreadsheet_id);
    }
    Err(Error::UrlParse(format!(
        "expected a spreadsheet id or Google Sheets URL: {input}"
    )))
}
