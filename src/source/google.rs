use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result, SourceError};
use crate::source::rate_limit::{backoff_sleep, MAX_RETRIES};
use crate::source::{records_from_values, Record, SheetReader};
use crate::sync::SourceDescriptor;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Reads a sheet through the Google Sheets v4 `values.get` endpoint,
/// authenticating with a bearer token resolved from the source's credential.
pub struct GoogleSheetsReader {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl GoogleSheetsReader {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: SHEETS_API_BASE.to_string(),
        })
    }

    /// Point the reader at a different API root (proxies, emulators).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `{base}/{spreadsheet_id}/values/{sheet_name}`, path-encoded.
    ///
    /// Numbers and booleans come back unformatted so the sink can type
    /// numeric columns; dates stay formatted strings.
    pub fn values_url(&self, source: &SourceDescriptor) -> std::result::Result<url::Url, SourceError> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| SourceError::Unavailable(format!("invalid API base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::Unavailable("API base URL cannot have a path".into()))?
            .push(&source.spreadsheet_id)
            .push("values")
            .push(&source.sheet_name);
        url.query_pairs_mut()
            .append_pair("valueRenderOption", "UNFORMATTED_VALUE")
            .append_pair("dateTimeRenderOption", "FORMATTED_STRING");
        Ok(url)
    }
}

#[async_trait]
impl SheetReader for GoogleSheetsReader {
    async fn fetch(&self, source: &SourceDescriptor) -> std::result::Result<Vec<Record>, SourceError> {
        log::info!(
            "Reading sheet '{}' of spreadsheet {}",
            source.sheet_name,
            source.spreadsheet_id
        );
        let token = source.credentials.resolve()?;
        let url = self.values_url(source)?;

        let mut attempt: u32 = 0;
        let response = loop {
            let response = self
                .http
                .get(url.clone())
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| SourceError::Unavailable(e.to_string()))?;
            if response.status() == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RETRIES {
                backoff_sleep(attempt, response.headers()).await;
                attempt += 1;
                continue;
            }
            break response;
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, source));
        }

        let range: ValueRange = response
            .json()
            .await
            .map_err(|e| SourceError::Unavailable(format!("invalid values response: {e}")))?;
        let records = records_from_values(range.values).map_err(|e| match e {
            SourceError::NotFound(_) => SourceError::NotFound(format!(
                "no data found in sheet '{}'",
                source.sheet_name
            )),
            other => other,
        })?;
        log::debug!(
            "Read {} rows from {}/{}",
            records.len(),
            source.spreadsheet_id,
            source.sheet_name
        );
        Ok(records)
    }
}

/// Map a non-success HTTP status onto the source error taxonomy.
pub fn classify_status(status: StatusCode, body: &str, source: &SourceDescriptor) -> SourceError {
    let detail = api_error_message(body).unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Auth(detail),
        StatusCode::NOT_FOUND => SourceError::NotFound(format!(
            "{}/{}: {detail}",
            source.spreadsheet_id, source.sheet_name
        )),
        // An unknown sheet name is reported as a bad range, not a 404.
        StatusCode::BAD_REQUEST if detail.contains("Unable to parse range") => {
            SourceError::NotFound(format!("sheet '{}': {detail}", source.sheet_name))
        }
        _ => SourceError::Unavailable(format!("HTTP {status}: {detail}")),
    }
}

/// Pull `error.message` out of a Google API error body.
fn api_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}
