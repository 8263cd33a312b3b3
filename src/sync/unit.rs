use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Serialize, Serializer};

use crate::config::{DEFAULT_SHEET_NAME, DEFAULT_SYNC_INTERVAL};
use crate::error::{Error, Result, SourceError};
use crate::url::is_spreadsheet_id;

static RE_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").unwrap());

/// Check if a string is usable as a bare SQL table name.
pub fn is_valid_identifier(s: &str) -> bool {
    RE_IDENTIFIER.is_match(s)
}

/// Reject intervals outside `1..=max` minutes.
pub fn validate_interval(interval_minutes: u32, max: u32) -> Result<()> {
    if interval_minutes == 0 || interval_minutes > max {
        return Err(Error::InvalidInterval {
            interval: interval_minutes,
            max,
        });
    }
    Ok(())
}

/// Opaque reference to the credential a reader authenticates with.
///
/// Parsed from `env:NAME`, `file:PATH`, or taken as a literal token.
/// The literal form is never printed.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialRef {
    Env(String),
    File(PathBuf),
    Token(String),
}

impl CredentialRef {
    /// Load the secret this reference points at.
    pub fn resolve(&self) -> std::result::Result<String, SourceError> {
        let secret = match self {
            CredentialRef::Env(name) => std::env::var(name).map_err(|_| {
                SourceError::Auth(format!("credential variable {name} is not set"))
            })?,
            CredentialRef::File(path) => std::fs::read_to_string(path).map_err(|e| {
                SourceError::Auth(format!("cannot read credential file {}: {e}", path.display()))
            })?,
            CredentialRef::Token(token) => token.clone(),
        };
        let secret = secret.trim().to_string();
        if secret.is_empty() {
            return Err(SourceError::Auth(format!("credential {self} is empty")));
        }
        Ok(secret)
    }
}

impl FromStr for CredentialRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(name) = s.strip_prefix("env:") {
            if name.is_empty() {
                return Err(Error::InvalidUnit("empty credential variable name".into()));
            }
            return Ok(CredentialRef::Env(name.to_string()));
        }
        if let Some(path) = s.strip_prefix("file:") {
            if path.is_empty() {
                return Err(Error::InvalidUnit("empty credential file path".into()));
            }
            return Ok(CredentialRef::File(PathBuf::from(path)));
        }
        if s.is_empty() {
            return Err(Error::InvalidUnit("empty credential".into()));
        }
        Ok(CredentialRef::Token(s.to_string()))
    }
}

impl fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialRef::Env(name) => write!(f, "env:{name}"),
            CredentialRef::File(path) => write!(f, "file:{}", path.display()),
            CredentialRef::Token(_) => f.write_str("token:<redacted>"),
        }
    }
}

impl fmt::Debug for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for CredentialRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Where rows are read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDescriptor {
    pub credentials: CredentialRef,
    pub spreadsheet_id: String,
    pub sheet_name: String,
}

impl SourceDescriptor {
    /// Build a source, applying [`DEFAULT_SHEET_NAME`] when no sheet is named.
    pub fn new(
        credentials: CredentialRef,
        spreadsheet_id: impl Into<String>,
        sheet_name: Option<String>,
    ) -> Self {
        let sheet_name = sheet_name
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SHEET_NAME.to_string());
        Self {
            credentials,
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name,
        }
    }
}

/// Where rows are written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetDescriptor {
    /// Store kind understood by the sink, e.g. `sqlite`.
    pub kind: String,
    #[serde(serialize_with = "serialize_redacted_params")]
    pub params: BTreeMap<String, String>,
    pub table: String,
}

impl TargetDescriptor {
    pub fn new(kind: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: BTreeMap::new(),
            table: table.into(),
        }
    }

    /// Target an SQLite database file.
    pub fn sqlite(path: impl Into<String>, table: impl Into<String>) -> Self {
        Self::new("sqlite", table).with_param("path", path)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

fn serialize_redacted_params<S: Serializer>(
    params: &BTreeMap<String, String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let redacted: BTreeMap<&str, &str> = params
        .iter()
        .map(|(k, v)| {
            let secret = matches!(k.as_str(), "password" | "token" | "secret");
            (k.as_str(), if secret { "<redacted>" } else { v.as_str() })
        })
        .collect();
    redacted.serialize(serializer)
}

/// Immutable description of one sync job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncUnit {
    pub source: SourceDescriptor,
    pub target: TargetDescriptor,
    pub interval_minutes: u32,
}

impl SyncUnit {
    pub fn new(source: SourceDescriptor, target: TargetDescriptor) -> Self {
        Self {
            source,
            target,
            interval_minutes: DEFAULT_SYNC_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval_minutes: u32) -> Self {
        self.interval_minutes = interval_minutes;
        self
    }

    /// Stable key used in logs and sync history.
    pub fn key(&self) -> String {
        format!(
            "{}/{}->{}:{}",
            self.source.spreadsheet_id, self.source.sheet_name, self.target.kind, self.target.table
        )
    }

    /// Reject units that could never sync, before any state is touched.
    pub fn validate(&self) -> Result<()> {
        if !is_spreadsheet_id(&self.source.spreadsheet_id) {
            return Err(Error::InvalidUnit(format!(
                "invalid spreadsheet id: {:?}",
                self.source.spreadsheet_id
            )));
        }
        if self.source.sheet_name.trim().is_empty() {
            return Err(Error::InvalidUnit("sheet name must not be empty".into()));
        }
        if self.target.kind.trim().is_empty() {
            return Err(Error::InvalidUnit("target store kind must not be empty".into()));
        }
        if !is_valid_identifier(&self.target.table) {
            return Err(Error::InvalidUnit(format!(
                "invalid table name: {:?}",
                self.target.table
            )));
        }
        Ok(())
    }
}
