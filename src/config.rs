use std::path::PathBuf;

use crate::error::{Error, Result};

/// Sheet read when a unit does not name one.
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

/// Auto-sync cadence used when the caller does not pass one.
pub const DEFAULT_SYNC_INTERVAL: u32 = 5;

/// Upper bound for auto-sync intervals: one day, in minutes.
pub const MAX_SYNC_INTERVAL: u32 = 1440;

/// Process settings, read from `SHEETSYNC_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub default_sheet_name: String,
    pub default_sync_interval: u32,
    pub max_sync_interval: u32,
    /// Path of the state database holding sync history and config.
    /// `None` means `~/.sheetsync/sheetsync.db`.
    pub db_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_sheet_name: DEFAULT_SHEET_NAME.to_string(),
            default_sync_interval: DEFAULT_SYNC_INTERVAL,
            max_sync_interval: MAX_SYNC_INTERVAL,
            db_path: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(sheet) = lookup("SHEETSYNC_DEFAULT_SHEET") {
            let sheet = sheet.trim();
            if sheet.is_empty() {
                return Err(Error::Config("SHEETSYNC_DEFAULT_SHEET must not be empty".into()));
            }
            settings.default_sheet_name = sheet.to_string();
        }
        if let Some(max) = lookup("SHEETSYNC_MAX_INTERVAL") {
            settings.max_sync_interval = parse_minutes("SHEETSYNC_MAX_INTERVAL", &max)?.max(1);
        }
        if let Some(interval) = lookup("SHEETSYNC_DEFAULT_INTERVAL") {
            settings.default_sync_interval = parse_minutes("SHEETSYNC_DEFAULT_INTERVAL", &interval)?;
        }
        if settings.default_sync_interval == 0
            || settings.default_sync_interval > settings.max_sync_interval
        {
            return Err(Error::Config(format!(
                "default interval {} is outside 1..={}",
                settings.default_sync_interval, settings.max_sync_interval
            )));
        }
        if let Some(path) = lookup("SHEETSYNC_DB") {
            if !path.trim().is_empty() {
                settings.db_path = Some(PathBuf::from(path));
            }
        }

        Ok(settings)
    }

    /// Resolve the state database path, falling back to the home directory.
    pub fn resolve_db_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.db_path {
            return Ok(path.clone());
        }
        let dir = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?
            .join(".sheetsync");
        Ok(dir.join("sheetsync.db"))
    }
}

fn parse_minutes(key: &str, raw: &str) -> Result<u32> {
    raw.trim()
        .parse::<u32>()
        .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}")))
}
