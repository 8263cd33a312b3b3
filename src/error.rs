use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    UrlParse(String),

    #[error("Invalid interval: {interval} minutes (must be between 1 and {max})")]
    InvalidInterval { interval: u32, max: u32 },

    #[error("Invalid sync unit: {0}")]
    InvalidUnit(String),

    #[error("Auto-sync is already running")]
    AlreadyRunning,

    #[error("A sync is already in progress")]
    SyncInProgress,

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Failures reported by a [`crate::source::SheetReader`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("spreadsheet source unavailable: {0}")]
    Unavailable(String),

    #[error("spreadsheet authentication failed: {0}")]
    Auth(String),

    #[error("spreadsheet not found: {0}")]
    NotFound(String),
}

/// Failures reported by a [`crate::sink::DataSink`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("data store unavailable: {0}")]
    Unavailable(String),

    #[error("data store schema error: {0}")]
    Schema(String),

    #[error("data store authentication failed: {0}")]
    Auth(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
