pub mod sqlite;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::source::Record;
use crate::sync::TargetDescriptor;

pub use sqlite::SqliteSink;

/// Writes a record set into a target table, replacing its content.
#[async_trait]
pub trait DataSink: Send + Sync {
    /// Returns the number of rows written.
    async fn write(&self, target: &TargetDescriptor, records: &[Record]) -> Result<u64, SinkError>;
}
