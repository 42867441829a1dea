//! Ingestion handler: validates object events and maintains the metadata
//! table.

use crate::events::{decode_object_key, EventError, Notification, RelayedMessage};
use crate::queue::{BatchHandler, QueueMessage};
use crate::table::{ImageRecord, MetadataTable, TableError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// File extensions accepted for upload, matched case-insensitively
pub const VALID_EXTENSIONS: [&str; 3] = [".jpeg", ".jpg", ".png"];

/// Errors raised while ingesting an object event
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid file type for object: {0}")]
    InvalidFileType(String),

    #[error("Failed to decode queue message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// True when the object key carries an allow-listed image extension
pub fn is_valid_image_type(key: &str) -> bool {
    let lowered = key.to_lowercase();
    VALID_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext))
}

/// Handler for object-store events forwarded through the processing queue
pub struct IngestHandler {
    table: Arc<dyn MetadataTable>,
}

impl IngestHandler {
    pub fn new(table: Arc<dyn MetadataTable>) -> Self {
        Self { table }
    }

    /// Process one queue message: unwrap the relayed notification and apply
    /// every inner object event.
    ///
    /// Any error aborts the whole message; partial success within a message
    /// is deliberately not attempted, so redelivery replays all inner events.
    async fn process_message(&self, message: &QueueMessage) -> Result<(), IngestError> {
        let relayed: RelayedMessage = serde_json::from_str(&message.body)?;
        let notification: Notification = serde_json::from_str(&relayed.message)?;

        let Some(records) = notification.records else {
            warn!(message_id = %message.message_id, "Notification without records, skipping");
            return Ok(());
        };

        for record in &records {
            let bucket = &record.s3.bucket.name;
            let key = decode_object_key(&record.s3.object.key)?;

            info!(bucket = %bucket, key = %key, event = %record.event_name, "Processing object event");

            if record.is_object_created() {
                if !is_valid_image_type(&key) {
                    metrics::counter!("album.ingest.rejected").increment(1);
                    return Err(IngestError::InvalidFileType(key));
                }
                self.table
                    .put_image(ImageRecord::valid(key.clone(), bucket.clone()))
                    .await?;
                metrics::counter!("album.ingest.recorded").increment(1);
            } else if record.is_object_removed() {
                self.table.delete_image(&key).await?;
                metrics::counter!("album.ingest.removed").increment(1);
            } else {
                warn!(event = %record.event_name, key = %key, "Ignoring unhandled event kind");
            }
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl BatchHandler for IngestHandler {
    async fn handle(&self, batch: &[QueueMessage]) -> anyhow::Result<()> {
        for message in batch {
            self.process_message(message).await?;
        }
        Ok(())
    }
}
