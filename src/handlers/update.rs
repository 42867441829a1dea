//! Metadata-update handler: patches a single allow-listed attribute on a
//! record.

use crate::events::{MetadataUpdate, METADATA_TYPE_ATTRIBUTE};
use crate::routing::TopicMessage;
use crate::table::{MetadataAttribute, MetadataTable, TableError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Errors raised while applying a metadata update
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Missing metadata_type attribute")]
    MissingAttribute,

    #[error("Failed to decode update instruction: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// Handler for topic messages matching the `metadata_type` attribute filter
pub struct UpdateHandler {
    table: Arc<dyn MetadataTable>,
}

impl UpdateHandler {
    pub fn new(table: Arc<dyn MetadataTable>) -> Self {
        Self { table }
    }

    /// Process a batch of update messages; a failing record is logged and the
    /// loop continues.
    pub async fn handle_batch(&self, batch: &[TopicMessage]) {
        for message in batch {
            if let Err(e) = self.process_record(message).await {
                error!(error = %e, "Error processing metadata update");
                metrics::counter!("album.update.failed").increment(1);
            }
        }
    }

    async fn process_record(&self, message: &TopicMessage) -> Result<(), UpdateError> {
        // The attribute filter should already guarantee an allow-listed tag;
        // re-validate anyway.
        let tag = message
            .attributes
            .get(METADATA_TYPE_ATTRIBUTE)
            .ok_or(UpdateError::MissingAttribute)?;
        let attribute: MetadataAttribute = tag.parse()?;

        let update: MetadataUpdate = serde_json::from_str(&message.body)?;

        info!(
            id = %update.id,
            attribute = attribute.as_str(),
            value = %update.value,
            "Updating metadata"
        );

        self.table
            .update_attribute(&update.id, attribute, &update.value)
            .await?;
        metrics::counter!("album.update.applied").increment(1);
        Ok(())
    }
}
