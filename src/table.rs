//! Image metadata table with a row-level change stream.
//!
//! The table is keyed by object key and holds one record per validated
//! upload. Serde renames follow the persisted wire shape (`fileName`,
//! `uploadTime`, `Caption`, ...). Every write emits a [`ChangeRecord`] on the
//! change stream, which drives the confirmation handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Validation status stored on every ingested record
pub const VALID_STATUS: &str = "valid";

/// Errors that can occur on table operations
#[derive(Error, Debug)]
pub enum TableError {
    #[error("Invalid metadata type: {0}")]
    DisallowedAttribute(String),

    #[error("Table write failed: {0}")]
    WriteFailed(String),
}

/// A stored image metadata record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Object key, the primary key of the table
    #[serde(rename = "fileName")]
    pub file_name: String,
    /// Upload timestamp
    #[serde(rename = "uploadTime")]
    pub upload_time: DateTime<Utc>,
    /// Source bucket
    #[serde(rename = "bucketName")]
    pub bucket_name: String,
    /// Validation status, always [`VALID_STATUS`] for ingested records
    pub status: String,
    #[serde(rename = "Caption", skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(rename = "Date", skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "Photographer", skip_serializing_if = "Option::is_none")]
    pub photographer: Option<String>,
}

impl ImageRecord {
    /// Build a freshly validated record for an ingested upload
    pub fn valid(file_name: impl Into<String>, bucket_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            upload_time: Utc::now(),
            bucket_name: bucket_name.into(),
            status: VALID_STATUS.to_string(),
            caption: None,
            date: None,
            photographer: None,
        }
    }
}

/// Descriptive attributes that may be patched onto a record.
///
/// This enum is the attribute allow-list: anything else fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataAttribute {
    Caption,
    Date,
    Photographer,
}

impl MetadataAttribute {
    /// All allowed attribute names, in wire form
    pub const ALLOWED: [&'static str; 3] = ["Caption", "Date", "Photographer"];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataAttribute::Caption => "Caption",
            MetadataAttribute::Date => "Date",
            MetadataAttribute::Photographer => "Photographer",
        }
    }
}

impl FromStr for MetadataAttribute {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Caption" => Ok(MetadataAttribute::Caption),
            "Date" => Ok(MetadataAttribute::Date),
            "Photographer" => Ok(MetadataAttribute::Photographer),
            other => Err(TableError::DisallowedAttribute(other.to_string())),
        }
    }
}

/// Kind of a row-level change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert,
    Modify,
    Remove,
}

/// A row-level change emitted on the table's change stream
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub event: ChangeEvent,
    /// Key of the changed record
    pub file_name: String,
    /// Row image after the change; absent for removals
    pub new_image: Option<ImageRecord>,
}

/// Keyed metadata store used by the ingestion and update handlers
#[async_trait::async_trait]
pub trait MetadataTable: Send + Sync {
    /// Idempotent upsert of a record
    async fn put_image(&self, record: ImageRecord) -> Result<(), TableError>;

    /// Remove a record; removing a missing key is a no-op
    async fn delete_image(&self, file_name: &str) -> Result<(), TableError>;

    /// Patch a single allow-listed attribute on an existing record
    async fn update_attribute(
        &self,
        file_name: &str,
        attribute: MetadataAttribute,
        value: &str,
    ) -> Result<(), TableError>;

    /// Fetch a record by key
    async fn get_image(&self, file_name: &str) -> Result<Option<ImageRecord>, TableError>;
}

/// In-memory metadata table with a broadcast change stream
pub struct InMemoryTable {
    name: String,
    records: RwLock<HashMap<String, ImageRecord>>,
    stream_tx: broadcast::Sender<ChangeRecord>,
}

impl InMemoryTable {
    pub fn new(name: impl Into<String>) -> Self {
        let (stream_tx, _) = broadcast::channel(256);
        Self {
            name: name.into(),
            records: RwLock::new(HashMap::new()),
            stream_tx,
        }
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to the change stream
    pub fn subscribe_stream(&self) -> broadcast::Receiver<ChangeRecord> {
        self.stream_tx.subscribe()
    }

    fn emit(&self, change: ChangeRecord) {
        // No subscribers is fine; the stream is best-effort fan-out.
        let _ = self.stream_tx.send(change);
    }
}

#[async_trait::async_trait]
impl MetadataTable for InMemoryTable {
    async fn put_image(&self, record: ImageRecord) -> Result<(), TableError> {
        let (event, change) = {
            let mut records = self
                .records
                .write()
                .map_err(|e| TableError::WriteFailed(e.to_string()))?;
            let previous = records.insert(record.file_name.clone(), record.clone());
            let event = if previous.is_none() {
                ChangeEvent::Insert
            } else {
                ChangeEvent::Modify
            };
            (
                event,
                ChangeRecord {
                    event,
                    file_name: record.file_name.clone(),
                    new_image: Some(record),
                },
            )
        };

        debug!(table = %self.name, file_name = %change.file_name, event = ?event, "Record written");
        metrics::counter!("album.table.writes").increment(1);
        self.emit(change);
        Ok(())
    }

    async fn delete_image(&self, file_name: &str) -> Result<(), TableError> {
        let removed = {
            let mut records = self
                .records
                .write()
                .map_err(|e| TableError::WriteFailed(e.to_string()))?;
            records.remove(file_name).is_some()
        };

        if removed {
            debug!(table = %self.name, file_name = %file_name, "Record removed");
            metrics::counter!("album.table.deletes").increment(1);
            self.emit(ChangeRecord {
                event: ChangeEvent::Remove,
                file_name: file_name.to_string(),
                new_image: None,
            });
        } else {
            debug!(table = %self.name, file_name = %file_name, "Delete for missing key ignored");
        }
        Ok(())
    }

    async fn update_attribute(
        &self,
        file_name: &str,
        attribute: MetadataAttribute,
        value: &str,
    ) -> Result<(), TableError> {
        let change = {
            let mut records = self
                .records
                .write()
                .map_err(|e| TableError::WriteFailed(e.to_string()))?;
            match records.get_mut(file_name) {
                Some(record) => {
                    match attribute {
                        MetadataAttribute::Caption => record.caption = Some(value.to_string()),
                        MetadataAttribute::Date => record.date = Some(value.to_string()),
                        MetadataAttribute::Photographer => {
                            record.photographer = Some(value.to_string())
                        }
                    }
                    Some(ChangeRecord {
                        event: ChangeEvent::Modify,
                        file_name: file_name.to_string(),
                        new_image: Some(record.clone()),
                    })
                }
                None => None,
            }
        };

        match change {
            Some(change) => {
                debug!(
                    table = %self.name,
                    file_name = %file_name,
                    attribute = attribute.as_str(),
                    "Attribute updated"
                );
                metrics::counter!("album.table.updates").increment(1);
                self.emit(change);
            }
            None => {
                // Conditional update: patching a record that does not exist
                // changes nothing.
                warn!(
                    table = %self.name,
                    file_name = %file_name,
                    attribute = attribute.as_str(),
                    "Update for missing record ignored"
                );
            }
        }
        Ok(())
    }

    async fn get_image(&self, file_name: &str) -> Result<Option<ImageRecord>, TableError> {
        let records = self
            .records
            .read()
            .map_err(|e| TableError::WriteFailed(e.to_string()))?;
        Ok(records.get(file_name).cloned())
    }
}
