//! Wire shapes for object-store notifications and metadata updates.
//!
//! These mirror the JSON shapes emitted by the object store and relayed
//! through the notification topic and durable queue, so field names follow
//! the wire (`Records`, `eventName`, `Message`) rather than Rust convention.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side-channel attribute carrying the metadata tag for update routing
pub const METADATA_TYPE_ATTRIBUTE: &str = "metadata_type";

/// Event name for a completed object upload
pub const OBJECT_CREATED_PUT: &str = "ObjectCreated:Put";

/// Event name for an object deletion
pub const OBJECT_REMOVED_DELETE: &str = "ObjectRemoved:Delete";

/// Errors that can occur while decoding event payloads
#[derive(Error, Debug)]
pub enum EventError {
    #[error("Failed to decode event payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid object key encoding: {0}")]
    InvalidKey(String),
}

/// Bucket portion of an object-store event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketEntity {
    /// Source bucket name
    pub name: String,
}

/// Object portion of an object-store event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEntity {
    /// Object key, percent/`+`-encoded as on the wire
    pub key: String,
}

/// Object-store details of a single event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: BucketEntity,
    pub object: ObjectEntity,
}

/// A single object-store event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event name, e.g. `ObjectCreated:Put` or `ObjectRemoved:Delete`
    #[serde(rename = "eventName")]
    pub event_name: String,
    /// Object-store details
    pub s3: S3Entity,
}

impl EventRecord {
    /// True for any event in the `ObjectCreated:*` family
    pub fn is_object_created(&self) -> bool {
        self.event_name.starts_with("ObjectCreated:")
    }

    /// True for any event in the `ObjectRemoved:*` family
    pub fn is_object_removed(&self) -> bool {
        self.event_name.starts_with("ObjectRemoved:")
    }
}

/// Notification envelope fanned out by the topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Event records; absent on malformed notifications
    #[serde(rename = "Records")]
    pub records: Option<Vec<EventRecord>>,
}

impl Notification {
    /// Build a single-record notification for one object-store event
    pub fn single(event_name: impl Into<String>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            records: Some(vec![EventRecord {
                event_name: event_name.into(),
                s3: S3Entity {
                    bucket: BucketEntity { name: bucket.into() },
                    object: ObjectEntity { key: key.into() },
                },
            }]),
        }
    }
}

/// Queue relay wrapper: a topic message forwarded through the durable queue
/// arrives with its body nested one level deeper as a JSON-encoded string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayedMessage {
    /// JSON-encoded notification envelope
    #[serde(rename = "Message")]
    pub message: String,
}

/// Metadata update instruction carried in the topic message body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataUpdate {
    /// Object key of the record to patch
    pub id: String,
    /// New attribute value
    pub value: String,
}

/// Decode a percent/`+`-encoded object key into its original form.
///
/// The object store space-encodes keys with `+` before percent-encoding the
/// rest, so `+` is normalized first.
pub fn decode_object_key(key: &str) -> Result<String, EventError> {
    let normalized = key.replace('+', " ");
    urlencoding::decode(&normalized)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| EventError::InvalidKey(key.to_string()))
}
