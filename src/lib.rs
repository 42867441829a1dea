//! Album Pipeline - event-driven image upload notifications
//!
//! This library implements the routing and handler logic of the photo album
//! upload pipeline:
//!
//! - Object-store events fan out through a notification topic with
//!   per-subscriber filter policies
//! - A durable processing queue with bounded redelivery and dead-lettering
//!   feeds the ingestion handler, which validates uploads and maintains the
//!   image metadata table
//! - The table's change stream drives confirmation mail; dead-lettered
//!   uploads drive rejection mail; attribute-filtered messages patch record
//!   metadata
//!
//! # Example
//!
//! ```rust,no_run
//! use album_pipeline::{Config, InMemoryTable, LogMailer, Pipeline};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let table = Arc::new(InMemoryTable::new(&config.table.name));
//!     let mailer = Arc::new(LogMailer::new(&config.mail.region));
//!
//!     let pipeline = Pipeline::start(&config, table, mailer)?;
//!     pipeline.publish_object_event("ObjectCreated:Put", "images", "beach.jpg")?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod events;
pub mod handlers;
pub mod mailer;
pub mod pipeline;
pub mod queue;
pub mod routing;
pub mod table;

// Re-export main types
pub use config::{Config, ConfigError, MailConfig, QueueConfig, ServiceConfig, TableConfig};
pub use events::{
    decode_object_key, EventError, EventRecord, MetadataUpdate, Notification, RelayedMessage,
    METADATA_TYPE_ATTRIBUTE, OBJECT_CREATED_PUT, OBJECT_REMOVED_DELETE,
};
pub use handlers::{ConfirmationHandler, IngestHandler, RejectionHandler, UpdateHandler};
pub use mailer::{LogMailer, MailError, Mailer, OutboundMail};
pub use pipeline::{Pipeline, PublishError, QUEUE_SUBSCRIBER, UPDATE_SUBSCRIBER};
pub use queue::{BatchHandler, DeliveryOptions, DurableQueue, QueueConsumer, QueueMessage};
pub use routing::{FilterPolicy, Topic, TopicMessage};
pub use table::{
    ChangeEvent, ChangeRecord, ImageRecord, InMemoryTable, MetadataAttribute, MetadataTable,
    TableError,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::events::{Notification, OBJECT_CREATED_PUT, OBJECT_REMOVED_DELETE};
    pub use crate::mailer::{LogMailer, Mailer};
    pub use crate::pipeline::Pipeline;
    pub use crate::routing::{FilterPolicy, Topic, TopicMessage};
    pub use crate::table::{InMemoryTable, MetadataTable};
}
