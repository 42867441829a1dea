//! Pipeline wiring: the event-routing topology assembled from one `Config`.
//!
//! Mirrors the deployed stack: object-store events enter the notification
//! topic, fan out through the body-filtered subscription into the processing
//! queue (backed by a dead-letter queue), the ingestion handler maintains the
//! metadata table, the table's change stream drives the confirmation handler,
//! and attribute-filtered update messages flow straight to the update
//! handler.

use crate::config::{Config, ConfigError};
use crate::events::{
    MetadataUpdate, Notification, RelayedMessage, METADATA_TYPE_ATTRIBUTE,
    OBJECT_CREATED_PUT, OBJECT_REMOVED_DELETE,
};
use crate::handlers::{ConfirmationHandler, IngestHandler, RejectionHandler, UpdateHandler};
use crate::mailer::Mailer;
use crate::queue::{DurableQueue, QueueConsumer};
use crate::routing::{FilterPolicy, Topic, TopicMessage};
use crate::table::{ChangeRecord, InMemoryTable, MetadataAttribute};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Subscriber that forwards image events into the processing queue
pub const QUEUE_SUBSCRIBER: &str = "image-process-queue";

/// Subscriber that applies metadata updates
pub const UPDATE_SUBSCRIBER: &str = "update-table";

/// Errors raised when publishing through the pipeline front doors
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Running pipeline: the topic front door plus its worker tasks
pub struct Pipeline {
    topic: Topic,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Validate the configuration and start all workers.
    ///
    /// Fails before any event is processed when required mail settings are
    /// missing.
    pub fn start(
        config: &Config,
        table: Arc<InMemoryTable>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut topic = Topic::new("new-image-topic");
        let mut queue_sub_rx = topic.subscribe(
            QUEUE_SUBSCRIBER,
            FilterPolicy::Body {
                event_names: vec![
                    OBJECT_CREATED_PUT.to_string(),
                    OBJECT_REMOVED_DELETE.to_string(),
                ],
            },
        );
        let mut update_rx = topic.subscribe(
            UPDATE_SUBSCRIBER,
            FilterPolicy::Attribute {
                key: METADATA_TYPE_ATTRIBUTE.to_string(),
                allowlist: MetadataAttribute::ALLOWED
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
        );

        let (process_queue, process_rx) = DurableQueue::new("image-process-queue");
        let (dead_letter_queue, dead_letter_rx) = DurableQueue::new("image-processing-dlq");

        let mut handles = Vec::new();

        // Topic -> queue forwarder; the queue relay nests the topic body one
        // level deeper as a JSON-encoded string.
        let forward_queue = process_queue.clone();
        handles.push(tokio::spawn(async move {
            while let Some(message) = queue_sub_rx.recv().await {
                let relayed = RelayedMessage {
                    message: message.body,
                };
                let body = match serde_json::to_string(&relayed) {
                    Ok(body) => body,
                    Err(e) => {
                        error!(error = %e, "Failed to encode relayed message");
                        continue;
                    }
                };
                if forward_queue.enqueue(body).is_err() {
                    warn!("Processing queue closed, stopping forwarder");
                    break;
                }
            }
        }));

        // Processing queue -> ingestion handler, dead-lettering after bounded
        // redelivery.
        let ingest = Arc::new(IngestHandler::new(table.clone()));
        let ingest_consumer = QueueConsumer::new(
            process_queue.clone(),
            process_rx,
            Some(dead_letter_queue.clone()),
            config.queue_delivery_options(),
        );
        handles.push(tokio::spawn(ingest_consumer.run(ingest)));

        // Dead-letter queue -> rejection handler.
        let rejection = Arc::new(RejectionHandler::new(mailer.clone(), config.mail.clone()));
        let dlq_consumer = QueueConsumer::new(
            dead_letter_queue,
            dead_letter_rx,
            None,
            config.dlq_delivery_options(),
        );
        handles.push(tokio::spawn(dlq_consumer.run(rejection)));

        // Table change stream -> confirmation handler.
        let confirmation = ConfirmationHandler::new(mailer, config.mail.clone());
        let stream_rx = table.subscribe_stream();
        let batch_size = config.table.stream_batch_size;
        let batch_window = config.stream_batch_window();
        handles.push(tokio::spawn(run_stream_worker(
            stream_rx,
            confirmation,
            batch_size,
            batch_window,
        )));

        // Attribute-filtered topic messages -> update handler.
        let update = UpdateHandler::new(table);
        handles.push(tokio::spawn(async move {
            while let Some(message) = update_rx.recv().await {
                update.handle_batch(&[message]).await;
            }
        }));

        info!("Pipeline started");
        Ok(Self { topic, handles })
    }

    /// Publish one object-store event into the notification topic
    pub fn publish_object_event(
        &self,
        event_name: &str,
        bucket: &str,
        key: &str,
    ) -> Result<(), PublishError> {
        let notification = Notification::single(event_name, bucket, key);
        let body = serde_json::to_string(&notification)?;
        self.topic.publish(TopicMessage::new(body));
        Ok(())
    }

    /// Publish a full notification envelope into the topic
    pub fn publish_notification(&self, notification: &Notification) -> Result<(), PublishError> {
        let body = serde_json::to_string(notification)?;
        self.topic.publish(TopicMessage::new(body));
        Ok(())
    }

    /// Publish a metadata update instruction tagged with `metadata_type`
    pub fn publish_metadata_update(
        &self,
        id: &str,
        metadata_type: &str,
        value: &str,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_string(&MetadataUpdate {
            id: id.to_string(),
            value: value.to_string(),
        })?;
        self.topic.publish(
            TopicMessage::new(body).with_attribute(METADATA_TYPE_ATTRIBUTE, metadata_type),
        );
        Ok(())
    }

    /// The notification topic, for routing inspection
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Stop all worker tasks
    pub fn shutdown(self) {
        info!("Shutting down pipeline");
        for handle in self.handles {
            handle.abort();
        }
    }
}

/// Drain the change stream into batches for the confirmation handler
async fn run_stream_worker(
    mut stream_rx: broadcast::Receiver<ChangeRecord>,
    confirmation: ConfirmationHandler,
    batch_size: usize,
    batch_window: std::time::Duration,
) {
    loop {
        let first = match stream_rx.recv().await {
            Ok(record) => record,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed = missed, "Change stream lagged, records skipped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let mut batch = vec![first];
        let deadline = Instant::now() + batch_window;
        while batch.len() < batch_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, stream_rx.recv()).await {
                Ok(Ok(record)) => batch.push(record),
                Ok(Err(broadcast::error::RecvError::Lagged(missed))) => {
                    warn!(missed = missed, "Change stream lagged, records skipped");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
            }
        }

        confirmation.handle_batch(&batch).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MailConfig, QueueConfig, ServiceConfig, TableConfig};
    use crate::mailer::{
        MailError, OutboundMail, CONFIRMATION_SUBJECT, REJECTION_SUBJECT,
    };
    use crate::table::{MetadataTable, VALID_STATUS};
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingMailer {
        mails: Mutex<Vec<OutboundMail>>,
    }

    impl RecordingMailer {
        fn new() -> Self {
            Self {
                mails: Mutex::new(Vec::new()),
            }
        }

        fn mails(&self) -> Vec<OutboundMail> {
            self.mails.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl crate::mailer::Mailer for RecordingMailer {
        async fn send(&self, mail: &OutboundMail) -> Result<(), MailError> {
            self.mails.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    fn test_config() -> Config {
        Config {
            service: ServiceConfig::default(),
            table: TableConfig {
                stream_batch_window_ms: 10,
                ..TableConfig::default()
            },
            queue: QueueConfig {
                batch_window_ms: 10,
                dlq_batch_window_ms: 10,
                ..QueueConfig::default()
            },
            mail: MailConfig {
                from_address: "album@example.com".to_string(),
                to_address: "user@example.com".to_string(),
                region: "eu-west-1".to_string(),
            },
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            if Instant::now() >= deadline {
                panic!("condition not met within timeout");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_end_to_end_upload_confirmation() {
        let table = Arc::new(InMemoryTable::new("Images"));
        let mailer = Arc::new(RecordingMailer::new());
        let pipeline = Pipeline::start(&test_config(), table.clone(), mailer.clone()).unwrap();

        pipeline
            .publish_object_event(OBJECT_CREATED_PUT, "images", "beach.jpg")
            .unwrap();

        wait_until(|| !mailer.mails().is_empty()).await;

        let record = table.get_image("beach.jpg").await.unwrap().unwrap();
        assert_eq!(record.status, VALID_STATUS);
        assert_eq!(record.bucket_name, "images");

        let mails = mailer.mails();
        assert_eq!(mails.len(), 1);
        assert_eq!(mails[0].subject, CONFIRMATION_SUBJECT);
        assert!(mails[0].html_body.contains("beach.jpg"));
        assert!(mails[0].html_body.contains("images"));

        pipeline.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_extension_is_rejected_after_redelivery() {
        let table = Arc::new(InMemoryTable::new("Images"));
        let mailer = Arc::new(RecordingMailer::new());
        let pipeline = Pipeline::start(&test_config(), table.clone(), mailer.clone()).unwrap();

        pipeline
            .publish_object_event(OBJECT_CREATED_PUT, "images", "photo.gif")
            .unwrap();

        wait_until(|| {
            mailer
                .mails()
                .iter()
                .any(|mail| mail.subject == REJECTION_SUBJECT)
        })
        .await;

        // Exhausted redelivery produces exactly one rejection and no record.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mails = mailer.mails();
        assert_eq!(mails.len(), 1);
        assert!(mails[0].html_body.contains("photo.gif"));
        assert!(table.get_image("photo.gif").await.unwrap().is_none());

        pipeline.shutdown();
    }

    #[tokio::test]
    async fn test_object_removed_deletes_record() {
        let table = Arc::new(InMemoryTable::new("Images"));
        let mailer = Arc::new(RecordingMailer::new());
        let pipeline = Pipeline::start(&test_config(), table.clone(), mailer.clone()).unwrap();

        pipeline
            .publish_object_event(OBJECT_CREATED_PUT, "images", "beach.jpg")
            .unwrap();
        wait_until(|| !mailer.mails().is_empty()).await;

        pipeline
            .publish_object_event(OBJECT_REMOVED_DELETE, "images", "beach.jpg")
            .unwrap();

        let table_for_wait = table.clone();
        wait_until(move || {
            let table = table_for_wait.clone();
            futures::executor::block_on(async move {
                table.get_image("beach.jpg").await.unwrap().is_none()
            })
        })
        .await;

        // Removal never produces a second confirmation.
        assert_eq!(mailer.mails().len(), 1);

        pipeline.shutdown();
    }

    #[tokio::test]
    async fn test_metadata_update_path() {
        let table = Arc::new(InMemoryTable::new("Images"));
        let mailer = Arc::new(RecordingMailer::new());
        let pipeline = Pipeline::start(&test_config(), table.clone(), mailer.clone()).unwrap();

        pipeline
            .publish_object_event(OBJECT_CREATED_PUT, "images", "beach.jpg")
            .unwrap();
        wait_until(|| !mailer.mails().is_empty()).await;

        pipeline
            .publish_metadata_update("beach.jpg", "Photographer", "A. Smith")
            .unwrap();

        let table_for_wait = table.clone();
        wait_until(move || {
            let table = table_for_wait.clone();
            futures::executor::block_on(async move {
                table
                    .get_image("beach.jpg")
                    .await
                    .unwrap()
                    .and_then(|record| record.photographer)
                    .is_some()
            })
        })
        .await;

        let record = table.get_image("beach.jpg").await.unwrap().unwrap();
        assert_eq!(record.photographer.as_deref(), Some("A. Smith"));
        assert!(record.caption.is_none());

        pipeline.shutdown();
    }

    #[tokio::test]
    async fn test_disallowed_tag_is_filtered_before_the_handler() {
        let table = Arc::new(InMemoryTable::new("Images"));
        let mailer = Arc::new(RecordingMailer::new());
        let pipeline = Pipeline::start(&test_config(), table.clone(), mailer.clone()).unwrap();

        pipeline
            .publish_object_event(OBJECT_CREATED_PUT, "images", "beach.jpg")
            .unwrap();
        wait_until(|| !mailer.mails().is_empty()).await;

        pipeline
            .publish_metadata_update("beach.jpg", "Owner", "me")
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let record = table.get_image("beach.jpg").await.unwrap().unwrap();
        assert!(record.photographer.is_none());
        assert!(record.caption.is_none());
        assert!(record.date.is_none());

        pipeline.shutdown();
    }

    #[tokio::test]
    async fn test_replayed_upload_is_idempotent() {
        let table = Arc::new(InMemoryTable::new("Images"));
        let mailer = Arc::new(RecordingMailer::new());
        let pipeline = Pipeline::start(&test_config(), table.clone(), mailer.clone()).unwrap();

        pipeline
            .publish_object_event(OBJECT_CREATED_PUT, "images", "beach.jpg")
            .unwrap();
        wait_until(|| !mailer.mails().is_empty()).await;

        pipeline
            .publish_object_event(OBJECT_CREATED_PUT, "images", "beach.jpg")
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let record = table.get_image("beach.jpg").await.unwrap().unwrap();
        assert_eq!(record.status, VALID_STATUS);
        // The replay only modifies the record, so no second confirmation.
        assert_eq!(mailer.mails().len(), 1);

        pipeline.shutdown();
    }

    #[tokio::test]
    async fn test_missing_mail_config_fails_startup() {
        let mut config = test_config();
        config.mail.from_address.clear();

        let table = Arc::new(InMemoryTable::new("Images"));
        let mailer = Arc::new(RecordingMailer::new());
        let result = Pipeline::start(&config, table, mailer);
        assert!(matches!(result, Err(ConfigError::MissingRequired(_))));
    }
}
