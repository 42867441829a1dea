//! Durable processing queue with bounded redelivery and dead-lettering.
//!
//! Models the at-least-once buffer between the notification topic and the
//! ingestion handler: messages are delivered in batches, a failed batch is
//! redelivered in full, and a message that exhausts its receive attempts is
//! moved to the dead-letter queue instead of being retried again.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Errors that can occur when enqueueing messages
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue {0} is closed")]
    Closed(String),
}

/// A message buffered in a durable queue
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Stable message ID, preserved across redeliveries
    pub message_id: Uuid,
    /// JSON-encoded message body
    pub body: String,
    /// Delivery attempt number, starting at 1
    pub receive_count: u32,
}

/// Handler invoked with each delivered batch.
///
/// An error fails the entire batch: every message in it is redelivered (or
/// dead-lettered once its attempts are exhausted). Handlers that want
/// per-record error handling must catch internally and return `Ok`.
#[async_trait::async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, batch: &[QueueMessage]) -> anyhow::Result<()>;
}

/// Sending half of a durable queue
#[derive(Clone)]
pub struct DurableQueue {
    name: String,
    tx: mpsc::UnboundedSender<QueueMessage>,
}

impl DurableQueue {
    /// Create a queue, returning the sending half and its receiver
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<QueueMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { name: name.into(), tx }, rx)
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a fresh message
    pub fn enqueue(&self, body: impl Into<String>) -> Result<(), QueueError> {
        self.send(QueueMessage {
            message_id: Uuid::new_v4(),
            body: body.into(),
            receive_count: 1,
        })
    }

    fn send(&self, message: QueueMessage) -> Result<(), QueueError> {
        self.tx
            .send(message)
            .map_err(|_| QueueError::Closed(self.name.clone()))
    }
}

/// Delivery settings for a queue consumer
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    /// Maximum messages per delivered batch
    pub batch_size: usize,
    /// Maximum wait for a batch to fill once the first message arrives
    pub batch_window: Duration,
    /// Receive attempts before a message is dead-lettered
    pub max_receive_count: u32,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_window: Duration::from_millis(100),
            max_receive_count: 5,
        }
    }
}

/// Consumer that drains a durable queue into batches for a [`BatchHandler`]
pub struct QueueConsumer {
    queue: DurableQueue,
    rx: mpsc::UnboundedReceiver<QueueMessage>,
    dead_letter: Option<DurableQueue>,
    options: DeliveryOptions,
}

impl QueueConsumer {
    /// Create a consumer over a queue's receiver.
    ///
    /// `queue` must be the sending half of the same queue so failed messages
    /// can be redelivered; `dead_letter`, when present, receives messages
    /// whose attempts are exhausted.
    pub fn new(
        queue: DurableQueue,
        rx: mpsc::UnboundedReceiver<QueueMessage>,
        dead_letter: Option<DurableQueue>,
        options: DeliveryOptions,
    ) -> Self {
        Self {
            queue,
            rx,
            dead_letter,
            options,
        }
    }

    /// Consume batches until the queue closes
    pub async fn run<H: BatchHandler + ?Sized>(mut self, handler: Arc<H>) {
        info!(queue = %self.queue.name(), "Starting queue consumer");

        while let Some(first) = self.rx.recv().await {
            let batch = self.collect_batch(first).await;

            debug!(
                queue = %self.queue.name(),
                batch_len = batch.len(),
                "Delivering batch"
            );

            match handler.handle(&batch).await {
                Ok(()) => {
                    metrics::counter!("album.queue.processed").increment(batch.len() as u64);
                }
                Err(e) => {
                    error!(
                        queue = %self.queue.name(),
                        error = %e,
                        batch_len = batch.len(),
                        "Batch processing failed"
                    );
                    metrics::counter!("album.queue.failed").increment(batch.len() as u64);

                    // All-or-nothing policy: the whole batch goes back.
                    for message in batch {
                        self.redeliver_or_dead_letter(message);
                    }
                }
            }
        }

        info!(queue = %self.queue.name(), "Queue consumer stopped");
    }

    /// Collect a batch starting from an already received message
    async fn collect_batch(&mut self, first: QueueMessage) -> Vec<QueueMessage> {
        let mut batch = vec![first];
        let deadline = Instant::now() + self.options.batch_window;

        while batch.len() < self.options.batch_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.rx.recv()).await {
                Ok(Some(message)) => batch.push(message),
                Ok(None) | Err(_) => break,
            }
        }

        batch
    }

    fn redeliver_or_dead_letter(&self, message: QueueMessage) {
        if message.receive_count >= self.options.max_receive_count {
            match &self.dead_letter {
                Some(dlq) => {
                    warn!(
                        queue = %self.queue.name(),
                        message_id = %message.message_id,
                        attempts = message.receive_count,
                        "Receive attempts exhausted, dead-lettering message"
                    );
                    metrics::counter!("album.queue.dead_lettered").increment(1);
                    if dlq
                        .send(QueueMessage {
                            receive_count: 1,
                            ..message
                        })
                        .is_err()
                    {
                        error!(queue = %self.queue.name(), "Dead-letter queue closed, message lost");
                    }
                }
                None => {
                    error!(
                        queue = %self.queue.name(),
                        message_id = %message.message_id,
                        attempts = message.receive_count,
                        "Receive attempts exhausted and no dead-letter queue, dropping message"
                    );
                }
            }
        } else {
            metrics::counter!("album.queue.redelivered").increment(1);
            let next = QueueMessage {
                receive_count: message.receive_count + 1,
                ..message
            };
            if self.queue.send(next).is_err() {
                warn!(queue = %self.queue.name(), "Queue closed, dropping redelivery");
            }
        }
    }
}
