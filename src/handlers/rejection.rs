//! Rejection handler: mails the uploader when a message exhausted its
//! redelivery attempts and landed in the dead-letter queue.

use crate::config::MailConfig;
use crate::events::{decode_object_key, Notification, RelayedMessage};
use crate::mailer::{rejection_mail, Mailer};
use crate::queue::{BatchHandler, QueueMessage};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Handler for dead-lettered queue messages
pub struct RejectionHandler {
    mailer: Arc<dyn Mailer>,
    mail: MailConfig,
}

impl RejectionHandler {
    pub fn new(mailer: Arc<dyn Mailer>, mail: MailConfig) -> Self {
        Self { mailer, mail }
    }

    /// Best-effort extraction of the originating object events from a
    /// dead-lettered body
    fn extract_events(body: &str) -> Option<Notification> {
        let relayed: RelayedMessage = serde_json::from_str(body).ok()?;
        serde_json::from_str(&relayed.message).ok()
    }

    async fn process_message(&self, message: &QueueMessage) {
        let Some(notification) = Self::extract_events(&message.body) else {
            warn!(
                message_id = %message.message_id,
                "Unreadable dead-lettered message, skipping"
            );
            return;
        };

        for record in notification.records.unwrap_or_default() {
            let bucket = &record.s3.bucket.name;
            let key = match decode_object_key(&record.s3.object.key) {
                Ok(key) => key,
                Err(_) => record.s3.object.key.clone(),
            };

            let mail = rejection_mail(&self.mail, &key, bucket);
            match self.mailer.send(&mail).await {
                Ok(()) => {
                    info!(bucket = %bucket, key = %key, "Rejection mail sent");
                    metrics::counter!("album.rejection.sent").increment(1);
                }
                Err(e) => {
                    error!(bucket = %bucket, key = %key, error = %e, "Failed to send rejection mail");
                    metrics::counter!("album.rejection.failed").increment(1);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl BatchHandler for RejectionHandler {
    /// Per-record policy: every failure is caught and logged, so dead-lettered
    /// messages are never redelivered again.
    async fn handle(&self, batch: &[QueueMessage]) -> anyhow::Result<()> {
        for message in batch {
            self.process_message(message).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::OBJECT_CREATED_PUT;
    use crate::mailer::{MockMailer, REJECTION_SUBJECT};
    use uuid::Uuid;

    fn mail_config() -> MailConfig {
        MailConfig {
            from_address: "album@example.com".to_string(),
            to_address: "user@example.com".to_string(),
            region: "eu-west-1".to_string(),
        }
    }

    fn dead_letter(key: &str) -> QueueMessage {
        let notification = Notification::single(OBJECT_CREATED_PUT, "images", key);
        let relayed = RelayedMessage {
            message: serde_json::to_string(&notification).unwrap(),
        };
        QueueMessage {
            message_id: Uuid::new_v4(),
            body: serde_json::to_string(&relayed).unwrap(),
            receive_count: 1,
        }
    }

    #[tokio::test]
    async fn test_dead_letter_produces_rejection_mail() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .withf(|mail| mail.subject == REJECTION_SUBJECT && mail.html_body.contains("photo.gif"))
            .times(1)
            .returning(|_| Ok(()));

        let handler = RejectionHandler::new(Arc::new(mailer), mail_config());
        handler.handle(&[dead_letter("photo.gif")]).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreadable_body_is_skipped() {
        let mut mailer = MockMailer::new();
        mailer.expect_send().times(0);

        let handler = RejectionHandler::new(Arc::new(mailer), mail_config());
        let message = QueueMessage {
            message_id: Uuid::new_v4(),
            body: "not json".to_string(),
            receive_count: 1,
        };
        handler.handle(&[message]).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_failure_never_fails_the_batch() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .times(2)
            .returning(|_| Err(crate::mailer::MailError::SendFailed("down".to_string())));

        let handler = RejectionHandler::new(Arc::new(mailer), mail_config());
        handler
            .handle(&[dead_letter("a.gif"), dead_letter("b.gif")])
            .await
            .unwrap();
    }
}
