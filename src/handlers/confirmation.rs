//! Confirmation handler: mails the uploader when a new record lands in the
//! metadata table.

use crate::config::MailConfig;
use crate::mailer::{confirmation_mail, Mailer};
use crate::table::{ChangeEvent, ChangeRecord};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Handler for change-stream batches from the metadata table
pub struct ConfirmationHandler {
    mailer: Arc<dyn Mailer>,
    mail: MailConfig,
}

impl ConfirmationHandler {
    pub fn new(mailer: Arc<dyn Mailer>, mail: MailConfig) -> Self {
        Self { mailer, mail }
    }

    /// Process a batch of change records.
    ///
    /// Only inserts produce mail. A record missing its row image is skipped
    /// with a warning, and a failed send is logged without blocking the rest
    /// of the batch.
    pub async fn handle_batch(&self, batch: &[ChangeRecord]) {
        for record in batch {
            if record.event != ChangeEvent::Insert {
                debug!(
                    file_name = %record.file_name,
                    event = ?record.event,
                    "Skipping non-insert change record"
                );
                continue;
            }

            let Some(image) = &record.new_image else {
                warn!(file_name = %record.file_name, "Insert record without row image, skipping");
                continue;
            };
            if image.file_name.is_empty() || image.bucket_name.is_empty() {
                warn!(file_name = %record.file_name, "Missing required attributes in change record, skipping");
                continue;
            }

            let mail = confirmation_mail(&self.mail, &image.file_name, &image.bucket_name);
            match self.mailer.send(&mail).await {
                Ok(()) => {
                    info!(
                        file_name = %image.file_name,
                        bucket = %image.bucket_name,
                        "Confirmation mail sent"
                    );
                    metrics::counter!("album.confirmation.sent").increment(1);
                }
                Err(e) => {
                    // Per-record policy: one failing record must not block
                    // the others in the batch.
                    error!(
                        file_name = %image.file_name,
                        error = %e,
                        "Failed to send confirmation mail"
                    );
                    metrics::counter!("album.confirmation.failed").increment(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::{MailError, MockMailer, CONFIRMATION_SUBJECT};
    use crate::table::ImageRecord;

    fn mail_config() -> MailConfig {
        MailConfig {
            from_address: "album@example.com".to_string(),
            to_address: "user@example.com".to_string(),
            region: "eu-west-1".to_string(),
        }
    }

    fn insert_record(file_name: &str, bucket: &str) -> ChangeRecord {
        ChangeRecord {
            event: ChangeEvent::Insert,
            file_name: file_name.to_string(),
            new_image: Some(ImageRecord::valid(file_name, bucket)),
        }
    }

    #[tokio::test]
    async fn test_insert_sends_exactly_one_confirmation() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .withf(|mail| {
                mail.subject == CONFIRMATION_SUBJECT
                    && mail.html_body.contains("beach.jpg")
                    && mail.html_body.contains("images")
            })
            .times(1)
            .returning(|_| Ok(()));

        let handler = ConfirmationHandler::new(Arc::new(mailer), mail_config());
        handler.handle_batch(&[insert_record("beach.jpg", "images")]).await;
    }

    #[tokio::test]
    async fn test_modify_and_remove_send_nothing() {
        let mut mailer = MockMailer::new();
        mailer.expect_send().times(0);

        let handler = ConfirmationHandler::new(Arc::new(mailer), mail_config());
        handler
            .handle_batch(&[
                ChangeRecord {
                    event: ChangeEvent::Modify,
                    file_name: "beach.jpg".to_string(),
                    new_image: Some(ImageRecord::valid("beach.jpg", "images")),
                },
                ChangeRecord {
                    event: ChangeEvent::Remove,
                    file_name: "beach.jpg".to_string(),
                    new_image: None,
                },
            ])
            .await;
    }

    #[tokio::test]
    async fn test_missing_row_image_is_skipped_without_failing() {
        let mut mailer = MockMailer::new();
        mailer.expect_send().times(0);

        let handler = ConfirmationHandler::new(Arc::new(mailer), mail_config());
        handler
            .handle_batch(&[ChangeRecord {
                event: ChangeEvent::Insert,
                file_name: "beach.jpg".to_string(),
                new_image: None,
            }])
            .await;
    }

    #[tokio::test]
    async fn test_send_failure_does_not_block_rest_of_batch() {
        let mut mailer = MockMailer::new();
        let mut seq = mockall::Sequence::new();
        mailer
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(MailError::SendFailed("boom".to_string())));
        mailer
            .expect_send()
            .withf(|mail| mail.html_body.contains("second.png"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let handler = ConfirmationHandler::new(Arc::new(mailer), mail_config());
        handler
            .handle_batch(&[
                insert_record("first.jpg", "images"),
                insert_record("second.png", "images"),
            ])
            .await;
    }
}
