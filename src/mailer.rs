//! Outbound mail seam for confirmation and rejection notifications.
//!
//! Handlers depend on the [`Mailer`] trait so tests can substitute a mock;
//! the production binary wires in [`LogMailer`], which records each send
//! through tracing and metrics.

use crate::config::MailConfig;
use thiserror::Error;
use tracing::info;

/// Subject used by the confirmation handler
pub const CONFIRMATION_SUBJECT: &str = "Image Upload Confirmation";

/// Subject used by the rejection handler
pub const REJECTION_SUBJECT: &str = "New image Upload";

/// Sender display name used in the mail template
pub const SENDER_NAME: &str = "The Photo Album";

/// Errors that can occur while sending mail
#[derive(Error, Debug)]
pub enum MailError {
    #[error("Failed to send mail: {0}")]
    SendFailed(String),
}

/// A composed outbound mail
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Details rendered into the fixed HTML template
#[derive(Debug, Clone)]
pub struct ContactDetails {
    pub name: String,
    pub email: String,
    pub message: String,
}

/// Render the fixed HTML template: sender identity followed by the free-text
/// message.
pub fn render_html(details: &ContactDetails) -> String {
    format!(
        r#"<html>
  <body>
    <h2>Sent from: </h2>
    <ul>
      <li style="font-size:18px">👤 <b>{}</b></li>
      <li style="font-size:18px">✉️ <b>{}</b></li>
    </ul>
    <p style="font-size:18px">{}</p>
  </body>
</html>"#,
        details.name, details.email, details.message
    )
}

/// Compose the confirmation mail for a successfully ingested upload
pub fn confirmation_mail(config: &MailConfig, file_name: &str, bucket_name: &str) -> OutboundMail {
    let details = ContactDetails {
        name: SENDER_NAME.to_string(),
        email: config.from_address.clone(),
        message: format!(
            "Your image \"{}\" has been successfully uploaded to the bucket \"{}\".",
            file_name, bucket_name
        ),
    };
    OutboundMail {
        from: config.from_address.clone(),
        to: config.to_address.clone(),
        subject: CONFIRMATION_SUBJECT.to_string(),
        html_body: render_html(&details),
    }
}

/// Compose the rejection mail for an upload that exhausted redelivery
pub fn rejection_mail(config: &MailConfig, file_name: &str, bucket_name: &str) -> OutboundMail {
    let details = ContactDetails {
        name: SENDER_NAME.to_string(),
        email: config.from_address.clone(),
        message: format!(
            "Your image \"{}\" uploaded to the bucket \"{}\" could not be processed and was rejected.",
            file_name, bucket_name
        ),
    };
    OutboundMail {
        from: config.from_address.clone(),
        to: config.to_address.clone(),
        subject: REJECTION_SUBJECT.to_string(),
        html_body: render_html(&details),
    }
}

/// Outbound mail service
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutboundMail) -> Result<(), MailError>;
}

/// Mailer that records sends through tracing instead of a real mail service
pub struct LogMailer {
    region: String,
}

impl LogMailer {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }
}

#[async_trait::async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutboundMail) -> Result<(), MailError> {
        info!(
            region = %self.region,
            from = %mail.from,
            to = %mail.to,
            subject = %mail.subject,
            "Mail sent"
        );
        metrics::counter!("album.mail.sent").increment(1);
        Ok(())
    }
}
