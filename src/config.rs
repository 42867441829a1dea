//! Configuration for the album pipeline service.
//!
//! Configuration is layered: optional config files, then environment
//! variables with the `ALBUM` prefix (`ALBUM__MAIL__FROM_ADDRESS` maps to
//! `mail.from_address`). The mail settings are required; a missing one fails
//! startup before any event is processed.

use crate::queue::DeliveryOptions;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    LoadError(String),
}

/// Main configuration for the pipeline service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Metadata table configuration
    #[serde(default)]
    pub table: TableConfig,
    /// Processing queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
    /// Outbound mail configuration (required)
    #[serde(default)]
    pub mail: MailConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Metadata table configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    /// Table name
    #[serde(default = "default_table_name")]
    pub name: String,
    /// Change-stream batch size for the confirmation handler
    #[serde(default = "default_stream_batch_size")]
    pub stream_batch_size: usize,
    /// Change-stream batch window in milliseconds
    #[serde(default = "default_stream_batch_window_ms")]
    pub stream_batch_window_ms: u64,
}

/// Processing queue and dead-letter queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Receive attempts before a message is dead-lettered
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
    /// Maximum messages per ingestion batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Ingestion batch window in milliseconds
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,
    /// Maximum messages per dead-letter batch
    #[serde(default = "default_dlq_batch_size")]
    pub dlq_batch_size: usize,
    /// Dead-letter batch window in milliseconds
    #[serde(default = "default_dlq_batch_window_ms")]
    pub dlq_batch_window_ms: u64,
}

/// Outbound mail configuration.
///
/// All three fields are required; empty values are rejected at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailConfig {
    /// Sender address
    #[serde(default)]
    pub from_address: String,
    /// Recipient address
    #[serde(default)]
    pub to_address: String,
    /// Mail-service region
    #[serde(default)]
    pub region: String,
}

// Default value functions
fn default_service_name() -> String {
    "album-pipeline".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_table_name() -> String {
    "Images".to_string()
}

fn default_stream_batch_size() -> usize {
    5
}

fn default_stream_batch_window_ms() -> u64 {
    100
}

fn default_max_receive_count() -> u32 {
    5
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_window_ms() -> u64 {
    100
}

fn default_dlq_batch_size() -> usize {
    10
}

fn default_dlq_batch_window_ms() -> u64 {
    5000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: default_table_name(),
            stream_batch_size: default_stream_batch_size(),
            stream_batch_window_ms: default_stream_batch_window_ms(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_receive_count: default_max_receive_count(),
            batch_size: default_batch_size(),
            batch_window_ms: default_batch_window_ms(),
            dlq_batch_size: default_dlq_batch_size(),
            dlq_batch_window_ms: default_dlq_batch_window_ms(),
        }
    }
}

impl Config {
    /// Load configuration from config files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/album").required(false))
            .add_source(config::File::with_name("/etc/album/pipeline").required(false))
            .add_source(
                config::Environment::with_prefix("ALBUM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;

        let loaded: Config = settings
            .try_deserialize()
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Validate required settings; called before any event is processed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mail.from_address.is_empty() {
            return Err(ConfigError::MissingRequired("mail.from_address".to_string()));
        }
        if self.mail.to_address.is_empty() {
            return Err(ConfigError::MissingRequired("mail.to_address".to_string()));
        }
        if self.mail.region.is_empty() {
            return Err(ConfigError::MissingRequired("mail.region".to_string()));
        }
        if self.queue.max_receive_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue.max_receive_count".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.queue.batch_size == 0 || self.queue.dlq_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue.batch_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Delivery options for the processing queue consumer
    pub fn queue_delivery_options(&self) -> DeliveryOptions {
        DeliveryOptions {
            batch_size: self.queue.batch_size,
            batch_window: Duration::from_millis(self.queue.batch_window_ms),
            max_receive_count: self.queue.max_receive_count,
        }
    }

    /// Delivery options for the dead-letter queue consumer
    pub fn dlq_delivery_options(&self) -> DeliveryOptions {
        DeliveryOptions {
            batch_size: self.queue.dlq_batch_size,
            batch_window: Duration::from_millis(self.queue.dlq_batch_window_ms),
            max_receive_count: 1,
        }
    }

    /// Change-stream batch window as a Duration
    pub fn stream_batch_window(&self) -> Duration {
        Duration::from_millis(self.table.stream_batch_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_mail() -> Config {
        Config {
            service: ServiceConfig::default(),
            table: TableConfig::default(),
            queue: QueueConfig::default(),
            mail: MailConfig {
                from_address: "album@example.com".to_string(),
                to_address: "user@example.com".to_string(),
                region: "eu-west-1".to_string(),
            },
        }
    }

    #[test]
    fn test_defaults() {
        let config = config_with_mail();
        assert_eq!(config.table.name, "Images");
        assert_eq!(config.queue.max_receive_count, 5);
        assert_eq!(config.queue.dlq_batch_size, 10);
        assert_eq!(config.queue.dlq_batch_window_ms, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_mail_settings_are_fatal() {
        let mut config = config_with_mail();
        config.mail.to_address.clear();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(ref key) if key == "mail.to_address"));
    }

    #[test]
    fn test_zero_receive_count_rejected() {
        let mut config = config_with_mail();
        config.queue.max_receive_count = 0;
        assert!(config.validate().is_err());
    }
}
