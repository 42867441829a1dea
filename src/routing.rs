//! Notification topic: filtered fan-out of event envelopes to subscribers.
//!
//! Routing is split in two layers so it stays testable without any transport:
//! [`FilterPolicy::matches`] and [`Topic::matching_subscribers`] are pure
//! functions of a message, while [`Topic::publish`] performs the actual
//! per-subscriber delivery over channels.

use crate::events::Notification;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A message published to the notification topic
#[derive(Debug, Clone)]
pub struct TopicMessage {
    /// JSON-encoded message body
    pub body: String,
    /// Side-channel message attributes
    pub attributes: HashMap<String, String>,
}

impl TopicMessage {
    /// Create a message with an empty attribute set
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attributes: HashMap::new(),
        }
    }

    /// Attach a message attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Filter predicate attached to a subscription.
///
/// Exactly one policy is evaluated per subscriber; policies are independent,
/// so a message may match any number of subscribers.
#[derive(Debug, Clone)]
pub enum FilterPolicy {
    /// Structural filter on the `eventName` of the records in the body
    Body { event_names: Vec<String> },
    /// Filter on a side-channel message attribute
    Attribute { key: String, allowlist: Vec<String> },
}

impl FilterPolicy {
    /// Evaluate this policy against a message
    pub fn matches(&self, message: &TopicMessage) -> bool {
        match self {
            FilterPolicy::Body { event_names } => {
                let notification: Notification = match serde_json::from_str(&message.body) {
                    Ok(n) => n,
                    Err(_) => return false,
                };
                notification
                    .records
                    .unwrap_or_default()
                    .iter()
                    .any(|record| event_names.iter().any(|name| name == &record.event_name))
            }
            FilterPolicy::Attribute { key, allowlist } => message
                .attributes
                .get(key)
                .map(|value| allowlist.iter().any(|allowed| allowed == value))
                .unwrap_or(false),
        }
    }
}

struct Subscription {
    subscriber: String,
    policy: FilterPolicy,
    sender: mpsc::UnboundedSender<TopicMessage>,
}

/// In-process notification topic with per-subscriber filter policies
pub struct Topic {
    name: String,
    subscriptions: Vec<Subscription>,
}

impl Topic {
    /// Create an empty topic
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscriptions: Vec::new(),
        }
    }

    /// Topic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a subscriber behind a filter policy, returning its delivery
    /// channel
    pub fn subscribe(
        &mut self,
        subscriber: impl Into<String>,
        policy: FilterPolicy,
    ) -> mpsc::UnboundedReceiver<TopicMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions.push(Subscription {
            subscriber: subscriber.into(),
            policy,
            sender: tx,
        });
        rx
    }

    /// Pure routing decision: the subscribers whose policies match a message
    pub fn matching_subscribers(&self, message: &TopicMessage) -> Vec<&str> {
        self.subscriptions
            .iter()
            .filter(|s| s.policy.matches(message))
            .map(|s| s.subscriber.as_str())
            .collect()
    }

    /// Deliver a copy of the message to every matching subscriber.
    ///
    /// Deliveries are independent: a closed subscriber channel is logged and
    /// does not affect delivery to the others.
    pub fn publish(&self, message: TopicMessage) {
        metrics::counter!("album.topic.published").increment(1);

        for subscription in &self.subscriptions {
            if !subscription.policy.matches(&message) {
                debug!(
                    topic = %self.name,
                    subscriber = %subscription.subscriber,
                    "Message filtered out for subscriber"
                );
                continue;
            }

            if subscription.sender.send(message.clone()).is_err() {
                warn!(
                    topic = %self.name,
                    subscriber = %subscription.subscriber,
                    "Subscriber channel closed, dropping delivery"
                );
                metrics::counter!("album.topic.dropped").increment(1);
            } else {
                metrics::counter!("album.topic.delivered").increment(1);
            }
        }
    }
}
