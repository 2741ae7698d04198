//! Subscription registry
//!
//! Tracks topic → {handler, confirmation state}. The topic doubles as the
//! correlation key for broker acknowledgements. Each entry records which
//! request is in flight (`PendingOperation`) so an acknowledgement is never
//! interpreted by guessing from prior state.
//!
//! All methods are synchronous and side-effect free apart from the map
//! itself; the session manager performs broker I/O and event emission.

use super::router::InboundMessage;
use super::topic::{is_wildcard, topic_matches, validate_topic_filter};
use crate::error::{ClientError, ClientResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Callback invoked for every message routed to a subscription
pub type MessageCallback = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Confirmation state of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Pending,
    Confirmed,
    /// Terminal; only ever reported for an entry that has been removed
    Failed,
}

/// Broker request currently awaiting acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOperation {
    Subscribing,
    Unsubscribing,
}

/// Intent to receive messages on a topic
#[derive(Clone)]
pub struct Subscription {
    pub topic: String,
    pub handler: MessageCallback,
    pub state: SubscriptionState,
    pub pending: Option<PendingOperation>,
    pub deadline: Option<Instant>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("state", &self.state)
            .field("pending", &self.pending)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Outcome of applying a broker acknowledgement or error to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Pending subscribe acknowledged; entry is now Confirmed
    Subscribed { topic: String },
    /// Pending unsubscribe acknowledged; entry removed
    Unsubscribed { topic: String },
    /// Subscribe rejected; entry removed (state Failed)
    SubscribeFailed { topic: String },
    /// Unsubscribe rejected; entry reverted to Confirmed
    UnsubscribeFailed { topic: String },
    /// No entry awaits this correlation key; nothing changed
    Unmatched { correlation_key: String },
}

/// Topic → subscription map, exclusively owned by the session manager
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<String, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscription in Pending/Subscribing state
    ///
    /// A live entry for the same topic rejects the request with
    /// `AlreadySubscribed`, leaving the existing entry untouched. Without a
    /// deadline the request waits for the broker indefinitely.
    pub fn begin_subscribe(
        &mut self,
        topic: &str,
        handler: MessageCallback,
        deadline: Option<Instant>,
    ) -> ClientResult<()> {
        validate_topic_filter(topic).map_err(|reason| ClientError::invalid_topic(topic, reason))?;

        if self.subscriptions.contains_key(topic) {
            return Err(ClientError::already_subscribed(topic));
        }

        self.subscriptions.insert(
            topic.to_string(),
            Subscription {
                topic: topic.to_string(),
                handler,
                state: SubscriptionState::Pending,
                pending: Some(PendingOperation::Subscribing),
                deadline,
            },
        );
        Ok(())
    }

    /// Mark a confirmed subscription as pending removal
    pub fn begin_unsubscribe(
        &mut self,
        topic: &str,
        deadline: Option<Instant>,
    ) -> ClientResult<()> {
        let subscription = self
            .subscriptions
            .get_mut(topic)
            .ok_or_else(|| ClientError::not_subscribed(topic))?;

        if subscription.pending.is_some() {
            return Err(ClientError::operation_pending(topic));
        }

        subscription.pending = Some(PendingOperation::Unsubscribing);
        subscription.deadline = deadline;
        Ok(())
    }

    /// Apply an acknowledgement correlated to `correlation_key`
    pub fn confirm(&mut self, correlation_key: &str) -> Resolution {
        let pending = self
            .subscriptions
            .get(correlation_key)
            .and_then(|subscription| subscription.pending);

        match pending {
            Some(PendingOperation::Subscribing) => {
                if let Some(subscription) = self.subscriptions.get_mut(correlation_key) {
                    subscription.state = SubscriptionState::Confirmed;
                    subscription.pending = None;
                    subscription.deadline = None;
                }
                Resolution::Subscribed {
                    topic: correlation_key.to_string(),
                }
            }
            Some(PendingOperation::Unsubscribing) => {
                self.subscriptions.remove(correlation_key);
                Resolution::Unsubscribed {
                    topic: correlation_key.to_string(),
                }
            }
            None => Resolution::Unmatched {
                correlation_key: correlation_key.to_string(),
            },
        }
    }

    /// Apply a broker error (or an expired deadline) for `correlation_key`
    pub fn reject(&mut self, correlation_key: &str) -> Resolution {
        let pending = self
            .subscriptions
            .get(correlation_key)
            .and_then(|subscription| subscription.pending);

        match pending {
            Some(PendingOperation::Subscribing) => {
                self.subscriptions.remove(correlation_key);
                Resolution::SubscribeFailed {
                    topic: correlation_key.to_string(),
                }
            }
            Some(PendingOperation::Unsubscribing) => {
                if let Some(subscription) = self.subscriptions.get_mut(correlation_key) {
                    subscription.pending = None;
                    subscription.deadline = None;
                }
                Resolution::UnsubscribeFailed {
                    topic: correlation_key.to_string(),
                }
            }
            None => Resolution::Unmatched {
                correlation_key: correlation_key.to_string(),
            },
        }
    }

    /// Topics whose pending request deadline is at or before `now`
    pub fn expired(&self, now: Instant) -> Vec<String> {
        let mut topics: Vec<String> = self
            .subscriptions
            .values()
            .filter(|subscription| {
                subscription.pending.is_some()
                    && subscription.deadline.is_some_and(|deadline| deadline <= now)
            })
            .map(|subscription| subscription.topic.clone())
            .collect();
        topics.sort();
        topics
    }

    /// Earliest outstanding request deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.subscriptions
            .values()
            .filter(|subscription| subscription.pending.is_some())
            .filter_map(|subscription| subscription.deadline)
            .min()
    }

    /// Handler for a destination topic: exact entry first, then the first
    /// wildcard filter (in topic order) that matches
    pub fn handler_for(&self, destination: &str) -> Option<(&str, &MessageCallback)> {
        if let Some(subscription) = self.subscriptions.get(destination) {
            return Some((subscription.topic.as_str(), &subscription.handler));
        }

        let mut filters: Vec<&Subscription> = self
            .subscriptions
            .values()
            .filter(|subscription| is_wildcard(&subscription.topic))
            .filter(|subscription| topic_matches(&subscription.topic, destination))
            .collect();
        filters.sort_by(|a, b| a.topic.cmp(&b.topic));

        filters
            .first()
            .map(|subscription| (subscription.topic.as_str(), &subscription.handler))
    }

    pub fn state(&self, topic: &str) -> Option<SubscriptionState> {
        self.subscriptions.get(topic).map(|s| s.state)
    }

    pub fn pending_operation(&self, topic: &str) -> Option<PendingOperation> {
        self.subscriptions.get(topic).and_then(|s| s.pending)
    }

    pub fn get(&self, topic: &str) -> Option<&Subscription> {
        self.subscriptions.get(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.subscriptions.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Discard every entry without notifying handlers; returns how many
    /// were dropped
    pub fn clear(&mut self) -> usize {
        let count = self.subscriptions.len();
        self.subscriptions.clear();
        count
    }
}
