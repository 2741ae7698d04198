//! Lifecycle event stream for observers such as a dashboard
//!
//! Every event is broadcast to subscribers and written to the log. Emission
//! never blocks; a slow receiver lags and misses events instead of stalling
//! the session.

use super::registry::SubscriptionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Timestamped lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: LifecycleEventKind,
}

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEventKind {
    Connecting { host: String },
    Connected,
    ConnectFailed { reason: String },
    Disconnected,
    Subscribing { topic: String },
    Subscribed { topic: String },
    Unsubscribing { topic: String },
    Unsubscribed { topic: String },
    SubscriptionError {
        topic: String,
        reason: String,
        state: SubscriptionState,
    },
    Published { topic: String, bytes: usize },
    PublishFailed { topic: String, reason: String },
    MessageDropped { topic: String },
    Warning { message: String },
}

impl LifecycleEventKind {
    /// Short name used as the `event` tag
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEventKind::Connecting { .. } => "connecting",
            LifecycleEventKind::Connected => "connected",
            LifecycleEventKind::ConnectFailed { .. } => "connect_failed",
            LifecycleEventKind::Disconnected => "disconnected",
            LifecycleEventKind::Subscribing { .. } => "subscribing",
            LifecycleEventKind::Subscribed { .. } => "subscribed",
            LifecycleEventKind::Unsubscribing { .. } => "unsubscribing",
            LifecycleEventKind::Unsubscribed { .. } => "unsubscribed",
            LifecycleEventKind::SubscriptionError { .. } => "subscription_error",
            LifecycleEventKind::Published { .. } => "published",
            LifecycleEventKind::PublishFailed { .. } => "publish_failed",
            LifecycleEventKind::MessageDropped { .. } => "message_dropped",
            LifecycleEventKind::Warning { .. } => "warning",
        }
    }

    fn log(&self) {
        match self {
            LifecycleEventKind::Connecting { host } => info!(host = %host, "Connecting to broker"),
            LifecycleEventKind::Connected => {
                info!("=== Successfully connected and ready to subscribe ===")
            }
            LifecycleEventKind::ConnectFailed { reason } => {
                error!(reason = %reason, "Connection to the message broker failed")
            }
            LifecycleEventKind::Disconnected => info!("Disconnected"),
            LifecycleEventKind::Subscribing { topic } => info!(topic = %topic, "Subscribing"),
            LifecycleEventKind::Subscribed { topic } => {
                info!(topic = %topic, "Successfully subscribed")
            }
            LifecycleEventKind::Unsubscribing { topic } => info!(topic = %topic, "Unsubscribing"),
            LifecycleEventKind::Unsubscribed { topic } => {
                info!(topic = %topic, "Successfully unsubscribed")
            }
            LifecycleEventKind::SubscriptionError {
                topic,
                reason,
                state,
            } => error!(topic = %topic, reason = %reason, state = ?state, "Subscription error"),
            LifecycleEventKind::Published { topic, bytes } => {
                info!(topic = %topic, bytes = bytes, "Message published")
            }
            LifecycleEventKind::PublishFailed { topic, reason } => {
                error!(topic = %topic, reason = %reason, "Publish failed")
            }
            LifecycleEventKind::MessageDropped { topic } => {
                warn!(topic = %topic, "Message dropped: no subscription")
            }
            LifecycleEventKind::Warning { message } => warn!("{}", message),
        }
    }
}

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast emitter for lifecycle events
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Log and broadcast an event; returns the number of receivers reached
    pub fn emit(&self, kind: LifecycleEventKind) -> usize {
        kind.log();
        self.tx
            .send(LifecycleEvent {
                timestamp: Utc::now(),
                kind,
            })
            .unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
