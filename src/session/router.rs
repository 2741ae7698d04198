//! Inbound message dispatch to per-topic handlers

use super::registry::SubscriptionRegistry;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use tracing::{debug, warn};

/// A message delivered by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Destination topic the broker delivered the message on
    pub topic: String,
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new<T: Into<String>, P: Into<Bytes>>(topic: T, payload: P) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Payload as text, replacing invalid UTF-8
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// What happened to an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handler of `subscription` was invoked once
    Delivered { subscription: String },
    /// No live subscription covers the destination
    Dropped,
}

pub struct MessageRouter;

impl MessageRouter {
    /// Invoke the handler registered for the message's destination
    pub fn dispatch(registry: &SubscriptionRegistry, message: &InboundMessage) -> DispatchOutcome {
        match registry.handler_for(&message.topic) {
            Some((subscription, handler)) => {
                debug!(
                    topic = %message.topic,
                    subscription = %subscription,
                    bytes = message.payload.len(),
                    "Dispatching message"
                );
                handler(message);
                DispatchOutcome::Delivered {
                    subscription: subscription.to_string(),
                }
            }
            None => {
                warn!(
                    topic = %message.topic,
                    "Dropping message with no matching subscription"
                );
                DispatchOutcome::Dropped
            }
        }
    }
}
