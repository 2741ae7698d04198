//! Broker transport collaborator
//!
//! The session core never speaks a wire protocol itself. It drives a
//! [`BrokerTransport`] that creates sessions, and each session reports what
//! happens on the wire as a stream of [`SessionEvent`]s.

use crate::session::Credentials;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Events a live broker session reports back to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake complete, session ready for subscribe/publish
    Up,
    /// Handshake failed for good
    ConnectFailed { info: String },
    /// Session lost or closed by the broker
    Disconnected,
    /// A subscribe/unsubscribe request was rejected or could not be sent
    SubscriptionError { correlation_key: String, info: String },
    /// A subscribe/unsubscribe request was acknowledged
    SubscriptionOk { correlation_key: String },
    /// Inbound message addressed to a topic
    Message { destination: String, payload: Bytes },
}

/// Receiving half of a session's event stream
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Sending half of a session's event stream, held by the transport
pub type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;

/// Reliability class of a published message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Best effort, non-persistent, no acknowledgement tracked
    #[default]
    Direct,
    /// Broker acknowledged delivery
    Persistent,
}

/// A message on its way to the broker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    pub destination: String,
    pub payload: Bytes,
    pub delivery_mode: DeliveryMode,
}

impl OutboundMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_destination<S: Into<String>>(mut self, topic: S) -> Self {
        self.destination = topic.into();
        self
    }

    pub fn with_payload<P: Into<Bytes>>(mut self, payload: P) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("Session already started")]
    AlreadyStarted,
    #[error("Request failed: {0}")]
    RequestFailed(Box<dyn std::error::Error + Send + Sync>),
    #[error("Session closed")]
    Closed,
}

/// Factory for broker sessions
pub trait BrokerTransport: Send + Sync + 'static {
    type Handle: SessionHandle;

    /// Create a session for the given credentials
    ///
    /// Fails synchronously on malformed credentials. No network activity
    /// happens until [`SessionHandle::connect`] is called.
    fn create_session(
        &self,
        credentials: &Credentials,
    ) -> Result<(Self::Handle, SessionEvents), TransportError>;
}

/// Operations on one broker session
///
/// Outcomes of `connect`, `subscribe` and `unsubscribe` are reported on the
/// session's event stream; the returned `Result` only covers handing the
/// request to the transport.
#[async_trait::async_trait]
pub trait SessionHandle: Send + Sync + 'static {
    /// Start the broker handshake
    async fn connect(&self) -> Result<(), TransportError>;

    /// Request a topic subscription
    async fn subscribe(
        &self,
        topic: &str,
        request_ack: bool,
        correlation_key: &str,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Request removal of a topic subscription
    async fn unsubscribe(
        &self,
        topic: &str,
        request_ack: bool,
        correlation_key: &str,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Send a message
    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError>;

    /// Release the session; no further events are reported
    async fn dispose(&self);
}
