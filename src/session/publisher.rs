//! Best-effort publishing over the active session

use super::state::Session;
use super::topic::validate_destination;
use crate::error::{ClientError, ClientResult};
use crate::transport::{DeliveryMode, OutboundMessage, SessionHandle};
use bytes::Bytes;
use tracing::{debug, info};

pub struct Publisher;

impl Publisher {
    /// Build a direct (non-persistent) message addressed to `topic`
    pub fn build_message(topic: &str, payload: Bytes) -> OutboundMessage {
        OutboundMessage::new()
            .with_destination(topic)
            .with_payload(payload)
            .with_delivery_mode(DeliveryMode::Direct)
    }

    /// Send `payload` to `topic` on the session, if it is connected
    ///
    /// No acknowledgement is tracked; success means the transport accepted
    /// the message.
    pub async fn publish<H: SessionHandle>(
        session: Option<&Session<H>>,
        topic: &str,
        payload: Bytes,
    ) -> ClientResult<usize> {
        let session = session
            .filter(|session| session.is_connected())
            .ok_or(ClientError::NotConnected)?;
        validate_destination(topic).map_err(|reason| ClientError::invalid_topic(topic, reason))?;

        let size = payload.len();
        info!(topic = %topic, bytes = size, "Publishing message");
        let message = Self::build_message(topic, payload);

        session
            .handle
            .send(message)
            .await
            .map_err(|e| ClientError::publish_failed(e.to_string()))?;

        debug!(topic = %topic, "Message handed to transport");
        Ok(size)
    }
}
