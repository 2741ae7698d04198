//! Pure routing of rumqttc events
//!
//! Turns raw event loop output into routing decisions the session driver
//! acts on.

use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::Event;
use rumqttc::Outgoing;
use bytes::Bytes;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT event to the matching driver action
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscribeAcknowledged {
                    packet_id: suback.pkid,
                    result: Self::validate_subscription_success(&suback.return_codes),
                },
                Packet::UnsubAck(unsuback) => EventRoute::UnsubscribeAcknowledged {
                    packet_id: unsuback.pkid,
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Subscribe(pkid)) => {
                EventRoute::SubscribeSent { packet_id: *pkid }
            }
            Event::Outgoing(Outgoing::Unsubscribe(pkid)) => {
                EventRoute::UnsubscribeSent { packet_id: *pkid }
            }
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Check that every filter in a SubAck was granted
    pub fn validate_subscription_success(
        return_codes: &[SubscribeReasonCode],
    ) -> Result<(), String> {
        let refused: Vec<String> = return_codes
            .iter()
            .filter(|code| !Self::is_granted(code))
            .map(|code| format!("{code:?}"))
            .collect();

        if refused.is_empty() {
            Ok(())
        } else {
            Err(format!("Subscription refused by broker: {}", refused.join(", ")))
        }
    }

    /// Only `Success` grants a filter; every other code is a refusal
    fn is_granted(reason_code: &SubscribeReasonCode) -> bool {
        matches!(reason_code, SubscribeReasonCode::Success(_))
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the handshake
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// Broker closed the session
    Disconnected,
    /// A SUBSCRIBE left with this packet id
    SubscribeSent { packet_id: u16 },
    /// An UNSUBSCRIBE left with this packet id
    UnsubscribeSent { packet_id: u16 },
    SubscribeAcknowledged {
        packet_id: u16,
        result: Result<(), String>,
    },
    UnsubscribeAcknowledged { packet_id: u16 },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Other outgoing packets
    OutgoingEvent,
}
