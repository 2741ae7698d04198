//! Pure connection configuration for the MQTT transport
//!
//! Broker options, retry backoff and topic namespacing. Nothing here touches
//! the network.

use crate::session::Credentials;
use crate::transport::{DeliveryMode, TransportError};
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Handshake retry configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of handshake attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            backoff_pattern: vec![250, 500, 1000, 2000],
            sustained_delay: 2000,
        }
    }
}

impl ReconnectConfig {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts.max(1)),
            ..Self::default()
        }
    }

    /// Whether `attempts` failed handshakes exhaust the budget
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    /// Total backoff across all attempts; None if unlimited
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            (1..max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .sum()
        })
    }

    /// Backoff before retrying after failed attempt number `attempt`
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Unsupported broker URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Request failed")]
    RequestFailed(#[source] rumqttc::v5::ClientError),
}

impl From<MqttError> for TransportError {
    fn from(error: MqttError) -> Self {
        match error {
            MqttError::InvalidBrokerUrl(_) | MqttError::UnsupportedScheme(_) => {
                TransportError::InvalidCredentials(error.to_string())
            }
            MqttError::RequestFailed(source) => TransportError::RequestFailed(Box::new(source)),
        }
    }
}

fn is_tls_scheme(scheme: &str) -> bool {
    matches!(scheme, "mqtts" | "ssl")
}

/// Build rumqttc options for a session
pub fn configure_mqtt_options(credentials: &Credentials) -> Result<MqttOptions, MqttError> {
    let url = Url::parse(&credentials.host)
        .map_err(|_| MqttError::InvalidBrokerUrl(credentials.host.clone()))?;

    match url.scheme() {
        "mqtt" | "tcp" | "mqtts" | "ssl" => {}
        other => return Err(MqttError::UnsupportedScheme(other.to_string())),
    }

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(credentials.host.clone()))?;
    let tls = is_tls_scheme(url.scheme());
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    // Fresh client id per session so a stale session never collides.
    let client_id = format!("pubsub-{}", uuid::Uuid::new_v4().simple());
    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    if tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &credentials.username {
        let password = credentials.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(60));
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(256 * 1024));

    Ok(mqtt_options)
}

/// Maps the session's virtual namespace onto a topic prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicNamespace {
    prefix: Option<String>,
}

impl TopicNamespace {
    /// Empty and `default` namespaces leave topics untouched
    pub fn from_vpn(vpn: Option<&str>) -> Self {
        let prefix = vpn
            .map(|vpn| vpn.trim_matches('/'))
            .filter(|vpn| !vpn.is_empty() && *vpn != "default")
            .map(str::to_string);
        Self { prefix }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Topic as it appears on the wire
    pub fn qualify(&self, topic: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{topic}"),
            None => topic.to_string(),
        }
    }

    /// Topic as the session sees it; topics outside the namespace pass through
    pub fn strip(&self, wire_topic: &str) -> String {
        match &self.prefix {
            Some(prefix) => wire_topic
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(wire_topic)
                .to_string(),
            None => wire_topic.to_string(),
        }
    }
}

/// QoS used for a delivery mode
pub fn qos_for(mode: DeliveryMode) -> QoS {
    match mode {
        DeliveryMode::Direct => QoS::AtMostOnce,
        DeliveryMode::Persistent => QoS::AtLeastOnce,
    }
}
