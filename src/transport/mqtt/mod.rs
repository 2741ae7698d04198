//! MQTT v5 broker transport
//!
//! Pure functions are kept apart from I/O:
//!
//! - [`connection`] - broker options, handshake backoff, topic namespacing
//! - [`message_handler`] - routing of raw rumqttc events
//! - [`correlation`] - packet id to correlation key bookkeeping
//! - [`client`] - the session handle and its event loop driver
//!
//! # Usage
//!
//! ```rust,no_run
//! use pubsub_session::session::{Credentials, SessionClient, SessionOptions};
//! use pubsub_session::transport::mqtt::MqttTransport;
//!
//! # tokio_test::block_on(async {
//! let client = SessionClient::start(MqttTransport::default(), SessionOptions::default());
//! client.connect(Credentials::new("mqtt://localhost:1883")).await?;
//! client.subscribe("orders/new", |message| println!("{}", message.payload_str())).await?;
//! client.publish("orders/new", "{\"id\":1}").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod correlation;
pub mod message_handler;

pub use client::{MqttSessionHandle, MqttTransport};
pub use connection::{MqttError, ReconnectConfig, TopicNamespace};
pub use message_handler::{EventRoute, MessageHandler};
