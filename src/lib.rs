//! Session-oriented publish/subscribe client core
//!
//! One broker session, a registry of topic subscriptions whose broker
//! acknowledgements arrive asynchronously, dispatch of inbound messages to
//! per-topic handlers, and best-effort publishing.
//!
//! # Overview
//!
//! - [`session`] - the session manager actor and its building blocks
//! - [`transport`] - the broker collaborator contract, with an MQTT v5
//!   implementation in [`transport::mqtt`]
//! - [`config`] - TOML configuration with credentials taken from the
//!   environment
//! - [`testing`] - an in-memory broker for tests
//!
//! # Quick Start
//!
//! ```rust
//! use pubsub_session::session::{Credentials, SessionClient, SessionOptions};
//! use pubsub_session::testing::MockBroker;
//!
//! # tokio_test::block_on(async {
//! let client = SessionClient::start(MockBroker::responsive(), SessionOptions::default());
//! client.connect(Credentials::new("mqtt://localhost:1883")).await?;
//!
//! client
//!     .subscribe("orders/new", |message| {
//!         println!("{}: {}", message.topic, message.payload_str());
//!     })
//!     .await?;
//! client.publish("orders/new", "{\"id\":1}").await?;
//!
//! client.disconnect().await?;
//! # Ok::<(), pubsub_session::ClientError>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, SessionConfig};
pub use error::{ClientError, ClientResult};
pub use session::{
    ConnectionState, Credentials, InboundMessage, LifecycleEvent, LifecycleEventKind,
    SessionClient, SessionManager, SessionOptions, SubscriptionState,
};
pub use transport::mqtt::MqttTransport;
