//! Session-oriented publish/subscribe core
//!
//! - [`manager`]: the actor that owns the session and reacts to broker events
//! - [`registry`]: per-topic subscription records keyed by correlation key
//! - [`router`]: inbound message dispatch
//! - [`publisher`]: best-effort sends
//! - [`events`]: lifecycle event stream

pub mod events;
pub mod manager;
pub mod publisher;
pub mod registry;
pub mod router;
pub mod state;
pub mod topic;

pub use events::{EventEmitter, LifecycleEvent, LifecycleEventKind};
pub use manager::{SessionClient, SessionManager, SessionOptions};
pub use publisher::Publisher;
pub use registry::{
    MessageCallback, PendingOperation, Resolution, Subscription, SubscriptionRegistry,
    SubscriptionState,
};
pub use router::{DispatchOutcome, InboundMessage, MessageRouter};
pub use state::{ConnectionState, Credentials, Session};
pub use topic::{is_wildcard, topic_matches, validate_destination, validate_topic_filter};
