//! Test helpers and utilities for integration tests

use pubsub_session::session::{
    Credentials, InboundMessage, LifecycleEvent, LifecycleEventKind, SessionClient,
    SessionOptions,
};
use pubsub_session::testing::MockBroker;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

/// Upper bound for anything a test waits on
#[allow(dead_code)]
pub const WAIT: Duration = Duration::from_secs(2);

#[allow(dead_code)]
pub fn test_credentials() -> Credentials {
    Credentials::new("mqtt://mock-broker:1883").with_vpn("default")
}

/// Start a client over `broker` and subscribe to its lifecycle events
#[allow(dead_code)]
pub fn start(
    broker: &MockBroker,
    options: SessionOptions,
) -> (SessionClient, broadcast::Receiver<LifecycleEvent>) {
    let client = SessionClient::start(broker.clone(), options);
    let events = client.events();
    (client, events)
}

/// Start a client and connect it; `broker` must answer connect with Up
#[allow(dead_code)]
pub async fn connected(broker: &MockBroker) -> (SessionClient, broadcast::Receiver<LifecycleEvent>) {
    let (client, events) = start(broker, SessionOptions::default());
    client
        .connect(test_credentials())
        .await
        .expect("mock connect should succeed");
    (client, events)
}

/// Wait for the next event matching `predicate`, skipping others
#[allow(dead_code)]
pub async fn wait_for<F>(events: &mut broadcast::Receiver<LifecycleEvent>, predicate: F) -> LifecycleEvent
where
    F: Fn(&LifecycleEventKind) -> bool,
{
    let found = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event.kind) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => panic!("lifecycle event stream closed"),
            }
        }
    })
    .await;
    found.expect("timed out waiting for lifecycle event")
}

/// A handler that records every message it is given
#[allow(dead_code)]
pub fn recording_handler() -> (
    Arc<Mutex<Vec<InboundMessage>>>,
    impl Fn(&InboundMessage) + Send + Sync + 'static,
) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    (received, move |message: &InboundMessage| {
        sink.lock().unwrap().push(message.clone());
    })
}

/// Poll until `received` holds `count` messages
#[allow(dead_code)]
pub async fn wait_for_messages(received: &Arc<Mutex<Vec<InboundMessage>>>, count: usize) {
    let reached = tokio::time::timeout(WAIT, async {
        while received.lock().unwrap().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    reached.expect("timed out waiting for messages");
}
