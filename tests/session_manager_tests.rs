//! Session manager behavior against the in-memory broker
//!
//! Covers connect/disconnect lifecycle, subscription bookkeeping and
//! message dispatch as observed through the public client API.

mod test_helpers;

use bytes::Bytes;
use pubsub_session::error::ClientError;
use pubsub_session::session::{
    ConnectionState, LifecycleEventKind, SessionOptions, SubscriptionState,
};
use pubsub_session::testing::{BrokerCall, MockBroker, MockFailures};
use pubsub_session::transport::{DeliveryMode, SessionEvent};
use std::time::Duration;
use test_helpers::{
    connected, recording_handler, start, test_credentials, wait_for, wait_for_messages,
};

#[tokio::test]
async fn test_connect_reports_connected() {
    let broker = MockBroker::new().with_auto_up();
    let (client, mut events) = start(&broker, SessionOptions::default());

    client.connect(test_credentials()).await.unwrap();

    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Connecting { .. })).await;
    wait_for(&mut events, |kind| *kind == LifecycleEventKind::Connected).await;
    assert_eq!(
        client.connection_state().await.unwrap(),
        ConnectionState::Connected
    );
}

#[tokio::test]
async fn test_connect_while_connected_is_rejected() {
    let broker = MockBroker::new().with_auto_up();
    let (client, mut events) = connected(&broker).await;

    let result = client.connect(test_credentials()).await;

    assert!(matches!(result, Err(ClientError::AlreadyConnected)));
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Warning { .. })).await;

    // The live session is untouched
    let sessions = broker
        .calls()
        .iter()
        .filter(|call| matches!(call, BrokerCall::CreateSession { .. }))
        .count();
    assert_eq!(sessions, 1);
    assert_eq!(
        client.connection_state().await.unwrap(),
        ConnectionState::Connected
    );
}

#[tokio::test]
async fn test_connect_failed_settles_connect() {
    let broker = MockBroker::new();
    let (client, mut events) = start(&broker, SessionOptions::default());

    let connecting = tokio::spawn({
        let client = client.clone();
        async move { client.connect(test_credentials()).await }
    });
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Connecting { .. })).await;

    assert!(broker.emit(SessionEvent::ConnectFailed {
        info: "bad login".to_string()
    }));

    let result = connecting.await.unwrap();
    match result {
        Err(ClientError::ConnectFailed { reason }) => assert!(reason.contains("bad login")),
        other => panic!("expected ConnectFailed, got {other:?}"),
    }
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::ConnectFailed { .. })).await;
    assert_eq!(
        client.connection_state().await.unwrap(),
        ConnectionState::Disconnected
    );
    assert!(broker.calls().contains(&BrokerCall::Dispose));
}

#[tokio::test]
async fn test_disconnect_before_up_fails_connect() {
    let broker = MockBroker::new();
    let (client, mut events) = start(&broker, SessionOptions::default());

    let connecting = tokio::spawn({
        let client = client.clone();
        async move { client.connect(test_credentials()).await }
    });
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Connecting { .. })).await;
    broker.emit(SessionEvent::Disconnected);

    assert!(matches!(
        connecting.await.unwrap(),
        Err(ClientError::ConnectFailed { .. })
    ));
    assert_eq!(
        client.connection_state().await.unwrap(),
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_connect_timeout() {
    let broker = MockBroker::new();
    let options = SessionOptions {
        connect_timeout: Some(Duration::from_millis(200)),
        ..SessionOptions::default()
    };
    let (client, mut events) = start(&broker, options);

    let result = client.connect(test_credentials()).await;

    assert!(matches!(result, Err(ClientError::ConnectTimeout)));
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::ConnectFailed { .. })).await;
    assert_eq!(
        client.connection_state().await.unwrap(),
        ConnectionState::Disconnected
    );

    // A fresh attempt is allowed afterwards
    let retry = tokio::spawn({
        let client = client.clone();
        async move { client.connect(test_credentials()).await }
    });
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Connecting { .. })).await;
    assert!(broker.emit(SessionEvent::Up));
    assert!(retry.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_unrepresentable_timeouts_mean_no_deadline() {
    let broker = MockBroker::new();
    let options = SessionOptions {
        connect_timeout: Some(Duration::from_secs(u64::MAX)),
        subscribe_timeout: Duration::MAX,
        ..SessionOptions::default()
    };
    let (client, mut events) = start(&broker, options);

    let connecting = tokio::spawn({
        let client = client.clone();
        async move { client.connect(test_credentials()).await }
    });
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Connecting { .. })).await;
    assert!(broker.emit(SessionEvent::Up));
    assert!(connecting.await.unwrap().is_ok());

    client.subscribe("orders/new", |_| {}).await.unwrap();
    assert!(broker.emit(SessionEvent::SubscriptionOk {
        correlation_key: "orders/new".to_string()
    }));
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Subscribed { .. })).await;

    assert!(client.is_running());
    assert_eq!(
        client.subscription_state("orders/new").await.unwrap(),
        Some(SubscriptionState::Confirmed)
    );
}

#[tokio::test]
async fn test_session_construction_failure() {
    let broker = MockBroker::new().with_failures(MockFailures {
        create: true,
        ..MockFailures::default()
    });
    let (client, _events) = start(&broker, SessionOptions::default());

    let result = client.connect(test_credentials()).await;

    assert!(matches!(result, Err(ClientError::ConstructionError { .. })));
    assert_eq!(
        client.connection_state().await.unwrap(),
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_operations_before_connect_make_no_broker_call() {
    let broker = MockBroker::responsive();
    let (client, _events) = start(&broker, SessionOptions::default());

    let published = client.publish("orders/new", "payload").await;
    let subscribed = client.subscribe("orders/new", |_| {}).await;
    let unsubscribed = client.unsubscribe("orders/new").await;
    let disconnected = client.disconnect().await;

    assert!(matches!(published, Err(ClientError::NotConnected)));
    assert!(matches!(subscribed, Err(ClientError::NotConnected)));
    assert!(matches!(unsubscribed, Err(ClientError::NotConnected)));
    assert!(matches!(disconnected, Err(ClientError::NotConnected)));
    assert!(broker.calls().is_empty());
    assert!(client.topics().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_subscribe_twice_keeps_one_entry() {
    let broker = MockBroker::new().with_auto_up();
    let (client, mut events) = connected(&broker).await;

    client.subscribe("orders/new", |_| {}).await.unwrap();
    let second = client.subscribe("orders/new", |_| {}).await;

    assert!(matches!(second, Err(ClientError::AlreadySubscribed { .. })));
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Warning { .. })).await;
    assert_eq!(broker.subscribe_calls(), vec!["orders/new".to_string()]);
    assert_eq!(client.topics().await.unwrap(), vec!["orders/new".to_string()]);
    assert_eq!(
        client.subscription_state("orders/new").await.unwrap(),
        Some(SubscriptionState::Pending)
    );
}

#[tokio::test]
async fn test_subscribe_unsubscribe_round_trip() {
    let broker = MockBroker::new().with_auto_up().with_auto_ack();
    let (client, mut events) = connected(&broker).await;

    client.subscribe("orders/new", |_| {}).await.unwrap();
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Subscribed { .. })).await;
    assert_eq!(
        client.subscription_state("orders/new").await.unwrap(),
        Some(SubscriptionState::Confirmed)
    );

    client.unsubscribe("orders/new").await.unwrap();
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Unsubscribed { .. })).await;
    assert_eq!(client.subscription_state("orders/new").await.unwrap(), None);
    assert!(broker
        .calls()
        .iter()
        .any(|call| matches!(call, BrokerCall::Unsubscribe { topic, .. } if topic == "orders/new")));
}

#[tokio::test]
async fn test_subscribe_uses_topic_as_correlation_key() {
    let broker = MockBroker::new().with_auto_up();
    let options = SessionOptions {
        subscribe_timeout: Duration::from_millis(1500),
        ..SessionOptions::default()
    };
    let (client, _events) = start(&broker, options);
    client.connect(test_credentials()).await.unwrap();

    client.subscribe("fleet/+/status", |_| {}).await.unwrap();

    let call = broker
        .calls()
        .into_iter()
        .find(|call| matches!(call, BrokerCall::Subscribe { .. }))
        .unwrap();
    assert_eq!(
        call,
        BrokerCall::Subscribe {
            topic: "fleet/+/status".to_string(),
            correlation_key: "fleet/+/status".to_string(),
            request_ack: true,
            timeout: Duration::from_millis(1500),
        }
    );
}

#[tokio::test]
async fn test_unmatched_confirmation_is_dropped() {
    let broker = MockBroker::new().with_auto_up();
    let (client, mut events) = connected(&broker).await;
    client.subscribe("a", |_| {}).await.unwrap();

    broker.emit(SessionEvent::SubscriptionOk {
        correlation_key: "unknown".to_string(),
    });

    let warning = wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Warning { .. })).await;
    match warning.kind {
        LifecycleEventKind::Warning { message } => assert!(message.contains("unknown")),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(client.topics().await.unwrap(), vec!["a".to_string()]);
    assert_eq!(
        client.subscription_state("a").await.unwrap(),
        Some(SubscriptionState::Pending)
    );
}

#[tokio::test]
async fn test_confirmation_for_confirmed_entry_is_dropped() {
    let broker = MockBroker::new().with_auto_up().with_auto_ack();
    let (client, mut events) = connected(&broker).await;
    client.subscribe("a", |_| {}).await.unwrap();
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Subscribed { .. })).await;

    broker.emit(SessionEvent::SubscriptionOk {
        correlation_key: "a".to_string(),
    });

    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Warning { .. })).await;
    assert_eq!(
        client.subscription_state("a").await.unwrap(),
        Some(SubscriptionState::Confirmed)
    );
}

#[tokio::test]
async fn test_publish_delivers_to_handler_exactly_once() {
    let broker = MockBroker::responsive();
    let (client, mut events) = connected(&broker).await;
    wait_for(&mut events, |kind| *kind == LifecycleEventKind::Connected).await;

    let (received, handler) = recording_handler();
    client.subscribe("orders/new", handler).await.unwrap();
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Subscribed { .. })).await;

    client.publish("orders/new", "{\"id\":7}").await.unwrap();
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Published { .. })).await;
    wait_for_messages(&received, 1).await;

    // Nothing else arrives later
    tokio::time::sleep(Duration::from_millis(50)).await;
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].topic, "orders/new");
    assert_eq!(received[0].payload, Bytes::from("{\"id\":7}"));

    let sent = broker.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].delivery_mode, DeliveryMode::Direct);
}

#[tokio::test]
async fn test_subscription_error_removes_entry_and_allows_resubscribe() {
    let broker = MockBroker::new().with_auto_up();
    let (client, mut events) = connected(&broker).await;

    client.subscribe("x", |_| {}).await.unwrap();
    broker.emit(SessionEvent::SubscriptionError {
        correlation_key: "x".to_string(),
        info: "not authorized".to_string(),
    });

    let failure = wait_for(&mut events, |kind| {
        matches!(kind, LifecycleEventKind::SubscriptionError { .. })
    })
    .await;
    assert_eq!(
        failure.kind,
        LifecycleEventKind::SubscriptionError {
            topic: "x".to_string(),
            reason: "not authorized".to_string(),
            state: SubscriptionState::Failed,
        }
    );
    assert_eq!(client.subscription_state("x").await.unwrap(), None);

    client.subscribe("x", |_| {}).await.unwrap();
    broker.emit(SessionEvent::SubscriptionOk {
        correlation_key: "x".to_string(),
    });
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Subscribed { .. })).await;
    assert_eq!(
        client.subscription_state("x").await.unwrap(),
        Some(SubscriptionState::Confirmed)
    );
}

#[tokio::test]
async fn test_subscribe_acknowledgement_timeout() {
    let broker = MockBroker::new().with_auto_up();
    let options = SessionOptions {
        subscribe_timeout: Duration::from_millis(50),
        ..SessionOptions::default()
    };
    let (client, mut events) = start(&broker, options);
    client.connect(test_credentials()).await.unwrap();

    client.subscribe("slow", |_| {}).await.unwrap();

    let failure = wait_for(&mut events, |kind| {
        matches!(kind, LifecycleEventKind::SubscriptionError { .. })
    })
    .await;
    match failure.kind {
        LifecycleEventKind::SubscriptionError { topic, reason, state } => {
            assert_eq!(topic, "slow");
            assert!(reason.contains("timed out"));
            assert_eq!(state, SubscriptionState::Failed);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(client.subscription_state("slow").await.unwrap(), None);

    // A late acknowledgement is unmatched
    broker.emit(SessionEvent::SubscriptionOk {
        correlation_key: "slow".to_string(),
    });
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Warning { .. })).await;
    assert_eq!(client.subscription_state("slow").await.unwrap(), None);
}

#[tokio::test]
async fn test_subscribe_request_failure_cancels_entry() {
    let broker = MockBroker::new()
        .with_auto_up()
        .with_failures(MockFailures {
            subscribe: true,
            ..MockFailures::default()
        });
    let (client, _events) = connected(&broker).await;

    let result = client.subscribe("orders/new", |_| {}).await;

    assert!(matches!(result, Err(ClientError::SubscriptionError { .. })));
    assert_eq!(client.subscription_state("orders/new").await.unwrap(), None);
}

#[tokio::test]
async fn test_unsubscribe_preconditions() {
    let broker = MockBroker::new().with_auto_up();
    let (client, _events) = connected(&broker).await;

    let unknown = client.unsubscribe("nothing").await;
    assert!(matches!(unknown, Err(ClientError::NotSubscribed { .. })));

    client.subscribe("pending", |_| {}).await.unwrap();
    let pending = client.unsubscribe("pending").await;
    assert!(matches!(pending, Err(ClientError::OperationPending { .. })));
    assert_eq!(
        client.subscription_state("pending").await.unwrap(),
        Some(SubscriptionState::Pending)
    );
}

#[tokio::test]
async fn test_unsubscribe_error_keeps_subscription() {
    let broker = MockBroker::new().with_auto_up();
    let (client, mut events) = connected(&broker).await;
    client.subscribe("a", |_| {}).await.unwrap();
    broker.emit(SessionEvent::SubscriptionOk {
        correlation_key: "a".to_string(),
    });
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Subscribed { .. })).await;

    client.unsubscribe("a").await.unwrap();
    broker.emit(SessionEvent::SubscriptionError {
        correlation_key: "a".to_string(),
        info: "busy".to_string(),
    });

    let failure = wait_for(&mut events, |kind| {
        matches!(kind, LifecycleEventKind::SubscriptionError { .. })
    })
    .await;
    assert!(matches!(
        failure.kind,
        LifecycleEventKind::SubscriptionError {
            state: SubscriptionState::Confirmed,
            ..
        }
    ));
    assert_eq!(
        client.subscription_state("a").await.unwrap(),
        Some(SubscriptionState::Confirmed)
    );
}

#[tokio::test]
async fn test_message_without_subscription_is_dropped() {
    let broker = MockBroker::new().with_auto_up();
    let (_client, mut events) = connected(&broker).await;

    broker.emit(SessionEvent::Message {
        destination: "nobody/home".to_string(),
        payload: Bytes::from_static(b"x"),
    });

    let dropped = wait_for(&mut events, |kind| {
        matches!(kind, LifecycleEventKind::MessageDropped { .. })
    })
    .await;
    assert_eq!(
        dropped.kind,
        LifecycleEventKind::MessageDropped {
            topic: "nobody/home".to_string()
        }
    );
}

#[tokio::test]
async fn test_wildcard_subscription_receives_matching_messages() {
    let broker = MockBroker::new().with_auto_up().with_auto_ack();
    let (client, mut events) = connected(&broker).await;

    let (received, handler) = recording_handler();
    client.subscribe("orders/+", handler).await.unwrap();
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Subscribed { .. })).await;

    broker.emit(SessionEvent::Message {
        destination: "orders/cancelled".to_string(),
        payload: Bytes::from_static(b"42"),
    });
    wait_for_messages(&received, 1).await;

    assert_eq!(received.lock().unwrap()[0].topic, "orders/cancelled");
}

#[tokio::test]
async fn test_publish_failure_is_reported() {
    let broker = MockBroker::new()
        .with_auto_up()
        .with_failures(MockFailures {
            send: true,
            ..MockFailures::default()
        });
    let (client, mut events) = connected(&broker).await;

    let result = client.publish("orders/new", "x").await;

    assert!(matches!(result, Err(ClientError::PublishFailed { .. })));
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::PublishFailed { .. })).await;
}

#[tokio::test]
async fn test_publish_rejects_wildcard_destination() {
    let broker = MockBroker::new().with_auto_up();
    let (client, _events) = connected(&broker).await;

    let result = client.publish("orders/#", "x").await;

    assert!(matches!(result, Err(ClientError::InvalidTopic { .. })));
    assert!(broker.sent_messages().is_empty());
}

#[tokio::test]
async fn test_transport_disconnect_clears_subscriptions() {
    let broker = MockBroker::new().with_auto_up().with_auto_ack();
    let (client, mut events) = connected(&broker).await;
    let (received, handler) = recording_handler();
    client.subscribe("orders/new", handler).await.unwrap();
    wait_for(&mut events, |kind| matches!(kind, LifecycleEventKind::Subscribed { .. })).await;

    broker.emit(SessionEvent::Disconnected);

    wait_for(&mut events, |kind| *kind == LifecycleEventKind::Disconnected).await;
    assert_eq!(
        client.connection_state().await.unwrap(),
        ConnectionState::Disconnected
    );
    assert!(client.topics().await.unwrap().is_empty());
    assert!(received.lock().unwrap().is_empty());
    assert!(matches!(
        client.publish("orders/new", "x").await,
        Err(ClientError::NotConnected)
    ));
}

#[tokio::test]
async fn test_disconnect_and_reconnect() {
    let broker = MockBroker::responsive();
    let (client, mut events) = connected(&broker).await;
    client.subscribe("a", |_| {}).await.unwrap();

    client.disconnect().await.unwrap();

    wait_for(&mut events, |kind| *kind == LifecycleEventKind::Disconnected).await;
    assert!(broker.calls().contains(&BrokerCall::Dispose));
    assert!(client.topics().await.unwrap().is_empty());
    assert!(matches!(
        client.disconnect().await,
        Err(ClientError::NotConnected)
    ));

    client.connect(test_credentials()).await.unwrap();
    assert_eq!(
        client.connection_state().await.unwrap(),
        ConnectionState::Connected
    );
}

#[tokio::test]
async fn test_shutdown_stops_the_manager() {
    let broker = MockBroker::responsive();
    let (client, _events) = connected(&broker).await;

    client.shutdown().await.unwrap();

    assert!(matches!(
        client.connect(test_credentials()).await,
        Err(ClientError::SessionClosed)
    ));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!client.is_running());
    assert!(broker.calls().contains(&BrokerCall::Dispose));
}
