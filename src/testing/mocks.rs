//! Mock broker for testing
//!
//! Records every call the session manager makes and lets tests inject
//! session events by hand, or answer automatically.

use crate::session::Credentials;
use crate::transport::{
    BrokerTransport, OutboundMessage, SessionEvent, SessionEventSender, SessionEvents,
    SessionHandle, TransportError,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// A call made on the mock broker
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerCall {
    CreateSession { host: String },
    Connect,
    Subscribe {
        topic: String,
        correlation_key: String,
        request_ack: bool,
        timeout: Duration,
    },
    Unsubscribe { topic: String, correlation_key: String },
    Send(OutboundMessage),
    Dispose,
}

impl BrokerCall {
    /// Calls that hit the broker after a session exists
    pub fn is_session_call(&self) -> bool {
        !matches!(self, BrokerCall::CreateSession { .. })
    }
}

/// Which operations fail synchronously
#[derive(Debug, Clone, Copy, Default)]
pub struct MockFailures {
    pub create: bool,
    pub connect: bool,
    pub subscribe: bool,
    pub unsubscribe: bool,
    pub send: bool,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<BrokerCall>,
    session: Option<SessionEventSender>,
    failures: MockFailures,
}

/// In-memory broker transport
#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<MockState>>,
    auto_up: bool,
    auto_ack: bool,
    echo: bool,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers connect with Up and every request with SubscriptionOk, and
    /// delivers sent messages back on their destination
    pub fn responsive() -> Self {
        Self::new().with_auto_up().with_auto_ack().with_echo()
    }

    pub fn with_auto_up(mut self) -> Self {
        self.auto_up = true;
        self
    }

    pub fn with_auto_ack(mut self) -> Self {
        self.auto_ack = true;
        self
    }

    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn with_failures(self, failures: MockFailures) -> Self {
        self.set_failures(failures);
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the calls from other tests.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_failures(&self, failures: MockFailures) {
        self.state().failures = failures;
    }

    /// Inject an event into the most recent session; false if none is listening
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.state()
            .session
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    pub fn calls(&self) -> Vec<BrokerCall> {
        self.state().calls.clone()
    }

    /// Number of calls made against a live session
    pub fn session_call_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.is_session_call())
            .count()
    }

    pub fn subscribe_calls(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                BrokerCall::Subscribe { topic, .. } => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                BrokerCall::Send(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_history(&self) {
        self.state().calls.clear();
    }

    fn record(&self, call: BrokerCall) -> MockFailures {
        let mut state = self.state();
        state.calls.push(call);
        state.failures
    }
}

impl BrokerTransport for MockBroker {
    type Handle = MockSessionHandle;

    fn create_session(
        &self,
        credentials: &Credentials,
    ) -> Result<(Self::Handle, SessionEvents), TransportError> {
        let failures = self.record(BrokerCall::CreateSession {
            host: credentials.host.clone(),
        });
        if failures.create {
            return Err(TransportError::InvalidCredentials(
                "mock refused credentials".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.state().session = Some(tx.clone());
        Ok((
            MockSessionHandle {
                broker: self.clone(),
                events_tx: tx,
            },
            rx,
        ))
    }
}

pub struct MockSessionHandle {
    broker: MockBroker,
    events_tx: SessionEventSender,
}

impl MockSessionHandle {
    fn reply(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn request_failed() -> TransportError {
        TransportError::RequestFailed("mock request failure".into())
    }
}

#[async_trait]
impl SessionHandle for MockSessionHandle {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.broker.record(BrokerCall::Connect).connect {
            return Err(Self::request_failed());
        }
        if self.broker.auto_up {
            self.reply(SessionEvent::Up);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        request_ack: bool,
        correlation_key: &str,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let failures = self.broker.record(BrokerCall::Subscribe {
            topic: topic.to_string(),
            correlation_key: correlation_key.to_string(),
            request_ack,
            timeout,
        });
        if failures.subscribe {
            return Err(Self::request_failed());
        }
        if self.broker.auto_ack {
            self.reply(SessionEvent::SubscriptionOk {
                correlation_key: correlation_key.to_string(),
            });
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        topic: &str,
        _request_ack: bool,
        correlation_key: &str,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        let failures = self.broker.record(BrokerCall::Unsubscribe {
            topic: topic.to_string(),
            correlation_key: correlation_key.to_string(),
        });
        if failures.unsubscribe {
            return Err(Self::request_failed());
        }
        if self.broker.auto_ack {
            self.reply(SessionEvent::SubscriptionOk {
                correlation_key: correlation_key.to_string(),
            });
        }
        Ok(())
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let failures = self.broker.record(BrokerCall::Send(message.clone()));
        if failures.send {
            return Err(Self::request_failed());
        }
        if self.broker.echo {
            self.reply(SessionEvent::Message {
                destination: message.destination,
                payload: message.payload,
            });
        }
        Ok(())
    }

    async fn dispose(&self) {
        self.broker.record(BrokerCall::Dispose);
        let mut state = self.broker.state();
        if state
            .session
            .as_ref()
            .is_some_and(|tx| tx.same_channel(&self.events_tx))
        {
            state.session = None;
        }
    }
}
