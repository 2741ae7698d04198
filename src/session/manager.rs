//! Session manager actor
//!
//! One task owns the session, the subscription registry and the pending
//! connect request. Caller commands, transport events and request deadlines
//! are all handled by a single `select!` loop, so registry mutations happen
//! strictly in arrival order and never race.
//!
//! Callers talk to the actor through a cloneable [`SessionClient`].

use super::events::{EventEmitter, LifecycleEvent, LifecycleEventKind};
use super::publisher::Publisher;
use super::registry::{MessageCallback, Resolution, SubscriptionRegistry, SubscriptionState};
use super::router::{DispatchOutcome, InboundMessage, MessageRouter};
use super::state::{ConnectionState, Credentials, Session};
use crate::config::SessionSection;
use crate::error::{ClientError, ClientResult};
use crate::transport::{BrokerTransport, SessionEvent, SessionHandle};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CAPACITY: usize = 256;

/// Tuning for a session manager
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Deadline for a subscribe/unsubscribe acknowledgement
    pub subscribe_timeout: Duration,
    /// Deadline for connect(); None waits for a terminal broker event
    pub connect_timeout: Option<Duration>,
    /// Capacity of the command queue and of the lifecycle event stream
    pub capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
            connect_timeout: None,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl From<&SessionSection> for SessionOptions {
    fn from(section: &SessionSection) -> Self {
        Self {
            subscribe_timeout: section.subscribe_timeout(),
            connect_timeout: section.connect_timeout(),
            capacity: section.event_capacity,
        }
    }
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Connect {
        credentials: Credentials,
        reply: Reply<ClientResult<()>>,
    },
    Disconnect {
        reply: Reply<ClientResult<()>>,
    },
    Subscribe {
        topic: String,
        handler: MessageCallback,
        reply: Reply<ClientResult<()>>,
    },
    Unsubscribe {
        topic: String,
        reply: Reply<ClientResult<()>>,
    },
    Publish {
        topic: String,
        payload: Bytes,
        reply: Reply<ClientResult<()>>,
    },
    ConnectionState {
        reply: Reply<ConnectionState>,
    },
    SubscriptionState {
        topic: String,
        reply: Reply<Option<SubscriptionState>>,
    },
    Topics {
        reply: Reply<Vec<String>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Owner of the broker session and its subscriptions
pub struct SessionManager<T: BrokerTransport> {
    transport: T,
    options: SessionOptions,
    session: Option<Session<T::Handle>>,
    registry: SubscriptionRegistry,
    emitter: EventEmitter,
    pending_connect: Option<Reply<ClientResult<()>>>,
    connect_deadline: Option<Instant>,
}

impl<T: BrokerTransport> SessionManager<T> {
    pub fn new(transport: T, options: SessionOptions) -> Self {
        let emitter = EventEmitter::with_capacity(options.capacity);
        Self {
            transport,
            options,
            session: None,
            registry: SubscriptionRegistry::new(),
            emitter,
            pending_connect: None,
            connect_deadline: None,
        }
    }

    /// Start the actor on the current tokio runtime
    pub fn spawn(self) -> SessionClient {
        let (commands_tx, commands_rx) = mpsc::channel(self.options.capacity.max(1));
        let client = SessionClient {
            commands: commands_tx,
            emitter: self.emitter.clone(),
        };

        tokio::spawn(self.run(commands_rx).instrument(crate::session_span!()));
        client
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("Session manager started");

        loop {
            let next_deadline = self.next_deadline();

            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                event = next_session_event(&mut self.session) => {
                    self.handle_session_event(event).await;
                }
                _ = sleep_until_deadline(next_deadline) => {
                    self.handle_deadlines(Instant::now()).await;
                }
            }
        }

        self.settle_connect(Err(ClientError::SessionClosed));
        if self.session.is_some() {
            self.teardown().await;
            self.emitter.emit(LifecycleEventKind::Disconnected);
        }
        debug!("Session manager stopped");
    }

    /// Returns false when the actor should stop
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect { credentials, reply } => {
                self.connect(credentials, reply).await;
            }
            Command::Disconnect { reply } => {
                let result = self.disconnect().await;
                self.reply(reply, result);
            }
            Command::Subscribe {
                topic,
                handler,
                reply,
            } => {
                let result = self.subscribe(topic, handler).await;
                self.reply(reply, result);
            }
            Command::Unsubscribe { topic, reply } => {
                let result = self.unsubscribe(topic).await;
                self.reply(reply, result);
            }
            Command::Publish {
                topic,
                payload,
                reply,
            } => {
                let result = self.publish(topic, payload).await;
                self.reply(reply, result);
            }
            Command::ConnectionState { reply } => {
                let _ = reply.send(self.connection_state());
            }
            Command::SubscriptionState { topic, reply } => {
                let _ = reply.send(self.registry.state(&topic));
            }
            Command::Topics { reply } => {
                let _ = reply.send(self.registry.topics());
            }
            Command::Shutdown { reply } => {
                info!("Session manager shutting down");
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    /// Send a command result back, reporting caller mistakes as warnings
    fn reply(&self, reply: Reply<ClientResult<()>>, result: ClientResult<()>) {
        if let Err(error) = &result {
            if error.is_warning() {
                self.emitter.emit(LifecycleEventKind::Warning {
                    message: error.to_string(),
                });
            }
        }
        let _ = reply.send(result);
    }

    fn connection_state(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or_default()
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.connect_deadline, self.registry.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn connect(&mut self, credentials: Credentials, reply: Reply<ClientResult<()>>) {
        if self.session.is_some() {
            self.reply(reply, Err(ClientError::AlreadyConnected));
            return;
        }

        let (handle, events) = match self.transport.create_session(&credentials) {
            Ok(created) => created,
            Err(e) => {
                let error = ClientError::construction_error(e.to_string());
                self.emitter.emit(LifecycleEventKind::ConnectFailed {
                    reason: error.to_string(),
                });
                let _ = reply.send(Err(error));
                return;
            }
        };

        self.emitter.emit(LifecycleEventKind::Connecting {
            host: credentials.host.clone(),
        });
        let session = self
            .session
            .insert(Session::new(credentials, handle, events));

        let started = session.handle.connect().await;
        if let Err(e) = started {
            let error = ClientError::connect_failed(e.to_string());
            self.teardown().await;
            self.emitter.emit(LifecycleEventKind::ConnectFailed {
                reason: error.to_string(),
            });
            let _ = reply.send(Err(error));
            return;
        }

        self.pending_connect = Some(reply);
        self.connect_deadline = self.options.connect_timeout.and_then(deadline_after);
    }

    fn settle_connect(&mut self, result: ClientResult<()>) {
        self.connect_deadline = None;
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(result);
        }
    }

    async fn disconnect(&mut self) -> ClientResult<()> {
        if !self.session.as_ref().is_some_and(|s| s.is_connected()) {
            return Err(ClientError::NotConnected);
        }

        self.teardown().await;
        self.emitter.emit(LifecycleEventKind::Disconnected);
        Ok(())
    }

    /// Release the session and silently discard every subscription
    async fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            session.handle.dispose().await;
        }
        let discarded = self.registry.clear();
        if discarded > 0 {
            debug!(count = discarded, "Discarded subscriptions with the session");
        }
        self.connect_deadline = None;
    }

    async fn subscribe(&mut self, topic: String, handler: MessageCallback) -> ClientResult<()> {
        let session = match &self.session {
            Some(session) if session.is_connected() => session,
            _ => return Err(ClientError::NotConnected),
        };

        let timeout = self.options.subscribe_timeout;
        self.registry
            .begin_subscribe(&topic, handler, deadline_after(timeout))?;
        self.emitter.emit(LifecycleEventKind::Subscribing {
            topic: topic.clone(),
        });

        // The topic is its own correlation key.
        let requested = session
            .handle
            .subscribe(&topic, true, &topic, timeout)
            .instrument(crate::subscription_span!(topic = %topic))
            .await;
        if let Err(e) = requested {
            let reason = e.to_string();
            self.apply_rejection(&topic, &reason);
            return Err(ClientError::subscription_error(topic, reason));
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: String) -> ClientResult<()> {
        let session = match &self.session {
            Some(session) if session.is_connected() => session,
            _ => return Err(ClientError::NotConnected),
        };

        let timeout = self.options.subscribe_timeout;
        self.registry
            .begin_unsubscribe(&topic, deadline_after(timeout))?;
        self.emitter.emit(LifecycleEventKind::Unsubscribing {
            topic: topic.clone(),
        });

        let requested = session
            .handle
            .unsubscribe(&topic, true, &topic, timeout)
            .instrument(crate::subscription_span!(topic = %topic))
            .await;
        if let Err(e) = requested {
            let reason = e.to_string();
            self.apply_rejection(&topic, &reason);
            return Err(ClientError::subscription_error(topic, reason));
        }
        Ok(())
    }

    async fn publish(&mut self, topic: String, payload: Bytes) -> ClientResult<()> {
        match Publisher::publish(self.session.as_ref(), &topic, payload).await {
            Ok(bytes) => {
                self.emitter
                    .emit(LifecycleEventKind::Published { topic, bytes });
                Ok(())
            }
            Err(ClientError::PublishFailed { reason }) => {
                self.emitter.emit(LifecycleEventKind::PublishFailed {
                    topic,
                    reason: reason.clone(),
                });
                Err(ClientError::PublishFailed { reason })
            }
            Err(other) => Err(other),
        }
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Up => self.on_up(),
            SessionEvent::ConnectFailed { info } => self.on_connect_failed(info).await,
            SessionEvent::Disconnected => self.on_disconnected().await,
            SessionEvent::SubscriptionOk { correlation_key } => {
                self.apply_confirmation(&correlation_key);
            }
            SessionEvent::SubscriptionError {
                correlation_key,
                info,
            } => {
                self.apply_rejection(&correlation_key, &info);
            }
            SessionEvent::Message {
                destination,
                payload,
            } => {
                let message = InboundMessage::new(destination, payload);
                if MessageRouter::dispatch(&self.registry, &message) == DispatchOutcome::Dropped {
                    self.emitter.emit(LifecycleEventKind::MessageDropped {
                        topic: message.topic,
                    });
                }
            }
        }
    }

    fn on_up(&mut self) {
        match self.session.as_mut() {
            Some(session) if session.state == ConnectionState::Connecting => {
                session.state = ConnectionState::Connected;
                self.emitter.emit(LifecycleEventKind::Connected);
                self.settle_connect(Ok(()));
            }
            _ => debug!("Ignoring Up event outside of a pending connect"),
        }
    }

    async fn on_connect_failed(&mut self, info: String) {
        let connecting = self
            .session
            .as_ref()
            .is_some_and(|session| session.state == ConnectionState::Connecting);
        if !connecting {
            warn!(info = %info, "Ignoring connect failure for a session that is already up");
            return;
        }

        let error = ClientError::connect_failed(format!(
            "{info} - check correct parameter values and connectivity"
        ));
        self.teardown().await;
        self.emitter.emit(LifecycleEventKind::ConnectFailed {
            reason: error.to_string(),
        });
        self.settle_connect(Err(error));
    }

    async fn on_disconnected(&mut self) {
        if self.session.is_none() {
            return;
        }

        self.teardown().await;
        self.emitter.emit(LifecycleEventKind::Disconnected);
        self.settle_connect(Err(ClientError::connect_failed(
            "session disconnected before it came up",
        )));
    }

    fn apply_confirmation(&mut self, correlation_key: &str) {
        match self.registry.confirm(correlation_key) {
            Resolution::Subscribed { topic } => {
                self.emitter.emit(LifecycleEventKind::Subscribed { topic });
            }
            Resolution::Unsubscribed { topic } => {
                self.emitter.emit(LifecycleEventKind::Unsubscribed { topic });
            }
            Resolution::Unmatched { correlation_key } => {
                self.emitter.emit(LifecycleEventKind::Warning {
                    message: format!(
                        "Dropping confirmation with no pending request: {correlation_key}"
                    ),
                });
            }
            Resolution::SubscribeFailed { .. } | Resolution::UnsubscribeFailed { .. } => {}
        }
    }

    fn apply_rejection(&mut self, correlation_key: &str, info: &str) {
        let reason = crate::error::sanitize_error_message(info);
        match self.registry.reject(correlation_key) {
            Resolution::SubscribeFailed { topic } => {
                self.emitter.emit(LifecycleEventKind::SubscriptionError {
                    topic,
                    reason,
                    state: SubscriptionState::Failed,
                });
            }
            Resolution::UnsubscribeFailed { topic } => {
                self.emitter.emit(LifecycleEventKind::SubscriptionError {
                    topic,
                    reason,
                    state: SubscriptionState::Confirmed,
                });
            }
            Resolution::Unmatched { correlation_key } => {
                self.emitter.emit(LifecycleEventKind::Warning {
                    message: format!(
                        "Dropping subscription error with no pending request: {correlation_key} ({reason})"
                    ),
                });
            }
            Resolution::Subscribed { .. } | Resolution::Unsubscribed { .. } => {}
        }
    }

    async fn handle_deadlines(&mut self, now: Instant) {
        if self.connect_deadline.is_some_and(|deadline| deadline <= now) {
            self.teardown().await;
            self.emitter.emit(LifecycleEventKind::ConnectFailed {
                reason: ClientError::ConnectTimeout.to_string(),
            });
            self.settle_connect(Err(ClientError::ConnectTimeout));
        }

        for topic in self.registry.expired(now) {
            self.apply_rejection(&topic, "acknowledgement timed out");
        }
    }
}

async fn next_session_event<H: SessionHandle>(session: &mut Option<Session<H>>) -> SessionEvent {
    match session {
        // A transport that drops its event stream has lost the session.
        Some(session) => session
            .events
            .recv()
            .await
            .unwrap_or(SessionEvent::Disconnected),
        None => std::future::pending().await,
    }
}

/// `None` when the timeout reaches past what the clock can represent
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cloneable handle to a running session manager
#[derive(Clone)]
pub struct SessionClient {
    commands: mpsc::Sender<Command>,
    emitter: EventEmitter,
}

impl SessionClient {
    /// Start a session manager over `transport` and return its client
    pub fn start<T: BrokerTransport>(transport: T, options: SessionOptions) -> Self {
        SessionManager::new(transport, options).spawn()
    }

    async fn request<R>(&self, command: impl FnOnce(Reply<R>) -> Command) -> ClientResult<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        response.await.map_err(|_| ClientError::SessionClosed)
    }

    /// Connect to the broker; resolves once the broker confirms or the
    /// attempt fails
    pub async fn connect(&self, credentials: Credentials) -> ClientResult<()> {
        self.request(|reply| Command::Connect { credentials, reply })
            .await?
    }

    /// Release the session and discard every subscription
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.request(|reply| Command::Disconnect { reply }).await?
    }

    /// Register `handler` for `topic` and ask the broker to subscribe
    ///
    /// Returns once the request is issued; the acknowledgement arrives later
    /// as a `Subscribed` or `SubscriptionError` lifecycle event.
    pub async fn subscribe<F>(&self, topic: &str, handler: F) -> ClientResult<()>
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.subscribe_with(topic, Arc::new(handler)).await
    }

    pub async fn subscribe_with(&self, topic: &str, handler: MessageCallback) -> ClientResult<()> {
        let topic = topic.to_string();
        self.request(|reply| Command::Subscribe {
            topic,
            handler,
            reply,
        })
        .await?
    }

    /// Ask the broker to remove a confirmed subscription
    pub async fn unsubscribe(&self, topic: &str) -> ClientResult<()> {
        let topic = topic.to_string();
        self.request(|reply| Command::Unsubscribe { topic, reply })
            .await?
    }

    /// Publish `payload` to `topic` with best-effort delivery
    pub async fn publish<P: Into<Bytes>>(&self, topic: &str, payload: P) -> ClientResult<()> {
        let topic = topic.to_string();
        let payload = payload.into();
        self.request(|reply| Command::Publish {
            topic,
            payload,
            reply,
        })
        .await?
    }

    pub async fn connection_state(&self) -> ClientResult<ConnectionState> {
        self.request(|reply| Command::ConnectionState { reply })
            .await
    }

    pub async fn subscription_state(&self, topic: &str) -> ClientResult<Option<SubscriptionState>> {
        let topic = topic.to_string();
        self.request(|reply| Command::SubscriptionState { topic, reply })
            .await
    }

    /// Topics with a live subscription entry
    pub async fn topics(&self) -> ClientResult<Vec<String>> {
        self.request(|reply| Command::Topics { reply }).await
    }

    /// Lifecycle events emitted from now on
    pub fn events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.emitter.subscribe()
    }

    /// Stop the manager, releasing any live session
    pub async fn shutdown(&self) -> ClientResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}
