//! Impure I/O for the MQTT transport
//!
//! Each session owns a rumqttc client and a driver task that polls the event
//! loop, retries the handshake with backoff, correlates acks and forwards
//! everything to the session manager as [`SessionEvent`]s.

use super::connection::{configure_mqtt_options, qos_for, MqttError, ReconnectConfig, TopicNamespace};
use super::correlation::{AckKind, PendingAcks};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::SessionSection;
use crate::session::Credentials;
use crate::transport::{
    BrokerTransport, OutboundMessage, SessionEvent, SessionEventSender, SessionEvents,
    SessionHandle, TransportError,
};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop};
use rumqttc::Outgoing;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const REQUEST_CAPACITY: usize = 10;
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);
const DRIVER_SHUTDOWN: Duration = Duration::from_secs(2);

/// Creates MQTT-backed broker sessions
#[derive(Debug, Clone, Default)]
pub struct MqttTransport {
    reconnect_config: ReconnectConfig,
}

impl MqttTransport {
    pub fn new(reconnect_config: ReconnectConfig) -> Self {
        Self { reconnect_config }
    }

    pub fn from_config(section: &SessionSection) -> Self {
        Self::new(ReconnectConfig::with_max_attempts(section.connect_attempts))
    }

    pub fn reconnect_config(&self) -> &ReconnectConfig {
        &self.reconnect_config
    }
}

impl BrokerTransport for MqttTransport {
    type Handle = MqttSessionHandle;

    fn create_session(
        &self,
        credentials: &Credentials,
    ) -> Result<(Self::Handle, SessionEvents), TransportError> {
        let mqtt_options = configure_mqtt_options(credentials)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        debug!(host = %credentials.host, vpn = ?credentials.vpn, "Created MQTT session");

        let handle = MqttSessionHandle {
            client,
            namespace: TopicNamespace::from_vpn(credentials.vpn.as_deref()),
            pending: Arc::new(Mutex::new(PendingAcks::new())),
            reconnect_config: self.reconnect_config.clone(),
            startup: Mutex::new(Some((event_loop, events_tx))),
            shutdown_tx,
            driver: Mutex::new(None),
        };
        Ok((handle, events_rx))
    }
}

/// One MQTT session
pub struct MqttSessionHandle {
    client: AsyncClient,
    namespace: TopicNamespace,
    pending: Arc<Mutex<PendingAcks>>,
    reconnect_config: ReconnectConfig,
    /// Taken by the first connect()
    startup: Mutex<Option<(EventLoop, SessionEventSender)>>,
    shutdown_tx: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSessionHandle {
    async fn request(
        &self,
        kind: AckKind,
        topic: &str,
        correlation_key: &str,
    ) -> Result<(), TransportError> {
        let filter = self.namespace.qualify(topic);
        self.pending.lock().await.enqueue(kind, correlation_key);

        let sent = match kind {
            AckKind::Subscribe => self.client.subscribe(filter, QoS::AtLeastOnce).await,
            AckKind::Unsubscribe => self.client.unsubscribe(filter).await,
        };

        if let Err(e) = sent {
            self.pending.lock().await.cancel(kind, correlation_key);
            return Err(MqttError::RequestFailed(e).into());
        }
        Ok(())
    }
}

#[async_trait]
impl SessionHandle for MqttSessionHandle {
    async fn connect(&self) -> Result<(), TransportError> {
        let (event_loop, events_tx) = self
            .startup
            .lock()
            .await
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        let driver = SessionDriver {
            event_loop,
            forwarder: EventForwarder {
                events_tx,
                namespace: self.namespace.clone(),
                pending: self.pending.clone(),
            },
            reconnect_config: self.reconnect_config.clone(),
        };
        let handle = tokio::spawn(driver.run(self.shutdown_tx.subscribe()));
        *self.driver.lock().await = Some(handle);
        Ok(())
    }

    // Acks are always requested; the manager enforces the timeout.
    async fn subscribe(
        &self,
        topic: &str,
        _request_ack: bool,
        correlation_key: &str,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        self.request(AckKind::Subscribe, topic, correlation_key).await
    }

    async fn unsubscribe(
        &self,
        topic: &str,
        _request_ack: bool,
        correlation_key: &str,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        self.request(AckKind::Unsubscribe, topic, correlation_key)
            .await
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let topic = self.namespace.qualify(&message.destination);
        self.client
            .publish(topic, qos_for(message.delivery_mode), false, message.payload)
            .await
            .map_err(|e| MqttError::RequestFailed(e).into())
    }

    async fn dispose(&self) {
        // Never polled: dropping the event loop is enough.
        drop(self.startup.lock().await.take());

        let _ = self.client.try_disconnect();
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.driver.lock().await.take() {
            match tokio::time::timeout(DRIVER_SHUTDOWN, handle).await {
                Ok(Ok(())) => debug!("MQTT session driver stopped"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("MQTT session driver failed: {}", e),
                Err(_) => warn!("MQTT session driver did not stop in time"),
                _ => {}
            }
        }
        self.pending.lock().await.clear();
    }
}

/// Owns the event loop for one session
struct SessionDriver {
    event_loop: EventLoop,
    forwarder: EventForwarder,
    reconnect_config: ReconnectConfig,
}

impl SessionDriver {
    async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut connected = false;
        let mut failed_attempts = 0u32;
        debug!(
            max_attempts = ?self.reconnect_config.max_attempts,
            max_backoff_ms = ?self.reconnect_config.calculate_max_total_time(),
            "MQTT session driver started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // A dropped handle counts as shutdown.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        if connected {
                            self.flush_disconnect().await;
                        }
                        break;
                    }
                }
                polled = self.event_loop.poll() => {
                    match polled {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            if !self.forwarder.process_event_route(route, &mut connected).await {
                                break;
                            }
                            if connected {
                                failed_attempts = 0;
                            }
                        }
                        Err(e) => {
                            if connected {
                                error!("MQTT connection lost: {}", e);
                                self.forwarder.emit(SessionEvent::Disconnected);
                                break;
                            }

                            failed_attempts += 1;
                            if self.reconnect_config.is_exhausted(failed_attempts) {
                                error!(attempts = failed_attempts, "MQTT handshake failed: {}", e);
                                self.forwarder.emit(SessionEvent::ConnectFailed {
                                    info: e.to_string(),
                                });
                                break;
                            }

                            let delay = self.reconnect_config.calculate_backoff_delay(failed_attempts);
                            warn!(
                                attempt = failed_attempts,
                                delay_ms = delay,
                                "MQTT handshake failed, retrying: {}", e
                            );
                            if !Self::interruptible_sleep(shutdown_rx.clone(), delay).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        debug!("MQTT session driver exiting");
    }

    /// Poll until the DISCONNECT packet has left, bounded in time
    async fn flush_disconnect(&mut self) {
        let flush = async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_FLUSH, flush).await.is_err() {
            debug!("Timed out flushing MQTT disconnect");
        }
    }

    /// Returns true if the sleep completed, false if shutdown was requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }
}

/// Turns routed MQTT events into session events, correlating acks
struct EventForwarder {
    events_tx: SessionEventSender,
    namespace: TopicNamespace,
    pending: Arc<Mutex<PendingAcks>>,
}

impl EventForwarder {
    /// Returns false when the session is over
    async fn process_event_route(&self, route: EventRoute, connected: &mut bool) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                if !*connected {
                    *connected = true;
                    info!("MQTT session up");
                    self.emit(SessionEvent::Up);
                }
                true
            }
            EventRoute::MessageReceived { topic, payload } => {
                debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
                self.emit(SessionEvent::Message {
                    destination: self.namespace.strip(&topic),
                    payload,
                });
                true
            }
            EventRoute::Disconnected => {
                info!("MQTT broker closed the session");
                self.emit(SessionEvent::Disconnected);
                false
            }
            EventRoute::SubscribeSent { packet_id } => {
                self.pending.lock().await.bind(AckKind::Subscribe, packet_id);
                true
            }
            EventRoute::UnsubscribeSent { packet_id } => {
                self.pending
                    .lock()
                    .await
                    .bind(AckKind::Unsubscribe, packet_id);
                true
            }
            EventRoute::SubscribeAcknowledged { packet_id, result } => {
                let key = self
                    .pending
                    .lock()
                    .await
                    .resolve(AckKind::Subscribe, packet_id);
                match (key, result) {
                    (Some(correlation_key), Ok(())) => {
                        self.emit(SessionEvent::SubscriptionOk { correlation_key })
                    }
                    (Some(correlation_key), Err(info)) => {
                        self.emit(SessionEvent::SubscriptionError {
                            correlation_key,
                            info,
                        })
                    }
                    (None, _) => {
                        debug!(target: "mqtt_transport", "SubAck for unknown packet {}", packet_id)
                    }
                }
                true
            }
            EventRoute::UnsubscribeAcknowledged { packet_id } => {
                let key = self
                    .pending
                    .lock()
                    .await
                    .resolve(AckKind::Unsubscribe, packet_id);
                match key {
                    Some(correlation_key) => {
                        self.emit(SessionEvent::SubscriptionOk { correlation_key })
                    }
                    None => {
                        debug!(target: "mqtt_transport", "UnsubAck for unknown packet {}", packet_id)
                    }
                }
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events_tx.send(event).is_err() {
            debug!(target: "mqtt_transport", "Session owner gone, dropping event");
        }
    }
}
