use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet,
    Publish, QoS, SubAck, SubscribeReasonCode,
};
use statum::{machine, state};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use super::config::MqttConfig;
use super::message_manager::MqttMessage;
use crate::relay::{MessageRelay, RelayError, RelayOutcome};

/// Time allowed for the DISCONNECT packet to leave on shutdown
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    Reconnecting,
}

/// Outcome counters shared with the spawned handler tasks
#[derive(Debug, Default)]
pub struct HandlingStats {
    posted: AtomicUsize,
    ignored: AtomicUsize,
    failed: AtomicUsize,
}

impl HandlingStats {
    fn record(&self, result: &Result<RelayOutcome, RelayError>) {
        let counter = match result {
            Ok(RelayOutcome::Posted(_)) => &self.posted,
            Ok(RelayOutcome::Ignored) => &self.ignored,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone, Debug, Default)]
pub struct BusStatus {
    pub connection_state: ConnectionState,
    pub messages_received: usize,
    pub messages_posted: usize,
    pub messages_ignored: usize,
    pub messages_failed: usize,
    pub last_activity: Option<DateTime<Local>>,
}

impl fmt::Display for BusStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?}: received {}, posted {}, ignored {}, failed {}",
            self.connection_state,
            self.messages_received,
            self.messages_posted,
            self.messages_ignored,
            self.messages_failed
        )?;
        if let Some(last) = self.last_activity {
            write!(f, ", last message at {}", last.format("%Y-%m-%d %H:%M:%S"))?;
        }
        Ok(())
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum BusState {
    Configured,
    Running,
}

/// Owns the broker connection and feeds every publish to the relay.
///
/// Reconnects are left to `rumqttc`: after a poll error the event loop is
/// simply polled again, which re-establishes the connection. The topic is
/// subscribed on every CONNACK since sessions are clean.
#[machine]
pub struct BusHandler<S: BusState> {
    client: AsyncClient,
    event_loop: EventLoop,
    config: MqttConfig,
    relay: Arc<MessageRelay>,
    status: BusStatus,
    stats: Arc<HandlingStats>,
    tasks: TaskTracker,
}

impl<S: BusState> BusHandler<S> {
    pub fn status(&self) -> BusStatus {
        BusStatus {
            messages_posted: self.stats.posted.load(Ordering::Relaxed),
            messages_ignored: self.stats.ignored.load(Ordering::Relaxed),
            messages_failed: self.stats.failed.load(Ordering::Relaxed),
            ..self.status.clone()
        }
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }
}

impl BusHandler<Configured> {
    pub fn create(config: MqttConfig, relay: Arc<MessageRelay>) -> Self {
        debug!("Creating bus handler for {} on {}", config.topic, config.broker);
        let (client, event_loop) = AsyncClient::new(config.mqtt_options(), config.channel_capacity);

        Self::new(
            client,
            event_loop,
            config,
            relay,
            BusStatus::default(),
            Arc::new(HandlingStats::default()),
            TaskTracker::new(),
        )
    }

    pub fn start(mut self) -> BusHandler<Running> {
        info!(
            "Connecting to {} as {}",
            self.config.broker, self.config.client_id
        );
        self.status.connection_state = ConnectionState::Connecting;
        self.transition()
    }
}

impl BusHandler<Running> {
    /// Serves the subscription until `shutdown` fires, then disconnects
    pub async fn run(mut self, shutdown: CancellationToken) -> BusStatus {
        loop {
            let polled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                event = self.event_loop.poll() => Some(event),
            };

            match polled {
                None => break,
                Some(Ok(event)) => self.handle_event(event),
                Some(Err(e)) => {
                    self.on_connection_error(e);
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }

        self.shutdown().await
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => self.on_connected(ack),
            Event::Incoming(Packet::SubAck(ack)) => self.on_subscribed(ack),
            Event::Incoming(Packet::Publish(publish)) => self.dispatch(publish),
            Event::Incoming(Packet::Disconnect) => {
                warn!("Broker closed the connection");
                self.status.connection_state = ConnectionState::Disconnected;
            }
            Event::Incoming(packet) => trace!("Incoming {:?}", packet),
            Event::Outgoing(outgoing) => trace!("Outgoing {:?}", outgoing),
        }
    }

    fn on_connected(&mut self, ack: ConnAck) {
        if ack.code != ConnectReturnCode::Success {
            error!("Broker refused connection: {:?}", ack.code);
            return;
        }
        info!("Connected");
        self.status.connection_state = ConnectionState::Connected;

        match self
            .client
            .try_subscribe(self.config.topic.clone(), QoS::ExactlyOnce)
        {
            Ok(()) => debug!("Subscription to {} requested", self.config.topic),
            Err(e) => error!("Error subscribing: {}", e),
        }
    }

    fn on_subscribed(&mut self, ack: SubAck) {
        let granted = ack
            .return_codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)));

        if granted {
            info!("Subscribed to: {}", self.config.topic);
            self.status.connection_state = ConnectionState::Subscribed;
        } else {
            error!(
                "Error subscribing to {}: {:?}",
                self.config.topic, ack.return_codes
            );
        }
    }

    fn on_connection_error(&mut self, e: ConnectionError) {
        match self.status.connection_state {
            ConnectionState::Connected | ConnectionState::Subscribed => {
                warn!("Connection lost: {}", e)
            }
            _ => warn!("Connection to {} failed: {}", self.config.broker, e),
        }
        info!(
            "Attempting to reconnect in {:?}",
            self.config.reconnect_delay
        );
        self.status.connection_state = ConnectionState::Reconnecting;
    }

    fn dispatch(&mut self, publish: Publish) {
        let message = MqttMessage::from_topic(publish.topic, publish.payload.to_vec());
        self.status.messages_received += 1;
        self.status.last_activity = Some(Local::now());
        debug!("Dispatching {}", message);

        let relay = self.relay.clone();
        let stats = self.stats.clone();
        self.tasks.spawn(async move {
            let result = relay.handle(message.topic(), message.payload()).await;
            stats.record(&result);
            if let Err(e) = result {
                error!(
                    "Dropping message from {} ({} error): {}",
                    message.topic(),
                    e.kind(),
                    e
                );
            }
        });
    }

    async fn shutdown(mut self) -> BusStatus {
        if matches!(
            self.status.connection_state,
            ConnectionState::Connected | ConnectionState::Subscribed
        ) {
            info!("Disconnecting from {}", self.config.broker);
            match self.client.try_disconnect() {
                Ok(()) => {
                    let event_loop = &mut self.event_loop;
                    let flush = async move {
                        loop {
                            match event_loop.poll().await {
                                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                                Ok(_) => {}
                                Err(e) => {
                                    debug!("Event loop closed during disconnect: {}", e);
                                    break;
                                }
                            }
                        }
                    };
                    if tokio::time::timeout(DISCONNECT_TIMEOUT, flush).await.is_err() {
                        warn!("Timed out waiting for disconnect to be sent");
                    }
                }
                Err(e) => warn!("Failed to request disconnect: {}", e),
            }
        }

        self.tasks.close();
        if !self.tasks.is_empty() {
            info!("Waiting for {} in-flight message(s)", self.tasks.len());
        }
        if tokio::time::timeout(self.config.drain_timeout, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                "{} message handler(s) still running after {:?}, abandoning",
                self.tasks.len(),
                self.config.drain_timeout
            );
        }

        self.status.connection_state = ConnectionState::Disconnected;
        let status = self.status();
        info!("Bus handler stopped ({})", status);
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::{Call, RecordingFactory};
    use crate::relay::RelaySettings;

    fn config() -> MqttConfig {
        MqttConfig {
            // Nothing listens on the discard port, so connects fail fast
            broker: "tcp://127.0.0.1:9".parse().unwrap(),
            client_id: "relay-test".to_string(),
            topic: "mastodon/post".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_millis(10),
            drain_timeout: Duration::from_secs(5),
            channel_capacity: 10,
        }
    }

    fn handler(factory: &RecordingFactory) -> BusHandler<Running> {
        let relay = MessageRelay::new(
            Arc::new(factory.clone()),
            RelaySettings {
                default_server: "https://botsin.space".to_string(),
                message_timeout: Duration::from_secs(5),
            },
        );
        BusHandler::create(config(), Arc::new(relay)).start()
    }

    fn publish(payload: &[u8]) -> Event {
        Event::Incoming(Packet::Publish(Publish::new(
            "mastodon/post",
            QoS::ExactlyOnce,
            payload.to_vec(),
        )))
    }

    #[tokio::test]
    async fn start_moves_to_connecting() {
        let handler = handler(&RecordingFactory::default());
        assert_eq!(handler.status().connection_state, ConnectionState::Connecting);
        assert_eq!(handler.config().topic, "mastodon/post");
    }

    #[tokio::test]
    async fn tracks_connection_lifecycle() {
        let mut handler = handler(&RecordingFactory::default());

        handler.handle_event(Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        ))));
        assert_eq!(handler.status().connection_state, ConnectionState::Connected);

        handler.handle_event(Event::Incoming(Packet::SubAck(SubAck::new(
            1,
            vec![SubscribeReasonCode::Failure],
        ))));
        assert_eq!(handler.status().connection_state, ConnectionState::Connected);

        handler.handle_event(Event::Incoming(Packet::SubAck(SubAck::new(
            2,
            vec![SubscribeReasonCode::Success(QoS::ExactlyOnce)],
        ))));
        assert_eq!(handler.status().connection_state, ConnectionState::Subscribed);

        handler.on_connection_error(ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert_eq!(
            handler.status().connection_state,
            ConnectionState::Reconnecting
        );
    }

    #[tokio::test]
    async fn bad_message_does_not_stop_dispatch() {
        let factory = RecordingFactory::default();
        let mut handler = handler(&factory);

        handler.handle_event(publish(b"{broken"));
        handler.handle_event(publish(br#"{"message":"no credentials"}"#));
        handler.handle_event(publish(
            br#"{"client_id":"a","client_secret":"b","user":"u","pass":"p","message":"hi"}"#,
        ));

        handler.tasks.close();
        handler.tasks.wait().await;

        let status = handler.status();
        assert_eq!(status.messages_received, 3);
        assert_eq!(status.messages_failed, 1);
        assert_eq!(status.messages_ignored, 1);
        assert_eq!(status.messages_posted, 1);
        assert!(status.last_activity.is_some());
        assert!(factory.calls().iter().any(|c| matches!(c, Call::Post(_))));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let handler = handler(&RecordingFactory::default());
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(handler.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let status = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.connection_state, ConnectionState::Disconnected);
        assert_eq!(status.messages_received, 0);
    }
}
