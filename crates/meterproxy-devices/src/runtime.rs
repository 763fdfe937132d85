//! mbmd bus subscriber runtime.
//!
//! [`MbmdAdapter::start`] blocks until the broker accepted a session, then
//! hands the session to a single background task. That task owns the
//! session for its whole life and handles, strictly one at a time:
//!
//! - on-connect: (re)subscribe to `{base}/status` and `{base}/{sensor}/#`
//! - inbound messages: update the [`Snapshot`] through the [`Dispatcher`]
//! - unexpected disconnects: sleep [`RECONNECT_DELAY`], reconnect, repeat
//!
//! Message dispatch stalls while the task is reconnecting. Nothing is
//! delivered during an outage anyway.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapter::{AdapterError, AdapterResult, ConnectionState};
use crate::config::MbmdConfig;
use crate::mapping::{MappingTable, OFFLINE_ZEROED, STATUS_ONLINE};
use crate::snapshot::Snapshot;
use crate::transport::{BrokerSettings, BusConnector, BusEvent, BusSession};

/// Fixed delay between connection attempts. No backoff, no retry cap.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// What a single inbound message did to the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Status topic reported the logger online; snapshot untouched
    LoggerOnline,
    /// Status topic reported anything else; power values zeroed
    LoggerOffline,
    /// Mapped topic; number of attributes written
    Updated(usize),
    /// Topic not mapped
    Ignored,
}

/// Applies inbound messages to the snapshot.
#[derive(Debug)]
pub struct Dispatcher {
    table: MappingTable,
    energy_offset: f64,
    snapshot: Arc<Snapshot>,
}

impl Dispatcher {
    pub fn new(table: MappingTable, energy_offset: f64, snapshot: Arc<Snapshot>) -> Self {
        Self {
            table,
            energy_offset,
            snapshot,
        }
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// Apply one message. A malformed payload leaves the snapshot untouched.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> AdapterResult<DispatchOutcome> {
        if topic == self.table.status_topic() {
            if payload == STATUS_ONLINE.as_bytes() {
                debug!("Logger status is online");
                return Ok(DispatchOutcome::LoggerOnline);
            }
            debug!("Logger status is not online, setting power values to 0");
            for attribute in OFFLINE_ZEROED {
                self.snapshot.set(attribute, 0.0);
            }
            return Ok(DispatchOutcome::LoggerOffline);
        }

        let Some(entries) = self.table.entries(topic) else {
            debug!("MQTT ignored unknown topic {}", topic);
            return Ok(DispatchOutcome::Ignored);
        };

        let raw = parse_reading(topic, payload)?;
        for entry in entries {
            self.snapshot
                .set(entry.attribute, entry.apply(raw, self.energy_offset));
        }
        Ok(DispatchOutcome::Updated(entries.len()))
    }
}

/// Payloads are UTF-8 decimal strings (e.g. `230.4`).
fn parse_reading(topic: &str, payload: &[u8]) -> AdapterResult<f64> {
    std::str::from_utf8(payload)
        .ok()
        .and_then(|text| text.trim().parse::<f64>().ok())
        .ok_or_else(|| AdapterError::MalformedPayload {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        })
}

/// Builder and entry point for the mbmd adapter.
#[derive(Debug, Clone)]
pub struct MbmdAdapter {
    config: MbmdConfig,
    retry_delay: Duration,
}

impl MbmdAdapter {
    pub fn new(config: MbmdConfig) -> Self {
        Self {
            config,
            retry_delay: RECONNECT_DELAY,
        }
    }

    /// Override the delay between connection attempts.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn config(&self) -> &MbmdConfig {
        &self.config
    }

    /// Connect to the configured MQTT broker, retrying until it succeeds.
    #[cfg(feature = "mqtt")]
    pub async fn start(self) -> RuntimeHandle {
        self.start_with(crate::transport::MqttConnector::new()).await
    }

    /// Connect through `connector`, retrying until it succeeds.
    ///
    /// Never fails: every connection error is logged and retried after the
    /// retry delay.
    pub async fn start_with<C: BusConnector>(self, connector: C) -> RuntimeHandle {
        let Self {
            config,
            retry_delay,
        } = self;

        let table = MappingTable::build(&config.base_topic, &config.sensor_name);
        let snapshot = Arc::new(Snapshot::new());
        let dispatcher = Dispatcher::new(table, config.energy_offset, snapshot.clone());
        let settings = BrokerSettings::from_config(&config);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let session = loop {
            state_tx.send_replace(ConnectionState::Connecting);
            match connector.connect(&settings).await {
                Ok(session) => break session,
                Err(e) => {
                    error!(
                        "MQTT connection failed: {}/{} ({}). Retrying in {}s.",
                        config.broker_addr(),
                        config.base_topic,
                        e,
                        retry_delay.as_secs_f64()
                    );
                    state_tx.send_replace(ConnectionState::Disconnected);
                    tokio::time::sleep(retry_delay).await;
                }
            }
        };
        state_tx.send_replace(ConnectionState::Connected);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = SessionWorker {
            session,
            dispatcher,
            endpoint: format!(
                "{}/{}/{}",
                config.broker_addr(),
                config.base_topic,
                config.sensor_name
            ),
            state: ConnectionState::Connected,
            state_tx,
            shutdown: shutdown_rx,
            retry_delay,
        };
        let task = tokio::spawn(worker.run());

        RuntimeHandle {
            config,
            snapshot,
            state: state_rx,
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Owns the session and serializes every callback on one task.
struct SessionWorker<S: BusSession> {
    session: S,
    dispatcher: Dispatcher,
    endpoint: String,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: watch::Receiver<bool>,
    retry_delay: Duration,
}

impl<S: BusSession> SessionWorker<S> {
    async fn run(mut self) {
        self.on_connect().await;

        loop {
            match self.state {
                ConnectionState::Connected => {
                    let event = tokio::select! {
                        biased;
                        _ = self.shutdown.changed() => {
                            self.close().await;
                            break;
                        }
                        event = self.session.next_event() => event,
                    };
                    if !self.handle_event(event).await {
                        break;
                    }
                }
                ConnectionState::Disconnected | ConnectionState::Connecting => {
                    if !self.reconnect().await {
                        break;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!("MQTT session worker for {} stopped", self.endpoint);
    }

    /// Returns false once the session ended on purpose.
    async fn handle_event(&mut self, event: BusEvent) -> bool {
        match event {
            BusEvent::Connected => self.on_connect().await,
            BusEvent::Message { topic, payload } => {
                debug!(
                    "MQTT message received: {}:{}",
                    topic,
                    String::from_utf8_lossy(&payload)
                );
                if let Err(e) = self.dispatcher.dispatch(&topic, &payload) {
                    warn!("Dropping MQTT message: {}", e);
                }
            }
            BusEvent::Disconnected {
                expected: true,
                reason,
            } => {
                info!("MQTT disconnected from {} ({})", self.endpoint, reason);
                return false;
            }
            BusEvent::Disconnected { reason, .. } => {
                warn!(
                    "MQTT disconnected unexpectedly: {}, trying to reconnect",
                    reason
                );
                self.set_state(ConnectionState::Disconnected);
            }
        }
        true
    }

    async fn on_connect(&mut self) {
        info!("Connected to MQTT: {}", self.endpoint);
        for pattern in self.dispatcher.table().subscriptions() {
            match self.session.subscribe(&pattern).await {
                Ok(()) => debug!("Subscribed to {}", pattern),
                Err(e) => warn!("Failed to subscribe to {}: {}", pattern, e),
            }
        }
    }

    /// Sleep-and-retry until reconnected. Returns false on shutdown.
    async fn reconnect(&mut self) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => return false,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }

            self.set_state(ConnectionState::Connecting);
            match self.session.reconnect().await {
                Ok(()) => {
                    info!("MQTT reconnected");
                    self.set_state(ConnectionState::Connected);
                    self.on_connect().await;
                    return true;
                }
                Err(e) => {
                    warn!("MQTT reconnect failed ({}), retrying...", e);
                    self.set_state(ConnectionState::Disconnected);
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.session.close().await {
            warn!("MQTT disconnect from {} failed: {}", self.endpoint, e);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

/// Handle to a started adapter.
///
/// Dropping the handle stops the background task like [`RuntimeHandle::shutdown`]
/// without waiting for it.
#[derive(Debug)]
pub struct RuntimeHandle {
    config: MbmdConfig,
    snapshot: Arc<Snapshot>,
    state: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RuntimeHandle {
    /// Current values of every attribute observed so far.
    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.snapshot.to_map()
    }

    pub fn get(&self, attribute: &str) -> Option<f64> {
        self.snapshot.get(attribute)
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn keepalive(&self) -> u64 {
        self.config.keepalive
    }

    pub fn base_topic(&self) -> &str {
        &self.config.base_topic
    }

    pub fn config(&self) -> &MbmdConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the runtime reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> AdapterResult<()> {
        let mut rx = self.state.clone();
        rx.wait_for(|current| *current == state)
            .await
            .map(|_| ())
            .map_err(|_| AdapterError::Stopped)
    }

    /// Disconnect on purpose and wait for the background task to finish.
    /// No reconnect is attempted.
    pub async fn shutdown(self) -> AdapterResult<()> {
        // Receiver is gone if the task already finished
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| AdapterError::Other(anyhow::Error::new(e)))
    }
}

/// Snapshot of an optional handle; empty when the adapter never started.
pub fn snapshot(handle: Option<&RuntimeHandle>) -> HashMap<String, f64> {
    handle.map(RuntimeHandle::snapshot).unwrap_or_default()
}
