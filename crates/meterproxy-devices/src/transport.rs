//! Publish/subscribe transport boundary.
//!
//! The runtime only needs to connect, subscribe, receive events and
//! reconnect. [`BusConnector`]/[`BusSession`] capture that surface so the
//! runtime can be driven by the rumqttc client in production and by an
//! in-memory transport in tests.

use async_trait::async_trait;

use crate::adapter::AdapterResult;
use crate::config::MbmdConfig;

/// Broker connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    /// Keep-alive interval in seconds
    pub keepalive: u64,
    pub client_id: String,
}

impl BrokerSettings {
    pub fn from_config(config: &MbmdConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            keepalive: config.keepalive,
            client_id: format!("meterproxy-{}", uuid::Uuid::new_v4()),
        }
    }
}

/// Event delivered by a session, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// Session (re)established by the transport
    Connected,
    /// Inbound publish
    Message { topic: String, payload: Vec<u8> },
    /// Session lost. `expected` is set when the drop follows [`BusSession::close`].
    Disconnected { reason: String, expected: bool },
}

/// Opens sessions to a broker.
#[async_trait]
pub trait BusConnector: Send + Sync + 'static {
    type Session: BusSession;

    /// Open a session and wait until the broker accepted it.
    async fn connect(&self, settings: &BrokerSettings) -> AdapterResult<Self::Session>;
}

/// A live broker session.
#[async_trait]
pub trait BusSession: Send + 'static {
    async fn subscribe(&mut self, pattern: &str) -> AdapterResult<()>;

    /// Wait for the next transport event.
    async fn next_event(&mut self) -> BusEvent;

    /// Re-establish a lost session on the same session object.
    async fn reconnect(&mut self) -> AdapterResult<()>;

    /// Disconnect on purpose. The resulting drop is not retried.
    async fn close(&mut self) -> AdapterResult<()>;
}

#[cfg(feature = "mqtt")]
pub use self::mqtt::{MqttConnector, MqttSession};

#[cfg(feature = "mqtt")]
mod mqtt {
    use std::time::Duration;

    use async_trait::async_trait;
    use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
    use tracing::debug;

    use super::{BrokerSettings, BusConnector, BusEvent, BusSession};
    use crate::adapter::{AdapterError, AdapterResult};

    /// Request channel capacity between client and event loop.
    const CHANNEL_CAPACITY: usize = 10;
    /// Upper bound for flushing the DISCONNECT packet on close.
    const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

    /// rumqttc-backed connector.
    #[derive(Debug, Clone, Default)]
    pub struct MqttConnector;

    impl MqttConnector {
        pub fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl BusConnector for MqttConnector {
        type Session = MqttSession;

        async fn connect(&self, settings: &BrokerSettings) -> AdapterResult<MqttSession> {
            let mut options =
                MqttOptions::new(&settings.client_id, &settings.host, settings.port);
            options.set_keep_alive(Duration::from_secs(settings.keepalive));
            options.set_clean_session(true);

            let (client, mut eventloop) = AsyncClient::new(options, CHANNEL_CAPACITY);
            await_connack(&mut eventloop).await?;

            Ok(MqttSession {
                client,
                eventloop,
                closing: false,
            })
        }
    }

    /// Session over a rumqttc client and its event loop.
    ///
    /// The event loop is only polled from [`BusSession`] calls, so all
    /// events surface on the task that owns the session.
    pub struct MqttSession {
        client: AsyncClient,
        eventloop: EventLoop,
        closing: bool,
    }

    #[async_trait]
    impl BusSession for MqttSession {
        async fn subscribe(&mut self, pattern: &str) -> AdapterResult<()> {
            self.client
                .subscribe(pattern, QoS::AtMostOnce)
                .await
                .map_err(|e| AdapterError::Communication(e.to_string()))
        }

        async fn next_event(&mut self) -> BusEvent {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return BusEvent::Connected,
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        return BusEvent::Message {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                        };
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        debug!("Broker sent DISCONNECT");
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) if self.closing => {
                        return BusEvent::Disconnected {
                            reason: "client disconnect".to_string(),
                            expected: true,
                        };
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return BusEvent::Disconnected {
                            reason: e.to_string(),
                            expected: self.closing,
                        };
                    }
                }
            }
        }

        async fn reconnect(&mut self) -> AdapterResult<()> {
            // rumqttc reconnects on the next poll after an error
            await_connack(&mut self.eventloop).await
        }

        async fn close(&mut self) -> AdapterResult<()> {
            self.closing = true;
            self.client
                .disconnect()
                .await
                .map_err(|e| AdapterError::Communication(e.to_string()))?;

            let flush = async {
                loop {
                    match self.eventloop.poll().await {
                        Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            };
            if tokio::time::timeout(CLOSE_TIMEOUT, flush).await.is_err() {
                debug!("Timed out flushing DISCONNECT");
            }
            Ok(())
        }
    }

    async fn await_connack(eventloop: &mut EventLoop) -> AdapterResult<()> {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(AdapterError::Connection(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let config = MbmdConfig::new("broker.lan").with_port(1884).with_keepalive(30);
        let settings = BrokerSettings::from_config(&config);

        assert_eq!(settings.host, "broker.lan");
        assert_eq!(settings.port, 1884);
        assert_eq!(settings.keepalive, 30);
        assert!(settings.client_id.starts_with("meterproxy-"));
    }

    #[test]
    fn test_client_ids_are_unique() {
        let config = MbmdConfig::default();
        assert_ne!(
            BrokerSettings::from_config(&config).client_id,
            BrokerSettings::from_config(&config).client_id
        );
    }
}
