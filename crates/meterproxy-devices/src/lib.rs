//! mbmd Energy Meter Adapter
//!
//! Bridges the MQTT topics published by the [mbmd](https://github.com/volkszaehler/mbmd)
//! meter daemon into a snapshot of canonical meter attributes for the
//! metering host.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `mqtt` | ✅ | rumqttc transport |
//!
//! ## Architecture
//!
//! - **MbmdConfig**: broker and topic settings with documented defaults
//! - **MappingTable**: static `{topic}/{sensor}/{field}` → attribute table
//! - **Snapshot**: latest value per attribute, readable at any time
//! - **BusConnector / BusSession**: transport boundary (rumqttc in production)
//! - **MbmdAdapter / RuntimeHandle**: connect-with-retry and the serialized
//!   dispatch task
//!
//! ```no_run
//! # async fn run() {
//! use meterproxy_devices::{MbmdAdapter, MbmdConfig};
//!
//! let handle = MbmdAdapter::new(MbmdConfig::new("broker.lan")).start().await;
//! let values = handle.snapshot();
//! # let _ = values;
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod mapping;
pub mod runtime;
pub mod snapshot;
pub mod transport;

pub use adapter::{AdapterError, AdapterResult, ConnectionState};
pub use config::MbmdConfig;
pub use mapping::{MappingEntry, MappingTable, FIELDS, OFFLINE_ZEROED, STATUS_ONLINE};
pub use runtime::{
    snapshot, DispatchOutcome, Dispatcher, MbmdAdapter, RuntimeHandle, RECONNECT_DELAY,
};
pub use snapshot::Snapshot;
pub use transport::{BrokerSettings, BusConnector, BusEvent, BusSession};

#[cfg(feature = "mqtt")]
pub use transport::{MqttConnector, MqttSession};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
