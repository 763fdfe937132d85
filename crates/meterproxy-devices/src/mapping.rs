//! mbmd topic mapping.
//!
//! Maps the field topics published by mbmd to the canonical attribute names
//! used by the metering host:
//!
//! ```text
//! mbmd topic                         canonical attributes
//! ├─ {base}/{sensor}/Power     ──→   power_active (×-1), l1_power_active (×-1)
//! ├─ {base}/{sensor}/Sum       ──→   energy_active, l1_energy_active (+offset)
//! └─ {base}/{sensor}/Voltage   ──→   voltage_ln, l1n_voltage
//! ```
//!
//! The meter is installed counting the inverter as a load, so power readings
//! are negated.

use std::collections::HashMap;

use serde::Serialize;

/// Payload the logger publishes on the status topic while it is online.
pub const STATUS_ONLINE: &str = "connected";

/// Attributes forced to zero while the logger reports itself offline.
pub const OFFLINE_ZEROED: [&str; 3] = ["power_active", "l1_power_active", "l1_current"];

/// One canonical attribute update derived from an inbound field value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MappingEntry {
    /// Canonical attribute name
    pub attribute: &'static str,
    /// Factor applied to the raw reading (-1 negates)
    pub scale: f64,
    /// Whether the configured energy offset is added after scaling
    pub applies_energy_offset: bool,
}

impl MappingEntry {
    const fn new(attribute: &'static str, scale: f64, applies_energy_offset: bool) -> Self {
        Self {
            attribute,
            scale,
            applies_energy_offset,
        }
    }

    /// `raw * scale`, plus `energy_offset` for cumulative energy counters.
    pub fn apply(&self, raw: f64, energy_offset: f64) -> f64 {
        let value = raw * self.scale;
        if self.applies_energy_offset {
            value + energy_offset
        } else {
            value
        }
    }
}

/// mbmd field suffix and the attributes it feeds.
pub const FIELDS: [(&str, &[MappingEntry]); 8] = [
    ("ApparentPower", &[MappingEntry::new("power_apparent", 1.0, false)]),
    ("Current", &[MappingEntry::new("l1_current", 1.0, false)]),
    ("Frequency", &[MappingEntry::new("frequency", 1.0, false)]),
    (
        "Export",
        &[
            MappingEntry::new("import_energy_active", 1.0, true),
            MappingEntry::new("l1_import_energy_active", 1.0, true),
        ],
    ),
    (
        "Power",
        &[
            MappingEntry::new("power_active", -1.0, false),
            MappingEntry::new("l1_power_active", -1.0, false),
        ],
    ),
    ("ReactivePower", &[MappingEntry::new("power_reactive", -1.0, false)]),
    (
        "Sum",
        &[
            MappingEntry::new("energy_active", 1.0, true),
            MappingEntry::new("l1_energy_active", 1.0, true),
        ],
    ),
    (
        "Voltage",
        &[
            MappingEntry::new("voltage_ln", 1.0, false),
            MappingEntry::new("l1n_voltage", 1.0, false),
        ],
    ),
];

/// Immutable topic → attribute table for one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingTable {
    base_topic: String,
    sensor_name: String,
    status_topic: String,
    entries: HashMap<String, Vec<MappingEntry>>,
}

impl MappingTable {
    /// Build the table for `{base_topic}/{sensor_name}/{field}` topics.
    pub fn build(base_topic: &str, sensor_name: &str) -> Self {
        let entries = FIELDS
            .iter()
            .map(|(field, entries)| {
                (
                    format!("{}/{}/{}", base_topic, sensor_name, field),
                    entries.to_vec(),
                )
            })
            .collect();

        Self {
            base_topic: base_topic.to_string(),
            sensor_name: sensor_name.to_string(),
            status_topic: format!("{}/status", base_topic),
            entries,
        }
    }

    pub fn base_topic(&self) -> &str {
        &self.base_topic
    }

    pub fn sensor_name(&self) -> &str {
        &self.sensor_name
    }

    /// Connectivity topic of the logger (`{base}/status`).
    pub fn status_topic(&self) -> &str {
        &self.status_topic
    }

    /// Patterns to (re)subscribe after every connect.
    pub fn subscriptions(&self) -> [String; 2] {
        [
            self.status_topic.clone(),
            format!("{}/{}/#", self.base_topic, self.sensor_name),
        ]
    }

    pub fn entries(&self, topic: &str) -> Option<&[MappingEntry]> {
        self.entries.get(topic).map(Vec::as_slice)
    }

    /// Mapped topics in field order.
    pub fn topics(&self) -> Vec<String> {
        FIELDS
            .iter()
            .map(|(field, _)| format!("{}/{}/{}", self.base_topic, self.sensor_name, field))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
