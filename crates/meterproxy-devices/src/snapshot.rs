//! Latest-value cache of canonical attributes.

use std::collections::HashMap;

use dashmap::DashMap;

/// Latest known value per canonical attribute.
///
/// Written by the dispatch task, read by any number of callers. Each key is
/// updated atomically; a reader never sees a torn value. Absent keys have
/// never been observed, which is not the same as zero.
#[derive(Debug, Default)]
pub struct Snapshot {
    values: DashMap<String, f64>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, attribute: &str, value: f64) {
        self.values.insert(attribute.to_string(), value);
    }

    pub fn get(&self, attribute: &str) -> Option<f64> {
        self.values.get(attribute).map(|v| *v)
    }

    /// Owned copy of the current contents.
    pub fn to_map(&self) -> HashMap<String, f64> {
        self.values
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let snapshot = Snapshot::new();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.get("frequency"), None);

        snapshot.set("frequency", 49.9);
        snapshot.set("frequency", 50.1);
        assert_eq!(snapshot.get("frequency"), Some(50.1));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_to_map_is_a_copy() {
        let snapshot = Snapshot::new();
        snapshot.set("power_active", -1500.0);

        let copy = snapshot.to_map();
        snapshot.set("power_active", 0.0);

        assert_eq!(copy.get("power_active"), Some(&-1500.0));
        assert_eq!(snapshot.get("power_active"), Some(0.0));
    }
}
