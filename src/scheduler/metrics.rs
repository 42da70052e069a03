use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::TarError;

/// Last-known health snapshot of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMetrics {
    pub server_id: String,
    pub queue_length: u32,
    pub cpu_utilization: f64,
    /// Unix epoch milliseconds of the observation.
    pub last_heartbeat: i64,
    /// Round-trip time in seconds from the observer's latest heartbeat; 0 until measured.
    pub network_latency: f64,
}

impl ServerMetrics {
    pub fn new(server_id: impl Into<String>, queue_length: u32, cpu_utilization: f64) -> Self {
        Self {
            server_id: server_id.into(),
            queue_length,
            cpu_utilization,
            last_heartbeat: Utc::now().timestamp_millis(),
            network_latency: 0.0,
        }
    }

    pub fn with_last_heartbeat(mut self, last_heartbeat_ms: i64) -> Self {
        self.last_heartbeat = last_heartbeat_ms;
        self
    }

    pub fn with_latency(mut self, network_latency: f64) -> Self {
        self.network_latency = network_latency;
        self
    }

    /// Reject observations that would break score monotonicity: an empty
    /// id, or a CPU utilization or latency that is negative or not finite.
    pub fn validate(&self) -> Result<(), TarError> {
        if self.server_id.trim().is_empty() {
            return Err(TarError::InvalidArgument(
                "Server id cannot be empty".to_string(),
            ));
        }
        if !self.cpu_utilization.is_finite() || self.cpu_utilization < 0.0 {
            return Err(TarError::InvalidArgument(format!(
                "cpu_utilization must be a non-negative finite number, got {}",
                self.cpu_utilization
            )));
        }
        if !self.network_latency.is_finite() || self.network_latency < 0.0 {
            return Err(TarError::InvalidArgument(format!(
                "network_latency must be a non-negative finite number, got {}",
                self.network_latency
            )));
        }
        Ok(())
    }

    /// Seconds since the observation, clamped at zero for skewed clocks.
    pub fn staleness_secs(&self, now_ms: i64) -> f64 {
        (now_ms.saturating_sub(self.last_heartbeat)).max(0) as f64 / 1000.0
    }
}

/// Peer metrics keyed by server id, iterated in ascending id order.
///
/// At most one entry per server; a new observation replaces the previous
/// one wholesale. Entries are never evicted.
#[derive(Debug, Default, Clone)]
pub struct PeerMetricsTable {
    peers: BTreeMap<String, ServerMetrics>,
}

impl PeerMetricsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an observation, overwriting any previous entry for that server.
    pub fn update(&mut self, metrics: ServerMetrics) {
        self.peers.insert(metrics.server_id.clone(), metrics);
    }

    pub fn get(&self, server_id: &str) -> Option<&ServerMetrics> {
        self.peers.get(server_id)
    }

    /// All entries in ascending server id order.
    pub fn iter(&self) -> impl Iterator<Item = &ServerMetrics> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_overwrites_whole_entry() {
        let mut table = PeerMetricsTable::new();
        table.update(ServerMetrics::new("b", 4, 0.9).with_latency(0.25));
        table.update(ServerMetrics::new("b", 1, 0.1));

        assert_eq!(table.len(), 1);
        let entry = table.get("b").unwrap();
        assert_eq!(entry.queue_length, 1);
        assert_eq!(entry.cpu_utilization, 0.1);
        // No merging: latency from the first observation is gone.
        assert_eq!(entry.network_latency, 0.0);
    }

    #[test]
    fn iterates_in_ascending_server_id_order() {
        let mut table = PeerMetricsTable::new();
        for id in ["c", "a", "b"] {
            table.update(ServerMetrics::new(id, 0, 0.0));
        }
        let ids: Vec<&str> = table.iter().map(|m| m.server_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn validate_rejects_malformed_observations() {
        assert!(ServerMetrics::new("a", 500, 0.0).validate().is_ok());
        assert!(ServerMetrics::new("", 0, 0.0).validate().is_err());
        assert!(ServerMetrics::new("a", 0, f64::NAN).validate().is_err());
        assert!(ServerMetrics::new("a", 0, -1.0).validate().is_err());
        assert!(ServerMetrics::new("a", 0, f64::INFINITY).validate().is_err());
        assert!(ServerMetrics::new("a", 0, 0.2)
            .with_latency(-0.5)
            .validate()
            .is_err());
        assert!(ServerMetrics::new("a", 0, 0.2)
            .with_latency(f64::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn staleness_in_seconds_and_clamped() {
        let metrics = ServerMetrics::new("a", 0, 0.0).with_last_heartbeat(10_000);
        assert_eq!(metrics.staleness_secs(12_500), 2.5);
        assert_eq!(metrics.staleness_secs(9_000), 0.0);
    }
}
