//! Composite desirability score shared by routing and leader election.
//!
//! ```text
//! score = QUEUE_WEIGHT     / (queue_length + 1)
//!       + CPU_WEIGHT       / (cpu_utilization + 1)
//!       + FRESHNESS_WEIGHT / (staleness_secs + 1)
//!       - network_latency
//! ```
//!
//! Higher is better. Latency is subtracted as-is, so a slow or distant
//! peer drops below healthy ones quickly.

use crate::scheduler::metrics::{PeerMetricsTable, ServerMetrics};
use crate::scheduler::task::Priority;

pub const QUEUE_WEIGHT: f64 = 1.5;
pub const CPU_WEIGHT: f64 = 2.0;
pub const FRESHNESS_WEIGHT: f64 = 1.0;

/// CPU utilization this node assumes for itself. Used both in the self-score
/// and in the metrics it advertises; there is no real CPU sampling.
pub const SELF_CPU_UTILIZATION: f64 = 0.5;

/// Number of configured peers reported when no metrics have arrived yet.
pub const FALLBACK_TARGETS: usize = 2;

/// Score a peer observation at `now_ms` (Unix epoch milliseconds).
pub fn peer_score(metrics: &ServerMetrics, now_ms: i64) -> f64 {
    QUEUE_WEIGHT / (f64::from(metrics.queue_length) + 1.0)
        + CPU_WEIGHT / (metrics.cpu_utilization + 1.0)
        + FRESHNESS_WEIGHT / (metrics.staleness_secs(now_ms) + 1.0)
        - metrics.network_latency
}

/// Score this node for leader election.
///
/// Deliberately asymmetric with [`peer_score`]: CPU is the fixed
/// [`SELF_CPU_UTILIZATION`], staleness is zero and there is no latency term.
pub fn self_score(local_queue_length: usize) -> f64 {
    QUEUE_WEIGHT / (local_queue_length as f64 + 1.0)
        + CPU_WEIGHT / (SELF_CPU_UTILIZATION + 1.0)
        + FRESHNESS_WEIGHT / 1.0
}

/// Replica count for a priority tier.
pub fn replication_factor(priority: Priority) -> usize {
    match priority {
        Priority::Urgent => 3,
        Priority::Moderate => 2,
        Priority::Low => 1,
    }
}

/// Sort candidates best-first. Candidates are put in ascending id order
/// first and the sort is stable, so equal scores rank by ascending id.
/// A NaN score ranks below every number.
pub fn rank(mut candidates: Vec<(String, f64)>) -> Vec<(String, f64)> {
    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    candidates.sort_by(|a, b| rank_key(b.1).total_cmp(&rank_key(a.1)));
    candidates
}

fn rank_key(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}

/// Score and rank every entry of the peer table.
pub fn rank_peers(table: &PeerMetricsTable, now_ms: i64) -> Vec<(String, f64)> {
    rank(
        table
            .iter()
            .map(|m| (m.server_id.clone(), peer_score(m, now_ms)))
            .collect(),
    )
}
