use crate::config::{NodeConfig, TransferMode};
use crate::scheduler::metrics::{PeerMetricsTable, ServerMetrics};
use crate::scheduler::queue::TaskQueue;
use crate::scheduler::scoring::{self, FALLBACK_TARGETS, SELF_CPU_UTILIZATION};
use crate::scheduler::task::{Task, TaskAck};

/// Everything the scheduling operations read or write: peer metrics, the
/// local task queue, transfer reservations and the advisory leader.
///
/// Methods are plain synchronous transitions; callers are expected to hold
/// exclusive access for the duration of each call (see
/// [`SchedulingCore`](crate::scheduler::SchedulingCore)).
#[derive(Debug)]
pub struct SchedulerState {
    self_id: String,
    configured_peers: Vec<String>,
    max_hop_count: u32,
    transfer_mode: TransferMode,
    peer_metrics: PeerMetricsTable,
    task_queue: TaskQueue,
    current_leader: Option<String>,
}

impl SchedulerState {
    pub fn new(
        self_id: impl Into<String>,
        configured_peers: Vec<String>,
        max_hop_count: u32,
        transfer_mode: TransferMode,
    ) -> Self {
        Self {
            self_id: self_id.into(),
            configured_peers,
            max_hop_count,
            transfer_mode,
            peer_metrics: PeerMetricsTable::new(),
            task_queue: TaskQueue::new(),
            current_leader: None,
        }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(
            config.node_id.clone(),
            config.peer_addrs(),
            config.max_hop_count,
            config.transfer_mode,
        )
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn max_hop_count(&self) -> u32 {
        self.max_hop_count
    }

    pub fn transfer_mode(&self) -> TransferMode {
        self.transfer_mode
    }

    /// Pick replication targets for `task` and take local ownership of it.
    ///
    /// With no metrics yet, the first [`FALLBACK_TARGETS`] configured peers
    /// are returned unscored. Otherwise the best-ranked peers are returned,
    /// as many as the priority's replication factor allows. Either way the
    /// task is queued locally, replacing any task with the same id.
    pub fn route_task(&mut self, task: Task, now_ms: i64) -> Vec<String> {
        let targets = if self.peer_metrics.is_empty() {
            self.configured_peers
                .iter()
                .take(FALLBACK_TARGETS)
                .cloned()
                .collect()
        } else {
            let k = scoring::replication_factor(task.priority);
            scoring::rank_peers(&self.peer_metrics, now_ms)
                .into_iter()
                .take(k)
                .map(|(id, _)| id)
                .collect()
        };

        tracing::debug!(
            task_id = %task.id,
            priority = %task.priority,
            scored = !self.peer_metrics.is_empty(),
            targets = ?targets,
            "Routing decision"
        );

        self.task_queue.insert(task);
        targets
    }

    /// Record a replica acknowledgment. Always succeeds; there is no
    /// per-task replica accounting yet.
    pub fn acknowledge_task(&mut self, ack: &TaskAck) -> bool {
        tracing::info!(task_id = %ack.task_id, server_id = %ack.server_id, "Task acknowledged");
        true
    }

    pub fn update_server_metrics(&mut self, metrics: ServerMetrics) {
        tracing::debug!(
            server_id = %metrics.server_id,
            queue_length = metrics.queue_length,
            latency = metrics.network_latency,
            "Peer metrics updated"
        );
        self.peer_metrics.update(metrics);
    }

    /// Hand the first eligible task (key order, `hop_count < max_hop_count`)
    /// to `requester`, with its hop count incremented.
    ///
    /// The task leaves the queue before this returns. In
    /// [`TransferMode::Immediate`] this node forgets it entirely; in
    /// [`TransferMode::TwoPhase`] it is parked as a reservation until
    /// [`confirm_task_transfer`](Self::confirm_task_transfer).
    pub fn request_task_transfer(
        &mut self,
        requester: &ServerMetrics,
        now_ms: i64,
    ) -> Option<Task> {
        let original = self
            .task_queue
            .remove_first_transferable(self.max_hop_count)?;

        let mut transferred = original.clone();
        transferred.hop_count = transferred.hop_count.saturating_add(1);

        if self.transfer_mode == TransferMode::TwoPhase {
            self.task_queue
                .reserve(original, requester.server_id.clone(), now_ms);
        }

        tracing::info!(
            task_id = %transferred.id,
            requester = %requester.server_id,
            hop_count = transferred.hop_count,
            mode = %self.transfer_mode,
            "Task handed out for transfer"
        );
        Some(transferred)
    }

    /// Resolve a two-phase reservation on behalf of `requester`.
    ///
    /// Returns false when nothing is reserved under `task_id` (always the
    /// case in immediate mode) or when the reservation belongs to another
    /// requester. A late answer from a requester whose reservation was
    /// reclaimed and handed to someone else therefore changes nothing.
    pub fn confirm_task_transfer(
        &mut self,
        task_id: &str,
        requester: &str,
        accepted: bool,
    ) -> bool {
        let holder = match self.task_queue.reservation(task_id) {
            Some(reservation) => reservation.requester.clone(),
            None => {
                tracing::debug!(task_id, requester, accepted, "No reservation to confirm");
                return false;
            }
        };
        if holder != requester {
            tracing::warn!(
                task_id,
                requester,
                holder = %holder,
                "Ignoring transfer confirmation from a requester not holding the reservation"
            );
            return false;
        }

        let found = if accepted {
            self.task_queue.commit_reservation(task_id)
        } else {
            self.task_queue.rollback_reservation(task_id)
        };
        tracing::debug!(task_id, requester, accepted, found, "Transfer confirmation");
        found
    }

    /// Restore reservations older than `ttl_ms`.
    pub fn reclaim_expired_reservations(&mut self, now_ms: i64, ttl_ms: i64) -> Vec<String> {
        let restored = self.task_queue.reclaim_expired(now_ms, ttl_ms);
        if !restored.is_empty() {
            tracing::info!(tasks = ?restored, "Reclaimed expired transfer reservations");
        }
        restored
    }

    /// Requester side of a steal: enqueue the task only if it arrived within
    /// this node's own hop budget.
    ///
    /// A rejection is not reported to the donor here. Under immediate
    /// transfer the donor has already dropped the task, so it is lost.
    pub fn accept_transferred_task(&mut self, task: Task) -> bool {
        if task.hop_count > self.max_hop_count {
            tracing::warn!(
                task_id = %task.id,
                hop_count = task.hop_count,
                max_hop_count = self.max_hop_count,
                "Discarding transferred task over local hop limit"
            );
            return false;
        }
        self.task_queue.insert(task);
        true
    }

    pub fn add_task_to_queue(&mut self, task: Task) {
        tracing::debug!(task_id = %task.id, hop_count = task.hop_count, "Task queued");
        self.task_queue.insert(task);
    }

    /// Choose the best-scoring node among known peers and this node, record
    /// it as leader and return it. Purely local; other nodes may disagree.
    pub fn elect_leader(&mut self, now_ms: i64) -> String {
        let mut candidates: Vec<(String, f64)> = self
            .peer_metrics
            .iter()
            .filter(|m| m.server_id != self.self_id)
            .map(|m| (m.server_id.clone(), scoring::peer_score(m, now_ms)))
            .collect();
        candidates.push((
            self.self_id.clone(),
            scoring::self_score(self.task_queue.len()),
        ));

        let leader = scoring::rank(candidates)
            .into_iter()
            .next()
            .map(|(id, _)| id)
            .unwrap_or_else(|| self.self_id.clone());

        if self.current_leader.as_deref() != Some(leader.as_str()) {
            tracing::info!(
                node_id = %self.self_id,
                previous = ?self.current_leader,
                leader = %leader,
                "Leader elected"
            );
        }
        self.current_leader = Some(leader.clone());
        leader
    }

    /// Most recent election result, `None` before the first election.
    pub fn current_leader(&self) -> Option<&str> {
        self.current_leader.as_deref()
    }

    pub fn task_queue_length(&self) -> usize {
        self.task_queue.len()
    }

    /// This node's own metrics as advertised in heartbeats.
    pub fn local_metrics(&self, now_ms: i64) -> ServerMetrics {
        ServerMetrics {
            server_id: self.self_id.clone(),
            queue_length: u32::try_from(self.task_queue.len()).unwrap_or(u32::MAX),
            cpu_utilization: SELF_CPU_UTILIZATION,
            last_heartbeat: now_ms,
            network_latency: 0.0,
        }
    }

    pub fn peer_metrics(&self) -> &PeerMetricsTable {
        &self.peer_metrics
    }

    pub fn task_queue(&self) -> &TaskQueue {
        &self.task_queue
    }

    pub fn ranked_peers(&self, now_ms: i64) -> Vec<(String, f64)> {
        scoring::rank_peers(&self.peer_metrics, now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::Priority;

    const NOW: i64 = 1_700_000_000_000;

    fn state(peers: &[&str]) -> SchedulerState {
        SchedulerState::new(
            "self",
            peers.iter().map(|p| p.to_string()).collect(),
            2,
            TransferMode::Immediate,
        )
    }

    fn metrics(id: &str, queue_length: u32) -> ServerMetrics {
        ServerMetrics::new(id, queue_length, 0.5).with_last_heartbeat(NOW)
    }

    #[test]
    fn route_falls_back_to_configured_peers() {
        let mut s = state(&["p1:1", "p2:2", "p3:3"]);
        let targets = s.route_task(Task::new("t", Vec::new(), Priority::Urgent), NOW);
        assert_eq!(targets, vec!["p1:1".to_string(), "p2:2".to_string()]);
        assert_eq!(s.task_queue_length(), 1);
    }

    #[test]
    fn route_fallback_with_single_peer() {
        let mut s = state(&["p1:1"]);
        let targets = s.route_task(Task::new("t", Vec::new(), Priority::Low), NOW);
        assert_eq!(targets, vec!["p1:1".to_string()]);
    }

    #[test]
    fn route_caps_replication_at_available_peers() {
        let mut s = state(&[]);
        s.update_server_metrics(metrics("b", 1));
        s.update_server_metrics(metrics("a", 3));
        let targets = s.route_task(Task::new("t", Vec::new(), Priority::Urgent), NOW);
        assert_eq!(targets, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn transfer_increments_hop_and_removes() {
        let mut s = state(&[]);
        s.add_task_to_queue(Task::new("t", Vec::new(), Priority::Low).with_hop_count(1));
        let requester = metrics("thief", 0);

        let task = s.request_task_transfer(&requester, NOW).unwrap();
        assert_eq!(task.hop_count, 2);
        assert_eq!(s.task_queue_length(), 0);
        assert_eq!(s.task_queue().reserved_len(), 0);
        assert!(s.request_task_transfer(&requester, NOW).is_none());
    }

    #[test]
    fn two_phase_transfer_rollback_restores_task() {
        let mut s = SchedulerState::new("self", Vec::new(), 2, TransferMode::TwoPhase);
        s.add_task_to_queue(Task::new("t", Vec::new(), Priority::Low));

        let task = s.request_task_transfer(&metrics("thief", 0), NOW).unwrap();
        assert_eq!(task.hop_count, 1);
        assert_eq!(s.task_queue_length(), 0);

        assert!(s.confirm_task_transfer("t", "thief", false));
        assert_eq!(s.task_queue().get("t").unwrap().hop_count, 0);
    }

    #[test]
    fn late_confirmation_from_previous_requester_is_ignored() {
        let mut s = SchedulerState::new("self", Vec::new(), 2, TransferMode::TwoPhase);
        s.add_task_to_queue(Task::new("t", Vec::new(), Priority::Low));

        // x's reservation expires and the task is handed to y instead
        s.request_task_transfer(&metrics("x", 0), NOW).unwrap();
        assert_eq!(s.reclaim_expired_reservations(NOW + 31_000, 30_000), vec!["t"]);
        s.request_task_transfer(&metrics("y", 0), NOW + 32_000).unwrap();

        assert!(!s.confirm_task_transfer("t", "x", true));
        assert_eq!(s.task_queue().reservation("t").unwrap().requester, "y");

        assert!(s.confirm_task_transfer("t", "y", false));
        assert_eq!(s.task_queue_length(), 1);
        assert_eq!(s.task_queue().reserved_len(), 0);
    }

    #[test]
    fn accept_rejects_over_local_limit() {
        let mut s = SchedulerState::new("self", Vec::new(), 1, TransferMode::Immediate);
        let task = Task::new("t", Vec::new(), Priority::Low).with_hop_count(2);
        assert!(!s.accept_transferred_task(task));
        assert_eq!(s.task_queue_length(), 0);

        let task = Task::new("u", Vec::new(), Priority::Low).with_hop_count(1);
        assert!(s.accept_transferred_task(task));
        assert_eq!(s.task_queue_length(), 1);
    }

    #[test]
    fn elect_self_without_peers() {
        let mut s = state(&[]);
        assert!(s.current_leader().is_none());
        assert_eq!(s.elect_leader(NOW), "self");
        assert_eq!(s.current_leader(), Some("self"));
    }

    #[test]
    fn elect_prefers_self_over_loaded_peer() {
        let mut s = state(&[]);
        s.update_server_metrics(metrics("a", 50).with_latency(1.0));
        assert_eq!(s.elect_leader(NOW), "self");
    }

    #[test]
    fn elect_idle_peer_over_self() {
        let mut s = state(&[]);
        let mut idle = metrics("a", 0);
        idle.cpu_utilization = 0.0;
        s.update_server_metrics(idle);
        // 1.5 + 2.0 + 1.0 for the peer against 1.5 + 2.0/1.5 + 1.0 for self.
        assert_eq!(s.elect_leader(NOW), "a");
        assert_eq!(s.current_leader(), Some("a"));
    }

    #[test]
    fn local_metrics_reflect_queue() {
        let mut s = state(&[]);
        s.add_task_to_queue(Task::new("t", Vec::new(), Priority::Low));
        let m = s.local_metrics(NOW);
        assert_eq!(m.server_id, "self");
        assert_eq!(m.queue_length, 1);
        assert_eq!(m.cpu_utilization, SELF_CPU_UTILIZATION);
        assert_eq!(m.last_heartbeat, NOW);
    }
}
