use chrono::Utc;
use tokio::sync::Mutex;

use crate::config::{NodeConfig, TransferMode};
use crate::scheduler::metrics::ServerMetrics;
use crate::scheduler::state::SchedulerState;
use crate::scheduler::task::{Task, TaskAck};

/// Scheduling operations over one [`SchedulerState`] behind a single lock.
///
/// Every method takes the lock once, runs a bounded in-memory transition
/// and releases it; no method awaits anything else while holding it. Calls
/// on one node are therefore linearized and never observe partial updates.
#[derive(Debug)]
pub struct SchedulingCore {
    node_id: String,
    transfer_mode: TransferMode,
    state: Mutex<SchedulerState>,
}

impl SchedulingCore {
    pub fn new(config: &NodeConfig) -> Self {
        Self::from_state(SchedulerState::from_config(config))
    }

    pub fn from_state(state: SchedulerState) -> Self {
        tracing::info!(
            node_id = %state.self_id(),
            max_hop_count = state.max_hop_count(),
            transfer_mode = %state.transfer_mode(),
            "Scheduling core created"
        );
        Self {
            node_id: state.self_id().to_string(),
            transfer_mode: state.transfer_mode(),
            state: Mutex::new(state),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn transfer_mode(&self) -> TransferMode {
        self.transfer_mode
    }

    /// Ranked replication targets for `task`; the task is queued locally.
    pub async fn route_task(&self, task: Task, requester: &ServerMetrics) -> Vec<String> {
        let task_id = task.id.clone();
        let targets = self.state.lock().await.route_task(task, now_ms());
        tracing::info!(
            task_id = %task_id,
            requester = %requester.server_id,
            targets = ?targets,
            "Task routed"
        );
        targets
    }

    pub async fn acknowledge_task(&self, ack: &TaskAck) -> bool {
        self.state.lock().await.acknowledge_task(ack)
    }

    pub async fn update_server_metrics(&self, metrics: ServerMetrics) {
        self.state.lock().await.update_server_metrics(metrics);
    }

    /// Donor side of work stealing. `None` when no queued task has hop budget left.
    pub async fn request_task_transfer(&self, requester: &ServerMetrics) -> Option<Task> {
        self.state
            .lock()
            .await
            .request_task_transfer(requester, now_ms())
    }

    pub async fn confirm_task_transfer(
        &self,
        task_id: &str,
        requester: &str,
        accepted: bool,
    ) -> bool {
        self.state
            .lock()
            .await
            .confirm_task_transfer(task_id, requester, accepted)
    }

    pub async fn reclaim_expired_reservations(&self, ttl: std::time::Duration) -> Vec<String> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.state
            .lock()
            .await
            .reclaim_expired_reservations(now_ms(), ttl_ms)
    }

    /// Requester side of work stealing.
    pub async fn accept_transferred_task(&self, task: Task) -> bool {
        self.state.lock().await.accept_transferred_task(task)
    }

    pub async fn add_task_to_queue(&self, task: Task) {
        self.state.lock().await.add_task_to_queue(task);
    }

    pub async fn elect_leader(&self) -> String {
        self.state.lock().await.elect_leader(now_ms())
    }

    pub async fn current_leader(&self) -> Option<String> {
        self.state.lock().await.current_leader().map(str::to_string)
    }

    pub async fn task_queue_length(&self) -> usize {
        self.state.lock().await.task_queue_length()
    }

    pub fn should_become_coordinator(&self) -> bool {
        true
    }

    /// Metrics this node advertises about itself.
    pub async fn local_metrics(&self) -> ServerMetrics {
        self.state.lock().await.local_metrics(now_ms())
    }

    /// Known peers, best first, with their current scores.
    pub async fn ranked_peers(&self) -> Vec<(ServerMetrics, f64)> {
        let state = self.state.lock().await;
        state
            .ranked_peers(now_ms())
            .into_iter()
            .filter_map(|(id, score)| state.peer_metrics().get(&id).cloned().map(|m| (m, score)))
            .collect()
    }

    pub async fn peer_metrics(&self, server_id: &str) -> Option<ServerMetrics> {
        self.state.lock().await.peer_metrics().get(server_id).cloned()
    }

    /// Snapshot of the queued tasks in key order.
    pub async fn queued_tasks(&self) -> Vec<Task> {
        self.state
            .lock()
            .await
            .task_queue()
            .all_tasks()
            .into_iter()
            .cloned()
            .collect()
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
