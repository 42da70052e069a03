//! Periodic heartbeat driver.
//!
//! One driver runs per node. Every tick it:
//!
//! 1. Reclaims expired two-phase transfer reservations
//! 2. Pushes this node's metrics to every configured peer and stores the
//!    metrics each peer answers with, stamped with the measured round trip
//! 3. Steals work from overloaded peers while this node is underloaded
//! 4. Re-runs the local leader election when the leader has gone silent
//!
//! The scheduling core's lock is only taken between peer calls, never
//! across one. A peer that fails or times out keeps its previous metrics.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{NodeConfig, TransferMode};
use crate::grpc::PeerClients;
use crate::scheduler::{LeaderLiveness, SchedulingCore, ServerMetrics};

/// What one heartbeat cycle did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    /// Server ids that answered the heartbeat.
    pub reachable: Vec<String>,
    /// Peer addresses that failed, timed out or answered with malformed metrics.
    pub unreachable: Vec<String>,
    /// Ids of tasks stolen and kept.
    pub stolen: Vec<String>,
    /// Ids of tasks stolen but rejected by the local hop limit.
    pub rejected: Vec<String>,
    /// Leader chosen by an election run this tick.
    pub elected: Option<String>,
}

pub struct HeartbeatDriver {
    config: NodeConfig,
    core: Arc<SchedulingCore>,
    peers: PeerClients,
    liveness: LeaderLiveness,
}

impl HeartbeatDriver {
    pub fn new(config: NodeConfig, core: Arc<SchedulingCore>) -> Self {
        Self {
            peers: PeerClients::new(config.rpc_timeout),
            liveness: LeaderLiveness::new(config.leader_timeout, Instant::now()),
            config,
            core,
        }
    }

    /// Tick until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            node_id = %self.config.node_id,
            interval_ms = self.config.heartbeat_interval.as_millis() as u64,
            peers = self.config.peers.len(),
            "Heartbeat driver started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(node_id = %self.config.node_id, "Heartbeat driver stopping");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.tick().await;
                    tracing::debug!(
                        reachable = report.reachable.len(),
                        unreachable = report.unreachable.len(),
                        stolen = report.stolen.len(),
                        "Heartbeat cycle complete"
                    );
                }
            }
        }
    }

    /// Run one heartbeat cycle.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        if self.config.transfer_mode == TransferMode::TwoPhase {
            self.core
                .reclaim_expired_reservations(self.config.reservation_ttl)
                .await;
        }

        let observed = self.exchange_metrics(&mut report).await;
        self.steal_from_overloaded(&observed, &mut report).await;
        self.check_leader(&mut report).await;

        report
    }

    async fn exchange_metrics(&mut self, report: &mut TickReport) -> Vec<(String, ServerMetrics)> {
        let local = self.core.local_metrics().await;
        let leader = self.core.current_leader().await;
        let mut observed = Vec::with_capacity(self.config.peers.len());

        for peer in &self.config.peers {
            match self.peers.heartbeat(&peer.addr, &local).await {
                Ok((metrics, rtt)) => {
                    if let Err(e) = metrics.validate() {
                        tracing::warn!(addr = %peer.addr, error = %e, "Ignoring malformed heartbeat answer");
                        report.unreachable.push(peer.addr.clone());
                        continue;
                    }
                    if metrics.server_id == local.server_id {
                        tracing::debug!(addr = %peer.addr, "Ignoring heartbeat answer carrying our own id");
                        continue;
                    }

                    let metrics = metrics.with_latency(rtt.as_secs_f64());
                    if leader.as_deref() == Some(metrics.server_id.as_str()) {
                        self.liveness.record_contact(Instant::now());
                    }
                    self.core.update_server_metrics(metrics.clone()).await;

                    report.reachable.push(metrics.server_id.clone());
                    observed.push((peer.addr.clone(), metrics));
                }
                Err(e) => {
                    tracing::warn!(addr = %peer.addr, error = %e, "Heartbeat failed");
                    report.unreachable.push(peer.addr.clone());
                }
            }
        }

        observed
    }

    async fn steal_from_overloaded(
        &self,
        observed: &[(String, ServerMetrics)],
        report: &mut TickReport,
    ) {
        for (addr, metrics) in observed {
            if metrics.queue_length <= self.config.overloaded_threshold {
                continue;
            }
            if self.core.task_queue_length().await >= self.config.underloaded_threshold as usize {
                break;
            }

            let requester = self.core.local_metrics().await;
            let task = match self.peers.request_task_transfer(addr, &requester).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    tracing::debug!(peer = %metrics.server_id, "Overloaded peer had no transferable task");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(peer = %metrics.server_id, addr = %addr, error = %e, "Task transfer request failed");
                    continue;
                }
            };

            let task_id = task.id.clone();
            let hop_count = task.hop_count;
            let accepted = self.core.accept_transferred_task(task).await;

            if self.config.transfer_mode == TransferMode::TwoPhase {
                if let Err(e) = self
                    .peers
                    .confirm_task_transfer(addr, &task_id, &requester.server_id, accepted)
                    .await
                {
                    tracing::warn!(task_id = %task_id, addr = %addr, error = %e, "Transfer confirmation failed");
                }
            }

            if accepted {
                tracing::info!(task_id = %task_id, from = %metrics.server_id, hop_count, "Stole task");
                report.stolen.push(task_id);
            } else {
                report.rejected.push(task_id);
            }
        }
    }

    async fn check_leader(&mut self, report: &mut TickReport) {
        let leader = self.core.current_leader().await;
        if self.liveness.should_elect(leader.as_deref(), Instant::now()) {
            if let Some(previous) = &leader {
                tracing::info!(
                    leader = %previous,
                    timeout_secs = self.config.leader_timeout.as_secs(),
                    "Leader not heard from within timeout, re-electing"
                );
            }
            report.elected = Some(self.core.elect_leader().await);
        }
    }
}
