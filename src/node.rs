use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::grpc::GrpcServer;
use crate::heartbeat::HeartbeatDriver;
use crate::scheduler::SchedulingCore;

/// Main node that orchestrates all components
pub struct Node {
    pub config: NodeConfig,
    pub core: Arc<SchedulingCore>,
    pub dashboard_addr: Option<SocketAddr>,
}

impl Node {
    pub fn new(config: NodeConfig, dashboard_addr: Option<SocketAddr>) -> Self {
        Self {
            core: Arc::new(SchedulingCore::new(&config)),
            config,
            dashboard_addr,
        }
    }

    /// Run the node until `shutdown` is cancelled.
    ///
    /// 1. Spawns the heartbeat driver (metrics exchange, stealing, leader checks)
    /// 2. Optionally spawns the dashboard server
    /// 3. Runs the gRPC server in the foreground
    ///
    /// When the server returns, for shutdown or on error, the token is
    /// cancelled and the background tasks are awaited before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the gRPC server fails to bind or serve.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
        let driver = HeartbeatDriver::new(self.config.clone(), self.core.clone());
        let driver_token = shutdown.child_token();
        let driver_handle = tokio::spawn(driver.run(driver_token));

        let dashboard_handle = self.dashboard_addr.map(|addr| {
            let state = DashboardState {
                core: self.core.clone(),
            };
            tokio::spawn(run_dashboard(addr, state, shutdown.child_token()))
        });

        let server = GrpcServer::new(self.config.listen_addr, self.core.clone());
        let result = server.run(shutdown.clone()).await;

        // Stop the background tasks even if the server exited on its own.
        shutdown.cancel();
        if let Err(e) = driver_handle.await {
            tracing::error!(error = %e, "Heartbeat driver task failed");
        }
        if let Some(handle) = dashboard_handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Dashboard task failed");
            }
        }

        tracing::info!(node_id = %self.config.node_id, "Node stopped");
        result.map_err(Into::into)
    }
}
