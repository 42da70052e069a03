//! Read-only JSON view of a node's scheduling state.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::scheduler::{ServerMetrics, SchedulingCore, Task};

#[derive(Clone)]
pub struct DashboardState {
    pub core: Arc<SchedulingCore>,
}

#[derive(Serialize)]
struct NodeStatusResponse {
    node_id: String,
    current_leader: Option<String>,
    queue_length: usize,
    transfer_mode: String,
    is_coordinator: bool,
}

#[derive(Serialize)]
struct PeerResponse {
    #[serde(flatten)]
    metrics: ServerMetrics,
    score: f64,
}

#[derive(Serialize)]
struct TaskResponse {
    id: String,
    priority: String,
    hop_count: u32,
    timestamp: i64,
    payload_bytes: usize,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            priority: task.priority.to_string(),
            payload_bytes: task.payload.len(),
            hop_count: task.hop_count,
            timestamp: task.timestamp,
            id: task.id,
        }
    }
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/peers", get(peers_handler))
        .route("/api/tasks", get(tasks_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn status_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(NodeStatusResponse {
        node_id: state.core.node_id().to_string(),
        current_leader: state.core.current_leader().await,
        queue_length: state.core.task_queue_length().await,
        transfer_mode: state.core.transfer_mode().to_string(),
        is_coordinator: state.core.should_become_coordinator(),
    })
}

async fn peers_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let peers: Vec<PeerResponse> = state
        .core
        .ranked_peers()
        .await
        .into_iter()
        .map(|(metrics, score)| PeerResponse { metrics, score })
        .collect();
    Json(peers)
}

async fn tasks_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let tasks: Vec<TaskResponse> = state
        .core
        .queued_tasks()
        .await
        .into_iter()
        .map(TaskResponse::from)
        .collect();
    Json(tasks)
}
