use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::error::TarError;
use crate::grpc::convert::{
    ack_from_proto, metrics_from_proto, metrics_to_proto, task_from_proto, task_to_proto,
};
use crate::proto::tar_service_server::TarService;
use crate::proto::{
    GetNodeStatusRequest, GetNodeStatusResponse, PeerStatus, RouteTaskRequest, RouteTaskResponse,
    ServerMetrics as ProtoServerMetrics, Task as ProtoTask, TaskAck, TransferConfirmation,
    TransferConfirmationResponse,
};
use crate::scheduler::SchedulingCore;

/// gRPC adapter mapping `TarService` calls onto the scheduling core.
///
/// Requests are validated before the core is touched, so a rejected call
/// never mutates scheduling state.
pub struct TarServiceImpl {
    core: Arc<SchedulingCore>,
}

impl TarServiceImpl {
    pub fn new(core: Arc<SchedulingCore>) -> Self {
        Self { core }
    }
}

#[tonic::async_trait]
impl TarService for TarServiceImpl {
    async fn route_task(
        &self,
        request: Request<RouteTaskRequest>,
    ) -> Result<Response<RouteTaskResponse>, Status> {
        let req = request.into_inner();

        let task = req
            .task
            .ok_or_else(|| TarError::InvalidArgument("Task is required".to_string()))?;
        if task.id.trim().is_empty() {
            return Err(TarError::InvalidArgument("Task id cannot be empty".to_string()).into());
        }
        let requester = req.requester_metrics.ok_or_else(|| {
            TarError::InvalidArgument("Requester metrics are required".to_string())
        })?;

        let requester = metrics_from_proto(requester);
        let target_servers = self
            .core
            .route_task(task_from_proto(task), &requester)
            .await;

        Ok(Response::new(RouteTaskResponse {
            target_servers,
            is_coordinator: self.core.should_become_coordinator(),
        }))
    }

    async fn acknowledge_task(
        &self,
        request: Request<TaskAck>,
    ) -> Result<Response<TaskAck>, Status> {
        let req = request.into_inner();
        if req.task_id.trim().is_empty() {
            return Err(TarError::InvalidArgument("Task id cannot be empty".to_string()).into());
        }

        let mut response = req.clone();
        response.success = self.core.acknowledge_task(&ack_from_proto(req)).await;
        Ok(Response::new(response))
    }

    async fn heartbeat(
        &self,
        request: Request<ProtoServerMetrics>,
    ) -> Result<Response<ProtoServerMetrics>, Status> {
        let sender = metrics_from_proto(request.into_inner());
        sender.validate()?;

        tracing::trace!(
            from = %sender.server_id,
            queue_length = sender.queue_length,
            cpu = sender.cpu_utilization,
            "Received Heartbeat"
        );
        self.core.update_server_metrics(sender).await;

        let local = self.core.local_metrics().await;
        Ok(Response::new(metrics_to_proto(&local)))
    }

    async fn request_task_transfer(
        &self,
        request: Request<ProtoServerMetrics>,
    ) -> Result<Response<ProtoTask>, Status> {
        let requester = metrics_from_proto(request.into_inner());
        requester.validate()?;

        match self.core.request_task_transfer(&requester).await {
            Some(task) => Ok(Response::new(task_to_proto(&task))),
            None => {
                tracing::debug!(requester = %requester.server_id, "No task available for transfer");
                Err(TarError::NoTaskAvailable.into())
            }
        }
    }

    async fn confirm_task_transfer(
        &self,
        request: Request<TransferConfirmation>,
    ) -> Result<Response<TransferConfirmationResponse>, Status> {
        let req = request.into_inner();
        if req.task_id.trim().is_empty() {
            return Err(TarError::InvalidArgument("Task id cannot be empty".to_string()).into());
        }

        let found = self
            .core
            .confirm_task_transfer(&req.task_id, &req.server_id, req.accepted)
            .await;
        tracing::debug!(
            task_id = %req.task_id,
            requester = %req.server_id,
            accepted = req.accepted,
            found,
            "Transfer confirmed"
        );

        Ok(Response::new(TransferConfirmationResponse {
            task_id: req.task_id,
            found,
        }))
    }

    async fn get_node_status(
        &self,
        _request: Request<GetNodeStatusRequest>,
    ) -> Result<Response<GetNodeStatusResponse>, Status> {
        let peers = self
            .core
            .ranked_peers()
            .await
            .into_iter()
            .map(|(metrics, score)| PeerStatus {
                metrics: Some(metrics_to_proto(&metrics)),
                score,
            })
            .collect();

        Ok(Response::new(GetNodeStatusResponse {
            node_id: self.core.node_id().to_string(),
            current_leader: self.core.current_leader().await.unwrap_or_default(),
            queue_length: u32::try_from(self.core.task_queue_length().await).unwrap_or(u32::MAX),
            transfer_mode: self.core.transfer_mode().to_string(),
            peers,
        }))
    }
}
