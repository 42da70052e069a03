use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::grpc::tar_service::TarServiceImpl;
use crate::proto::tar_service_server::TarServiceServer;
use crate::scheduler::SchedulingCore;

pub struct GrpcServer {
    addr: SocketAddr,
    core: Arc<SchedulingCore>,
}

impl GrpcServer {
    pub fn new(addr: SocketAddr, core: Arc<SchedulingCore>) -> Self {
        Self { addr, core }
    }

    /// Serve `TarService` until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        let service = TarServiceImpl::new(self.core);

        tracing::info!(addr = %self.addr, "Starting gRPC server");

        Server::builder()
            .add_service(TarServiceServer::new(service))
            .serve_with_shutdown(self.addr, shutdown.cancelled_owned())
            .await?;

        tracing::info!(addr = %self.addr, "gRPC server stopped");
        Ok(())
    }
}
