use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::timeout;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;

use crate::error::{Result, TarError};
use crate::grpc::convert::{metrics_from_proto, metrics_to_proto, task_from_proto};
use crate::proto::tar_service_client::TarServiceClient;
use crate::proto::TransferConfirmation;
use crate::scheduler::{ServerMetrics, Task};

/// Cached `TarService` clients keyed by peer address.
///
/// Every call, including the connect, is bounded by `rpc_timeout`. A failed
/// call evicts the cached client so the next cycle reconnects.
pub struct PeerClients {
    pool: Mutex<HashMap<String, TarServiceClient<Channel>>>,
    rpc_timeout: Duration,
}

impl PeerClients {
    pub fn new(rpc_timeout: Duration) -> Self {
        Self {
            pool: Mutex::new(HashMap::new()),
            rpc_timeout,
        }
    }

    /// Get or create a cached connection to a peer
    async fn get_client(&self, addr: &str) -> Result<TarServiceClient<Channel>> {
        let mut pool = self.pool.lock().await;
        if let Some(client) = pool.get(addr) {
            return Ok(client.clone());
        }

        let endpoint = Endpoint::from_shared(format!("http://{}", addr))
            .map_err(|e| TarError::UnknownPeer(format!("{}: {}", addr, e)))?
            .connect_timeout(self.rpc_timeout)
            .timeout(self.rpc_timeout);

        let channel = match timeout(self.rpc_timeout, endpoint.connect()).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                return Err(TarError::PeerUnreachable {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(TarError::Timeout(addr.to_string())),
        };

        let client = TarServiceClient::new(channel);
        pool.insert(addr.to_string(), client.clone());
        Ok(client)
    }

    pub async fn evict(&self, addr: &str) {
        self.pool.lock().await.remove(addr);
    }

    async fn call<T, F, Fut>(&self, addr: &str, f: F) -> Result<T>
    where
        F: FnOnce(TarServiceClient<Channel>) -> Fut,
        Fut: Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
    {
        self.timed_call(addr, f).await.map(|(response, _)| response)
    }

    /// Like `call`, also returning how long the RPC itself took. Connection
    /// setup is not part of the measured span.
    async fn timed_call<T, F, Fut>(&self, addr: &str, f: F) -> Result<(T, Duration)>
    where
        F: FnOnce(TarServiceClient<Channel>) -> Fut,
        Fut: Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
    {
        let client = self.get_client(addr).await?;
        let started = Instant::now();
        let result = match timeout(self.rpc_timeout, f(client)).await {
            Ok(Ok(response)) => Ok((response.into_inner(), started.elapsed())),
            Ok(Err(status)) => Err(TarError::GrpcError(status)),
            Err(_) => Err(TarError::Timeout(addr.to_string())),
        };

        if let Err(ref e) = result {
            if is_connection_failure(e) {
                self.evict(addr).await;
            }
        }
        result
    }

    /// Push `local` to the peer and return the peer's own metrics together
    /// with the round-trip time of the heartbeat call.
    pub async fn heartbeat(
        &self,
        addr: &str,
        local: &ServerMetrics,
    ) -> Result<(ServerMetrics, Duration)> {
        let request = metrics_to_proto(local);
        self.timed_call(addr, |mut client| async move { client.heartbeat(request).await })
            .await
            .map(|(metrics, rtt)| (metrics_from_proto(metrics), rtt))
    }

    /// Ask the peer for a task. `Ok(None)` when it has nothing eligible.
    pub async fn request_task_transfer(
        &self,
        addr: &str,
        requester: &ServerMetrics,
    ) -> Result<Option<Task>> {
        let request = metrics_to_proto(requester);
        match self
            .call(addr, |mut client| async move {
                client.request_task_transfer(request).await
            })
            .await
        {
            Ok(task) => Ok(Some(task_from_proto(task))),
            Err(TarError::GrpcError(status)) if status.code() == Code::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Tell a two-phase donor whether the transferred task was kept.
    pub async fn confirm_task_transfer(
        &self,
        addr: &str,
        task_id: &str,
        server_id: &str,
        accepted: bool,
    ) -> Result<bool> {
        let request = TransferConfirmation {
            task_id: task_id.to_string(),
            server_id: server_id.to_string(),
            accepted,
        };
        self.call(addr, |mut client| async move {
            client.confirm_task_transfer(request).await
        })
        .await
        .map(|resp| resp.found)
    }
}

fn is_connection_failure(err: &TarError) -> bool {
    match err {
        TarError::GrpcError(status) => {
            matches!(status.code(), Code::Unavailable | Code::Unknown | Code::Cancelled)
        }
        TarError::Timeout(_) | TarError::PeerUnreachable { .. } => true,
        _ => false,
    }
}
