pub mod config;
pub mod dashboard;
pub mod error;
pub mod grpc;
pub mod heartbeat;
pub mod node;
pub mod scheduler;
pub mod shutdown;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("tar");
}
