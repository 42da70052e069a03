//! gRPC surface of a node.
//!
//! - [`tar_service`]: inbound `TarService` adapter over the scheduling core
//! - [`peer_client`]: pooled, timeout-bounded outbound calls to peers
//! - [`convert`]: protobuf <-> domain conversions
//! - [`server`]: tonic server with cooperative shutdown

pub mod convert;
pub mod peer_client;
pub mod server;
pub mod tar_service;

pub use peer_client::PeerClients;
pub use server::GrpcServer;
pub use tar_service::TarServiceImpl;
