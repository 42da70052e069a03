use thiserror::Error;

#[derive(Error, Debug)]
pub enum TarError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No task available")]
    NoTaskAvailable,

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Peer {addr} unreachable: {reason}")]
    PeerUnreachable { addr: String, reason: String },

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("gRPC error: {0}")]
    GrpcError(#[from] tonic::Status),
}

pub type Result<T> = std::result::Result<T, TarError>;

impl From<TarError> for tonic::Status {
    fn from(err: TarError) -> Self {
        match err {
            TarError::InvalidArgument(msg) => tonic::Status::invalid_argument(msg),
            TarError::NoTaskAvailable => tonic::Status::not_found("No task available"),
            TarError::UnknownPeer(peer) => {
                tonic::Status::not_found(format!("Unknown peer {}", peer))
            }
            TarError::PeerUnreachable { .. } | TarError::Timeout(_) => {
                tonic::Status::unavailable(err.to_string())
            }
            TarError::GrpcError(status) => status,
        }
    }
}
