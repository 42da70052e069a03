use std::net::SocketAddr;
use std::time::Duration;

/// Default upper bound on ownership transfers per task.
pub const DEFAULT_MAX_HOP_COUNT: u32 = 2;
/// Default silence from the recorded leader before re-electing.
pub const DEFAULT_LEADER_TIMEOUT_SECS: u64 = 10;
/// Queue length below which this node tries to steal work.
pub const DEFAULT_UNDERLOADED_THRESHOLD: u32 = 2;
/// Queue length above which a peer is considered a steal source.
pub const DEFAULT_OVERLOADED_THRESHOLD: u32 = 10;
/// Heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
/// Bound on every outbound peer call.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 2_000;
/// Lifetime of an unconfirmed two-phase transfer reservation.
pub const DEFAULT_RESERVATION_TTL_SECS: u64 = 30;

/// How ownership moves from the donor to a stealing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    /// The donor drops the task as soon as it hands it out. A requester
    /// that then rejects the task loses it.
    #[default]
    Immediate,
    /// The donor keeps a reservation until the requester confirms or
    /// rejects the transfer; rejected or expired reservations are restored.
    TwoPhase,
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferMode::Immediate => write!(f, "immediate"),
            TransferMode::TwoPhase => write!(f, "two-phase"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub listen_addr: SocketAddr,
    pub peers: Vec<PeerConfig>,
    pub max_hop_count: u32,
    pub leader_timeout: Duration,
    pub underloaded_threshold: u32,
    pub overloaded_threshold: u32,
    pub heartbeat_interval: Duration,
    pub rpc_timeout: Duration,
    pub transfer_mode: TransferMode,
    pub reservation_ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub addr: String, // host:port format, supports both IP and hostnames
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            peers: Vec::new(),
            max_hop_count: DEFAULT_MAX_HOP_COUNT,
            leader_timeout: Duration::from_secs(DEFAULT_LEADER_TIMEOUT_SECS),
            underloaded_threshold: DEFAULT_UNDERLOADED_THRESHOLD,
            overloaded_threshold: DEFAULT_OVERLOADED_THRESHOLD,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            rpc_timeout: Duration::from_millis(DEFAULT_RPC_TIMEOUT_MS),
            transfer_mode: TransferMode::Immediate,
            reservation_ttl: Duration::from_secs(DEFAULT_RESERVATION_TTL_SECS),
        }
    }
}

impl NodeConfig {
    pub fn new(node_id: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            node_id: node_id.into(),
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, addr: impl Into<String>) -> Self {
        self.peers.push(PeerConfig { addr: addr.into() });
        self
    }

    pub fn with_transfer_mode(mut self, mode: TransferMode) -> Self {
        self.transfer_mode = mode;
        self
    }

    /// Configured peer addresses in declaration order.
    pub fn peer_addrs(&self) -> Vec<String> {
        self.peers.iter().map(|p| p.addr.clone()).collect()
    }
}

/// Parse a comma-separated `host:port` list, skipping blanks.
pub fn parse_peers(peers_str: &str) -> Vec<PeerConfig> {
    peers_str
        .split(',')
        .map(str::trim)
        .filter(|peer| !peer.is_empty())
        .filter_map(|peer| {
            if peer.rsplit_once(':').is_some_and(|(host, port)| {
                !host.is_empty() && port.parse::<u16>().is_ok()
            }) {
                Some(PeerConfig {
                    addr: peer.to_string(),
                })
            } else {
                tracing::warn!(peer, "Invalid peer format, expected host:port");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_config_default() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.node_id, "node-1");
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:50051");
        assert!(cfg.peers.is_empty());
        assert_eq!(cfg.max_hop_count, 2);
        assert_eq!(cfg.leader_timeout, Duration::from_secs(10));
        assert_eq!(cfg.underloaded_threshold, 2);
        assert_eq!(cfg.overloaded_threshold, 10);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(cfg.transfer_mode, TransferMode::Immediate);
    }

    #[test]
    fn node_config_new() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = NodeConfig::new("alpha", addr);
        assert_eq!(cfg.node_id, "alpha");
        assert_eq!(cfg.listen_addr, addr);
        assert!(cfg.peers.is_empty());
    }

    #[test]
    fn node_config_with_peer_keeps_order() {
        let cfg = NodeConfig::default()
            .with_peer("127.0.0.1:50053")
            .with_peer("127.0.0.1:50052");
        assert_eq!(
            cfg.peer_addrs(),
            vec!["127.0.0.1:50053".to_string(), "127.0.0.1:50052".to_string()]
        );
    }

    #[test]
    fn parse_peers_accepts_hosts_and_ips() {
        let peers = parse_peers("127.0.0.1:50052, node-c.internal:7000");
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].addr, "127.0.0.1:50052");
        assert_eq!(peers[1].addr, "node-c.internal:7000");
    }

    #[test]
    fn parse_peers_skips_malformed_entries() {
        assert!(parse_peers("").is_empty());
        let peers = parse_peers("nohost,:80,127.0.0.1:notaport,127.0.0.1:1");
        assert_eq!(peers, vec![PeerConfig { addr: "127.0.0.1:1".to_string() }]);
    }

    #[test]
    fn transfer_mode_display() {
        assert_eq!(TransferMode::Immediate.to_string(), "immediate");
        assert_eq!(TransferMode::TwoPhase.to_string(), "two-phase");
    }
}
