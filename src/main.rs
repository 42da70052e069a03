use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use rand::Rng;
use serde::Serialize;
use tonic::transport::Channel;
use tracing_subscriber::EnvFilter;

use tar_node::config::{
    parse_peers, NodeConfig, TransferMode, DEFAULT_HEARTBEAT_INTERVAL_MS,
};
use tar_node::node::Node;
use tar_node::proto::tar_service_client::TarServiceClient;
use tar_node::proto::{
    GetNodeStatusRequest, Priority as ProtoPriority, RouteTaskRequest, ServerMetrics, Task,
    TaskAck,
};
use tar_node::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "tar-node")]
#[command(version)]
#[command(about = "Decentralized task allocation and routing node")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a tar-node server
    Server(ServerArgs),

    /// Task routing commands
    Task {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Node inspection commands
    Node {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: NodeCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Server ID (unique identifier for this node)
    #[arg(long, default_value = "node-1")]
    node_id: String,

    /// Host to bind the gRPC server on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on for gRPC
    #[arg(long, default_value = "50051")]
    port: u16,

    /// Port for the JSON status dashboard (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Peer addresses (comma-separated, format: "host:port")
    /// Example: "127.0.0.1:50052,127.0.0.1:50053"
    #[arg(long, default_value = "")]
    peers: String,

    /// Maximum number of ownership transfers per task
    #[arg(long, default_value = "2")]
    max_hop_count: u32,

    /// Seconds without a heartbeat answer from the leader before re-electing
    #[arg(long, default_value = "10")]
    leader_timeout: u64,

    /// Steal work while the local queue is shorter than this
    #[arg(long, default_value = "2")]
    underloaded_threshold: u32,

    /// Only steal from peers whose queue is longer than this
    #[arg(long, default_value = "10")]
    overloaded_threshold: u32,

    /// Timeout for every outbound peer call, in milliseconds
    #[arg(long, default_value = "2000")]
    rpc_timeout_ms: u64,

    /// How stolen tasks change owner
    #[arg(long, value_enum, default_value = "immediate")]
    transfer_mode: TransferModeArg,

    /// Seconds before an unconfirmed two-phase transfer is rolled back
    #[arg(long, default_value = "30")]
    reservation_ttl: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransferModeArg {
    Immediate,
    TwoPhase,
}

impl From<TransferModeArg> for TransferMode {
    fn from(arg: TransferModeArg) -> Self {
        match arg {
            TransferModeArg::Immediate => TransferMode::Immediate,
            TransferModeArg::TwoPhase => TransferMode::TwoPhase,
        }
    }
}

// =============================================================================
// Client Arguments (shared by task and node commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:50051")]
    addr: String,

    /// Server id this client reports as requester or acknowledger
    #[arg(long, default_value = "tar-client")]
    server_id: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PriorityArg {
    Low,
    Moderate,
    Urgent,
}

impl From<PriorityArg> for ProtoPriority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Low => ProtoPriority::Low,
            PriorityArg::Moderate => ProtoPriority::Moderate,
            PriorityArg::Urgent => ProtoPriority::Urgent,
        }
    }
}

// =============================================================================
// Task Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum TaskCommands {
    /// Route a task and print its replication targets
    Route {
        /// Task id (defaults to a fresh UUID)
        #[arg(long)]
        id: Option<String>,

        /// Task priority
        #[arg(long, short, value_enum, default_value = "low")]
        priority: PriorityArg,

        /// Opaque payload
        #[arg(long, default_value = "")]
        payload: String,
    },
    /// Acknowledge a task replica
    Ack {
        /// The task id
        task_id: String,
    },
    /// Pull one transferable task from the node
    Steal,
    /// Route a batch of random-priority tasks across several nodes
    Load {
        /// Number of tasks to send
        #[arg(long, default_value = "10")]
        count: u32,

        /// Pause between tasks, in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,

        /// Additional node addresses to spread the load over
        nodes: Vec<String>,
    },
}

// =============================================================================
// Node Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum NodeCommands {
    /// Show leader, queue and peer scores
    Status,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct RouteOutput {
    task_id: String,
    priority: String,
    target_servers: Vec<String>,
    is_coordinator: bool,
}

#[derive(Serialize)]
struct AckOutput {
    task_id: String,
    server_id: String,
    success: bool,
}

#[derive(Serialize)]
struct StealOutput {
    found: bool,
    task_id: Option<String>,
    hop_count: Option<u32>,
    priority: Option<String>,
}

#[derive(Serialize)]
struct PeerOutput {
    server_id: String,
    queue_length: u32,
    cpu_utilization: f64,
    last_heartbeat_ms: i64,
    network_latency_secs: f64,
    score: f64,
}

#[derive(Serialize)]
struct NodeStatusOutput {
    node_id: String,
    current_leader: Option<String>,
    queue_length: u32,
    transfer_mode: String,
    peers: Vec<PeerOutput>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn priority_to_string(priority: i32) -> String {
    match ProtoPriority::try_from(priority) {
        Ok(ProtoPriority::Urgent) => "URGENT".to_string(),
        Ok(ProtoPriority::Moderate) => "MODERATE".to_string(),
        _ => "LOW".to_string(),
    }
}

fn with_scheme(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

async fn connect(addr: &str) -> Result<TarServiceClient<Channel>, Box<dyn std::error::Error>> {
    let channel = Channel::from_shared(with_scheme(addr))?.connect().await?;
    Ok(TarServiceClient::new(channel))
}

fn requester_metrics(server_id: &str) -> ServerMetrics {
    ServerMetrics {
        server_id: server_id.to_string(),
        queue_length: 0,
        cpu_utilization: 0.0,
        last_heartbeat: Utc::now().timestamp_millis(),
        network_latency: 0.0,
    }
}

fn new_task(id: String, priority: ProtoPriority, payload: Vec<u8>) -> Task {
    Task {
        id,
        payload,
        priority: priority as i32,
        timestamp: Utc::now().timestamp_millis(),
        hop_count: 0,
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if args.node_id.trim().is_empty() {
        return Err("--node-id cannot be empty".into());
    }

    let listen_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let dashboard_addr: Option<SocketAddr> = match args.dashboard_port {
        Some(p) => Some(format!("{}:{}", args.host, p).parse()?),
        None => None,
    };

    let config = NodeConfig {
        node_id: args.node_id,
        listen_addr,
        peers: parse_peers(&args.peers),
        max_hop_count: args.max_hop_count,
        leader_timeout: Duration::from_secs(args.leader_timeout),
        underloaded_threshold: args.underloaded_threshold,
        overloaded_threshold: args.overloaded_threshold,
        heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
        rpc_timeout: Duration::from_millis(args.rpc_timeout_ms),
        transfer_mode: args.transfer_mode.into(),
        reservation_ttl: Duration::from_secs(args.reservation_ttl),
    };

    tracing::info!(
        node_id = %config.node_id,
        listen_addr = %config.listen_addr,
        dashboard_addr = ?dashboard_addr,
        peers = ?config.peer_addrs(),
        max_hop_count = config.max_hop_count,
        transfer_mode = %config.transfer_mode,
        "Starting tar-node"
    );

    let shutdown = install_shutdown_handler();
    Node::new(config, dashboard_addr).run(shutdown).await
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_task_route(
    client: &mut TarServiceClient<Channel>,
    args: &ClientArgs,
    id: Option<String>,
    priority: PriorityArg,
    payload: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let task_id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let task = new_task(task_id.clone(), priority.into(), payload.into_bytes());
    let priority_label = priority_to_string(task.priority);

    let response = client
        .route_task(RouteTaskRequest {
            task: Some(task),
            requester_metrics: Some(requester_metrics(&args.server_id)),
        })
        .await?
        .into_inner();

    match args.output {
        OutputFormat::Json => {
            let output = RouteOutput {
                task_id,
                priority: priority_label,
                target_servers: response.target_servers,
                is_coordinator: response.is_coordinator,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Task ID:     {}", task_id);
            println!("Priority:    {}", priority_label);
            println!("Coordinator: {}", response.is_coordinator);
            if response.target_servers.is_empty() {
                println!("Targets:     (none)");
            } else {
                println!("Targets:");
                for target in &response.target_servers {
                    println!("  {}", target);
                }
            }
        }
    }
    Ok(())
}

async fn handle_task_ack(
    client: &mut TarServiceClient<Channel>,
    args: &ClientArgs,
    task_id: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .acknowledge_task(TaskAck {
            task_id,
            server_id: args.server_id.clone(),
            success: false,
        })
        .await?
        .into_inner();

    match args.output {
        OutputFormat::Json => {
            let output = AckOutput {
                task_id: response.task_id,
                server_id: response.server_id,
                success: response.success,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            let result = if response.success { "accepted" } else { "rejected" };
            println!("Ack for {} from {}: {}", response.task_id, response.server_id, result);
        }
    }
    Ok(())
}

async fn handle_task_steal(
    client: &mut TarServiceClient<Channel>,
    args: &ClientArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let task = match client
        .request_task_transfer(requester_metrics(&args.server_id))
        .await
    {
        Ok(response) => Some(response.into_inner()),
        Err(status) if status.code() == tonic::Code::NotFound => None,
        Err(status) => return Err(status.into()),
    };

    match args.output {
        OutputFormat::Json => {
            let output = StealOutput {
                found: task.is_some(),
                task_id: task.as_ref().map(|t| t.id.clone()),
                hop_count: task.as_ref().map(|t| t.hop_count),
                priority: task.as_ref().map(|t| priority_to_string(t.priority)),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => match task {
            Some(task) => {
                println!("Task ID:   {}", task.id);
                println!("Priority:  {}", priority_to_string(task.priority));
                println!("Hop Count: {}", task.hop_count);
                println!("Payload:   {} bytes", task.payload.len());
            }
            None => println!("No task available."),
        },
    }
    Ok(())
}

/// Spread `count` random-priority tasks over the given nodes, one every
/// `interval_ms`, reporting each routing decision.
async fn handle_task_load(
    args: &ClientArgs,
    count: u32,
    interval_ms: u64,
    nodes: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut clients = vec![connect(&args.addr).await?];
    for node in &nodes {
        clients.push(connect(node).await?);
    }

    let priorities = [
        ProtoPriority::Low,
        ProtoPriority::Moderate,
        ProtoPriority::Urgent,
    ];
    let mut routed = Vec::with_capacity(count as usize);

    for i in 0..count {
        let (priority, index) = {
            let mut rng = rand::thread_rng();
            (
                priorities[rng.gen_range(0..priorities.len())],
                rng.gen_range(0..clients.len()),
            )
        };

        let task_id = format!("task_{}", i);
        let task = new_task(task_id.clone(), priority, format!("payload_{}", task_id).into_bytes());
        match clients[index]
            .route_task(RouteTaskRequest {
                task: Some(task),
                requester_metrics: Some(requester_metrics(&args.server_id)),
            })
            .await
        {
            Ok(response) => {
                let response = response.into_inner();
                routed.push(RouteOutput {
                    task_id: task_id.clone(),
                    priority: priority_to_string(priority as i32),
                    target_servers: response.target_servers.clone(),
                    is_coordinator: response.is_coordinator,
                });
                if let OutputFormat::Table = args.output {
                    println!(
                        "{:<10} {:<9} -> {}",
                        task_id,
                        priority_to_string(priority as i32),
                        response.target_servers.join(" ")
                    );
                }
            }
            Err(status) => {
                eprintln!("Error: RouteTask for {} failed: {}", task_id, status.message());
            }
        }

        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
    }

    if let OutputFormat::Json = args.output {
        println!("{}", serde_json::to_string_pretty(&routed)?);
    } else {
        println!();
        println!("Routed {} of {} tasks", routed.len(), count);
    }
    Ok(())
}

async fn handle_node_status(
    client: &mut TarServiceClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .get_node_status(GetNodeStatusRequest {})
        .await?
        .into_inner();

    let peers: Vec<PeerOutput> = response
        .peers
        .into_iter()
        .filter_map(|p| {
            let score = p.score;
            p.metrics.map(|m| PeerOutput {
                server_id: m.server_id,
                queue_length: m.queue_length,
                cpu_utilization: m.cpu_utilization,
                last_heartbeat_ms: m.last_heartbeat,
                network_latency_secs: m.network_latency,
                score,
            })
        })
        .collect();

    let current_leader = if response.current_leader.is_empty() {
        None
    } else {
        Some(response.current_leader)
    };

    match output_format {
        OutputFormat::Json => {
            let output = NodeStatusOutput {
                node_id: response.node_id,
                current_leader,
                queue_length: response.queue_length,
                transfer_mode: response.transfer_mode,
                peers,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Node Status");
            println!("{}", "=".repeat(40));
            println!("Node:     {}", response.node_id);
            println!(
                "Leader:   {}",
                current_leader.as_deref().unwrap_or("(not elected)")
            );
            println!("Queue:    {}", response.queue_length);
            println!("Transfer: {}", response.transfer_mode);
            println!();
            println!("Peers (best first):");
            println!(
                "{:<20} {:>6} {:>6} {:>10} {:>8}",
                "SERVER", "QUEUE", "CPU", "LATENCY", "SCORE"
            );
            println!("{}", "-".repeat(54));
            for peer in peers {
                println!(
                    "{:<20} {:>6} {:>6.2} {:>9.1}ms {:>8.3}",
                    peer.server_id,
                    peer.queue_length,
                    peer.cpu_utilization,
                    peer.network_latency_secs * 1000.0,
                    peer.score
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Task { client, command } => match command {
            TaskCommands::Route {
                id,
                priority,
                payload,
            } => {
                let mut grpc_client = connect(&client.addr).await?;
                handle_task_route(&mut grpc_client, &client, id, priority, payload).await?;
            }
            TaskCommands::Ack { task_id } => {
                let mut grpc_client = connect(&client.addr).await?;
                handle_task_ack(&mut grpc_client, &client, task_id).await?;
            }
            TaskCommands::Steal => {
                let mut grpc_client = connect(&client.addr).await?;
                handle_task_steal(&mut grpc_client, &client).await?;
            }
            TaskCommands::Load {
                count,
                interval_ms,
                nodes,
            } => {
                handle_task_load(&client, count, interval_ms, nodes).await?;
            }
        },
        Commands::Node { client, command } => {
            let mut grpc_client = connect(&client.addr).await?;
            match command {
                NodeCommands::Status => {
                    handle_node_status(&mut grpc_client, &client.output).await?;
                }
            }
        }
    }

    Ok(())
}
