//! Scheduling core: peer scoring, task routing, work stealing and
//! heuristic leader election over one shared, lock-guarded state.
//!
//! # Components
//!
//! - [`metrics`]: last-known [`ServerMetrics`] per peer
//! - [`queue`]: locally owned tasks and two-phase transfer reservations
//! - [`scoring`]: the composite desirability score and ranking
//! - [`state`]: [`SchedulerState`], the single consistency domain
//! - [`core`]: [`SchedulingCore`], the state behind one async mutex
//! - [`election`]: leader liveness tracking for the heartbeat driver

pub mod core;
pub mod election;
pub mod metrics;
pub mod queue;
pub mod scoring;
pub mod state;
pub mod task;

pub use self::core::SchedulingCore;
pub use election::LeaderLiveness;
pub use metrics::{PeerMetricsTable, ServerMetrics};
pub use queue::TaskQueue;
pub use state::SchedulerState;
pub use task::{Priority, Task, TaskAck};
