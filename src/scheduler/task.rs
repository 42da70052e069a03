use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Task priority; drives the replication factor when routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Moderate,
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Moderate => write!(f, "moderate"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

/// A unit of work owned by exactly one node's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub payload: Vec<u8>,
    pub priority: Priority,
    /// Creation time, Unix epoch milliseconds.
    pub timestamp: i64,
    /// Completed ownership transfers. Never decreases.
    pub hop_count: u32,
}

impl Task {
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>, priority: Priority) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            priority,
            timestamp: Utc::now().timestamp_millis(),
            hop_count: 0,
        }
    }

    pub fn with_hop_count(mut self, hop_count: u32) -> Self {
        self.hop_count = hop_count;
        self
    }

    /// True while the task may still change owner under `max_hop_count`.
    pub fn can_transfer(&self, max_hop_count: u32) -> bool {
        self.hop_count < max_hop_count
    }
}

/// Replica acknowledgment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAck {
    pub task_id: String,
    pub server_id: String,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_at_hop_zero() {
        let task = Task::new("t1", b"data".to_vec(), Priority::Urgent);
        assert_eq!(task.hop_count, 0);
        assert_eq!(task.priority, Priority::Urgent);
        assert!(task.timestamp > 0);
    }

    #[test]
    fn can_transfer_is_strictly_below_limit() {
        let task = Task::new("t1", Vec::new(), Priority::Low).with_hop_count(1);
        assert!(task.can_transfer(2));
        assert!(!task.clone().with_hop_count(2).can_transfer(2));
        assert!(!task.with_hop_count(3).can_transfer(2));
    }
}
