use crate::proto;
use crate::scheduler::{Priority, ServerMetrics, Task, TaskAck};

pub fn priority_to_proto(priority: Priority) -> proto::Priority {
    match priority {
        Priority::Low => proto::Priority::Low,
        Priority::Moderate => proto::Priority::Moderate,
        Priority::Urgent => proto::Priority::Urgent,
    }
}

/// Unknown wire values fall into the lowest tier.
pub fn priority_from_proto(value: i32) -> Priority {
    match proto::Priority::try_from(value) {
        Ok(proto::Priority::Urgent) => Priority::Urgent,
        Ok(proto::Priority::Moderate) => Priority::Moderate,
        _ => Priority::Low,
    }
}

pub fn task_to_proto(task: &Task) -> proto::Task {
    proto::Task {
        id: task.id.clone(),
        payload: task.payload.clone(),
        priority: priority_to_proto(task.priority) as i32,
        timestamp: task.timestamp,
        hop_count: task.hop_count,
    }
}

pub fn task_from_proto(task: proto::Task) -> Task {
    Task {
        priority: priority_from_proto(task.priority),
        id: task.id,
        payload: task.payload,
        timestamp: task.timestamp,
        hop_count: task.hop_count,
    }
}

pub fn metrics_to_proto(metrics: &ServerMetrics) -> proto::ServerMetrics {
    proto::ServerMetrics {
        server_id: metrics.server_id.clone(),
        queue_length: metrics.queue_length,
        cpu_utilization: metrics.cpu_utilization,
        last_heartbeat: metrics.last_heartbeat,
        network_latency: metrics.network_latency,
    }
}

pub fn metrics_from_proto(metrics: proto::ServerMetrics) -> ServerMetrics {
    ServerMetrics {
        server_id: metrics.server_id,
        queue_length: metrics.queue_length,
        cpu_utilization: metrics.cpu_utilization,
        last_heartbeat: metrics.last_heartbeat,
        network_latency: metrics.network_latency,
    }
}

pub fn ack_from_proto(ack: proto::TaskAck) -> TaskAck {
    TaskAck {
        task_id: ack.task_id,
        server_id: ack.server_id,
        success: ack.success,
    }
}
