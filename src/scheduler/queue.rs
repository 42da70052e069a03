use std::collections::BTreeMap;

use crate::scheduler::task::Task;

/// A task handed out under two-phase transfer, awaiting the requester's verdict.
#[derive(Debug, Clone)]
pub struct Reservation {
    /// The task as it sat in the queue, before the hop increment.
    pub task: Task,
    pub requester: String,
    /// Unix epoch milliseconds.
    pub reserved_at: i64,
}

/// Tasks owned by this node, keyed and scanned by task id.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: BTreeMap<String, Task>,
    reserved: BTreeMap<String, Reservation>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task, replacing any task queued under the same id.
    pub fn insert(&mut self, task: Task) -> Option<Task> {
        self.tasks.insert(task.id.clone(), task)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Remove and return the first task, in key order, that may still move
    /// under `max_hop_count`. Exhausted tasks stay queued.
    pub fn remove_first_transferable(&mut self, max_hop_count: u32) -> Option<Task> {
        let id = self
            .tasks
            .values()
            .find(|task| task.can_transfer(max_hop_count))
            .map(|task| task.id.clone())?;
        self.tasks.remove(&id)
    }

    /// Park a task that has left the queue until its transfer is resolved.
    pub fn reserve(&mut self, task: Task, requester: impl Into<String>, now_ms: i64) {
        self.reserved.insert(
            task.id.clone(),
            Reservation {
                task,
                requester: requester.into(),
                reserved_at: now_ms,
            },
        );
    }

    /// Drop a reservation; ownership now lives with the requester.
    pub fn commit_reservation(&mut self, id: &str) -> bool {
        self.reserved.remove(id).is_some()
    }

    /// Put a reserved task back in the queue with its original hop count.
    /// A task queued under the same id in the meantime wins.
    pub fn rollback_reservation(&mut self, id: &str) -> bool {
        match self.reserved.remove(id) {
            Some(reservation) => {
                self.tasks
                    .entry(reservation.task.id.clone())
                    .or_insert(reservation.task);
                true
            }
            None => false,
        }
    }

    /// Roll back every reservation older than `ttl_ms`. Returns the restored ids.
    pub fn reclaim_expired(&mut self, now_ms: i64, ttl_ms: i64) -> Vec<String> {
        let expired: Vec<String> = self
            .reserved
            .values()
            .filter(|r| now_ms.saturating_sub(r.reserved_at) >= ttl_ms)
            .map(|r| r.task.id.clone())
            .collect();

        for id in &expired {
            self.rollback_reservation(id);
        }
        expired
    }

    pub fn reservation(&self, id: &str) -> Option<&Reservation> {
        self.reserved.get(id)
    }

    /// Queued tasks in key order. Reserved tasks are not included.
    pub fn all_tasks(&self) -> Vec<&Task> {
        self.tasks.values().collect()
    }

    /// Number of queued tasks, excluding reservations.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn reserved_len(&self) -> usize {
        self.reserved.len()
    }
}
