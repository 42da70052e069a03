use std::time::{Duration, Instant};

/// Tracks how long the recorded leader has been silent.
///
/// The heartbeat driver records contact whenever the current leader answers
/// a heartbeat and asks [`should_elect`](Self::should_elect) once per tick.
#[derive(Debug, Clone)]
pub struct LeaderLiveness {
    leader_timeout: Duration,
    last_contact: Instant,
}

impl LeaderLiveness {
    pub fn new(leader_timeout: Duration, now: Instant) -> Self {
        Self {
            leader_timeout,
            last_contact: now,
        }
    }

    pub fn record_contact(&mut self, now: Instant) {
        self.last_contact = now;
    }

    /// Time since the leader was last heard from.
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_contact)
    }

    /// Decide whether to run a local election.
    ///
    /// Always true when no leader is recorded. Otherwise true once the
    /// silence reaches `leader_timeout`, which restarts the clock, so a
    /// leader that never answers triggers one election per timeout period.
    /// A node that elected itself never answers its own heartbeat and is
    /// therefore re-evaluated on the same schedule.
    pub fn should_elect(&mut self, leader: Option<&str>, now: Instant) -> bool {
        let due = match leader {
            None => true,
            Some(_) => self.silence(now) >= self.leader_timeout,
        };
        if due {
            self.last_contact = now;
        }
        due
    }
}
