// Trailing-edge throttle for outgoing traffic.
//
// The first request in a quiet period arms a deadline one window ahead.
// Later requests before the deadline ride along with it. Nothing is sent on
// the leading edge; whatever accumulated is sent when the deadline passes.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    deadline: Option<Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self { window, deadline: None }
    }

    /// Request a flush. Arms the deadline unless one is already pending.
    pub fn schedule(&mut self) {
        self.schedule_at(Instant::now());
    }

    /// Like `schedule` but with a specific timestamp (for testing).
    fn schedule_at(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.window);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm; the caller is about to flush.
    pub fn clear(&mut self) {
        self.deadline = None;
    }
}
