use tokio::time::Instant;

/// A single pending deadline with schedule-if-absent semantics.
///
/// The owner polls [`ScheduledTask::take_due`] from its event loop; nothing fires on its
/// own, so pending timers can be inspected or cancelled at any point.
#[derive(Clone, Debug, Default)]
pub struct ScheduledTask {
    deadline: Option<Instant>,
}

impl ScheduledTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer unless one is already pending. Returns true when armed.
    pub fn schedule_if_absent(&mut self, deadline: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(deadline);
        true
    }

    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm and return true if the deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(d) if d <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Earliest of several optional deadlines.
pub fn earliest(deadlines: impl IntoIterator<Item = Option<Instant>>) -> Option<Instant> {
    deadlines.into_iter().flatten().min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn schedule_is_idempotent_and_first_deadline_wins() {
        let now = Instant::now();
        let mut t = ScheduledTask::new();
        assert!(t.schedule_if_absent(now + Duration::from_millis(500)));
        assert!(!t.schedule_if_absent(now + Duration::from_millis(10)));
        assert_eq!(t.deadline(), Some(now + Duration::from_millis(500)));
    }

    #[test]
    fn take_due_only_fires_after_deadline() {
        let now = Instant::now();
        let mut t = ScheduledTask::new();
        t.schedule_if_absent(now + Duration::from_millis(100));
        assert!(!t.take_due(now));
        assert!(t.is_pending());
        assert!(t.take_due(now + Duration::from_millis(100)));
        assert!(!t.is_pending());
        assert!(!t.take_due(now + Duration::from_millis(200)));
    }

    #[test]
    fn cancel_clears_pending() {
        let now = Instant::now();
        let mut t = ScheduledTask::new();
        assert!(!t.cancel());
        t.schedule_if_absent(now);
        assert!(t.cancel());
        assert!(!t.is_pending());
    }

    #[test]
    fn earliest_ignores_unset() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);
        assert_eq!(earliest([None, Some(later), Some(now)]), Some(now));
        assert_eq!(earliest([None, None]), None);
    }
}
