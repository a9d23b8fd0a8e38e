//! Per-channel refresh scheduling and fetch-cycle coalescing.
//!
//! Pure bookkeeping: the engine asks this module *when* to run a cycle and whether a
//! cycle may start, and reports completions back.

use std::time::Duration;

use tokio::time::Instant;

use crate::timer::{earliest, ScheduledTask};
use crate::types::Channel;

#[derive(Debug)]
pub struct RefreshChannel {
    pub id: Channel,
    pub in_flight: bool,
    pub pending_rerun: bool,
    pub last_run_at: Option<Instant>,
    pub min_interval: Duration,
    pub timer: ScheduledTask,
}

/// Outcome of [`RefreshChannel::begin_cycle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleStart {
    Started,
    /// A cycle is already running; a single trailing re-run is now queued.
    Coalesced,
}

impl RefreshChannel {
    pub fn new(id: Channel, min_interval: Duration) -> Self {
        Self {
            id,
            in_flight: false,
            pending_rerun: false,
            last_run_at: None,
            min_interval,
            timer: ScheduledTask::new(),
        }
    }

    /// Arm the channel timer to fire within `within`, but never sooner than
    /// `min_interval` after the previous run. No-op while a timer is pending; the
    /// existing deadline is not shortened.
    pub fn request_refresh(&mut self, now: Instant, within: Duration) -> bool {
        if self.timer.is_pending() {
            return false;
        }
        let floor = match self.last_run_at {
            Some(last) => self
                .min_interval
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        };
        self.timer.schedule_if_absent(now + within.max(floor))
    }

    /// Timer fire: clears the timer and stamps `last_run_at`. True when a cycle should run.
    pub fn fire(&mut self, now: Instant) -> bool {
        if !self.timer.take_due(now) {
            return false;
        }
        self.last_run_at = Some(now);
        true
    }

    pub fn begin_cycle(&mut self) -> CycleStart {
        if self.in_flight {
            self.pending_rerun = true;
            return CycleStart::Coalesced;
        }
        self.in_flight = true;
        CycleStart::Started
    }

    /// Mark the running cycle done. True when exactly one follow-up must be requested.
    pub fn finish_cycle(&mut self) -> bool {
        self.in_flight = false;
        std::mem::take(&mut self.pending_rerun)
    }
}

/// The fast and slow channels.
#[derive(Debug)]
pub struct RefreshScheduler {
    fast: RefreshChannel,
    slow: RefreshChannel,
}

impl RefreshScheduler {
    pub fn new(fast_min_interval: Duration, slow_min_interval: Duration) -> Self {
        Self {
            fast: RefreshChannel::new(Channel::Fast, fast_min_interval),
            slow: RefreshChannel::new(Channel::Slow, slow_min_interval),
        }
    }

    pub fn channel_mut(&mut self, id: Channel) -> &mut RefreshChannel {
        match id {
            Channel::Fast => &mut self.fast,
            Channel::Slow => &mut self.slow,
        }
    }

    pub fn request_refresh(&mut self, id: Channel, now: Instant, within: Duration) -> bool {
        self.channel_mut(id).request_refresh(now, within)
    }

    /// Channels whose timers are due, with their timers cleared and `last_run_at` stamped.
    pub fn due(&mut self, now: Instant) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|id| self.channel_mut(*id).fire(now))
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        earliest([self.fast.timer.deadline(), self.slow.timer.deadline()])
    }
}
