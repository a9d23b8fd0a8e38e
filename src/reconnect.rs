use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::PushConfig;
use crate::timer::ScheduledTask;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub jitter_max: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    pub fn from_config(cfg: &PushConfig) -> Self {
        Self {
            base: Duration::from_millis(cfg.reconnect_base_ms),
            cap: Duration::from_millis(cfg.reconnect_cap_ms),
            jitter_max: Duration::from_millis(cfg.reconnect_jitter_ms),
            max_attempts: cfg.max_attempts,
        }
    }

    /// `min(cap, base * 2^attempts)`, before jitter.
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    pub fn jitter(&self, rng: &mut impl Rng) -> Duration {
        let max_ms = self.jitter_max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.gen_range(0..=max_ms))
    }
}

/// Push connection lifecycle.
///
/// Invariant: `reconnect` is never pending while the state is `Connected`.
#[derive(Debug)]
pub struct ChannelManager {
    backoff: Backoff,
    state: LinkState,
    attempts: u32,
    reconnect: ScheduledTask,
}

impl ChannelManager {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            state: LinkState::Disconnected,
            attempts: 0,
            reconnect: ScheduledTask::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect.deadline()
    }

    pub fn begin_connect(&mut self) {
        self.state = LinkState::Connecting;
    }

    pub fn on_connected(&mut self) {
        self.reconnect.cancel();
        self.attempts = 0;
        self.state = LinkState::Connected;
    }

    /// Close or connect failure. Schedules one reconnect and returns its delay, or `None`
    /// when a reconnect is already pending.
    pub fn on_disconnected(&mut self, now: Instant, rng: &mut impl Rng) -> Option<Duration> {
        if self.reconnect.is_pending() {
            return None;
        }
        let delay = self.backoff.delay(self.attempts) + self.backoff.jitter(rng);
        self.attempts = (self.attempts + 1).min(self.backoff.max_attempts);
        self.reconnect.schedule_if_absent(now + delay);
        self.state = LinkState::Reconnecting;
        Some(delay)
    }

    /// True when the reconnect timer has elapsed and a new connect should start.
    pub fn take_reconnect_due(&mut self, now: Instant) -> bool {
        if !self.reconnect.take_due(now) {
            return false;
        }
        self.state = LinkState::Disconnected;
        true
    }

    pub fn shutdown(&mut self) {
        self.reconnect.cancel();
        self.state = LinkState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn backoff(jitter_ms: u64) -> Backoff {
        Backoff {
            base: Duration::from_millis(100),
            cap: Duration::from_millis(1_000),
            jitter_max: Duration::from_millis(jitter_ms),
            max_attempts: 10,
        }
    }

    #[test]
    fn delay_doubles_then_caps() {
        let b = backoff(0);
        let got: Vec<u64> = (0..6).map(|a| b.delay(a).as_millis() as u64).collect();
        assert_eq!(got, vec![100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(b.delay(40), Duration::from_millis(1_000));
    }

    #[test]
    fn delay_is_non_decreasing_in_attempts() {
        let b = backoff(0);
        for a in 0..40 {
            assert!(b.delay(a) <= b.delay(a + 1));
        }
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let b = backoff(50);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            assert!(b.jitter(&mut rng) <= Duration::from_millis(50));
        }
        assert_eq!(backoff(0).jitter(&mut rng), Duration::ZERO);
    }

    #[test]
    fn disconnect_is_idempotent_while_reconnect_pending() {
        let now = Instant::now();
        let mut rng = StdRng::seed_from_u64(1);
        let mut m = ChannelManager::new(backoff(0));
        m.begin_connect();
        assert_eq!(m.on_disconnected(now, &mut rng), Some(Duration::from_millis(100)));
        assert_eq!(m.on_disconnected(now, &mut rng), None);
        assert_eq!(m.attempts(), 1);
        assert_eq!(m.state(), LinkState::Reconnecting);
        assert_eq!(m.reconnect_deadline(), Some(now + Duration::from_millis(100)));
    }

    #[test]
    fn connect_resets_backoff_and_clears_timer() {
        let mut now = Instant::now();
        let mut rng = StdRng::seed_from_u64(1);
        let mut m = ChannelManager::new(backoff(0));
        for expected in [100, 200, 400] {
            let d = m.on_disconnected(now, &mut rng).unwrap_or_default();
            assert_eq!(d, Duration::from_millis(expected));
            now += d;
            assert!(m.take_reconnect_due(now));
            m.begin_connect();
        }
        m.on_connected();
        assert_eq!(m.attempts(), 0);
        assert_eq!(m.reconnect_deadline(), None);
        assert_eq!(m.state(), LinkState::Connected);
        assert_eq!(
            m.on_disconnected(now, &mut rng),
            Some(Duration::from_millis(100))
        );
    }

    #[test]
    fn attempts_saturate_at_ceiling() {
        let mut now = Instant::now();
        let mut rng = StdRng::seed_from_u64(1);
        let mut m = ChannelManager::new(Backoff {
            max_attempts: 3,
            ..backoff(0)
        });
        for _ in 0..10 {
            let d = m.on_disconnected(now, &mut rng).unwrap_or_default();
            now += d;
            assert!(m.take_reconnect_due(now));
        }
        assert_eq!(m.attempts(), 3);
    }

    #[test]
    fn reconnect_not_due_before_deadline() {
        let now = Instant::now();
        let mut rng = StdRng::seed_from_u64(1);
        let mut m = ChannelManager::new(backoff(0));
        m.on_disconnected(now, &mut rng);
        assert!(!m.take_reconnect_due(now + Duration::from_millis(99)));
        assert!(m.take_reconnect_due(now + Duration::from_millis(100)));
        assert_eq!(m.state(), LinkState::Disconnected);
    }
}
