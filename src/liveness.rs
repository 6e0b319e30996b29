// src/liveness.rs
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// At least one hand this frame.
    Alive,
    /// No hands, for this long since the last one.
    Idle(Duration),
    /// The timeout window just elapsed. Reported once per absence.
    Expired,
}

/// Watches for the hands going away long enough to end the session.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessMonitor {
    window: Duration,
    last_hand_seen_at: Instant,
    fired: bool,
}

impl LivenessMonitor {
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            last_hand_seen_at: now,
            fired: false,
        }
    }

    pub fn observe(&mut self, hand_count: usize, now: Instant) -> Liveness {
        if hand_count > 0 {
            self.last_hand_seen_at = now;
            self.fired = false;
            return Liveness::Alive;
        }

        let idle = now.saturating_duration_since(self.last_hand_seen_at);
        if !self.fired && idle >= self.window {
            self.fired = true;
            debug!(idle_ms = idle.as_millis() as u64, "liveness window elapsed");
            return Liveness::Expired;
        }
        Liveness::Idle(idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_exactly_once_at_window() {
        let t0 = Instant::now();
        let mut monitor = LivenessMonitor::new(Duration::from_secs(5), t0);

        assert_eq!(
            monitor.observe(0, t0 + Duration::from_millis(4999)),
            Liveness::Idle(Duration::from_millis(4999))
        );
        assert_eq!(monitor.observe(0, t0 + Duration::from_secs(5)), Liveness::Expired);
        assert!(matches!(monitor.observe(0, t0 + Duration::from_secs(6)), Liveness::Idle(_)));
        assert!(matches!(monitor.observe(0, t0 + Duration::from_secs(60)), Liveness::Idle(_)));
    }

    #[test]
    fn hand_resets_the_window() {
        let t0 = Instant::now();
        let mut monitor = LivenessMonitor::new(Duration::from_secs(5), t0);

        monitor.observe(0, t0 + Duration::from_secs(4));
        assert_eq!(monitor.observe(1, t0 + Duration::from_millis(4500)), Liveness::Alive);
        assert!(matches!(monitor.observe(0, t0 + Duration::from_secs(9)), Liveness::Idle(_)));
        assert_eq!(
            monitor.observe(0, t0 + Duration::from_millis(9500)),
            Liveness::Expired
        );
    }

    #[test]
    fn hand_clears_fired_flag() {
        let t0 = Instant::now();
        let mut monitor = LivenessMonitor::new(Duration::from_secs(1), t0);

        assert_eq!(monitor.observe(0, t0 + Duration::from_secs(1)), Liveness::Expired);
        monitor.observe(2, t0 + Duration::from_secs(2));
        assert_eq!(monitor.observe(0, t0 + Duration::from_secs(3)), Liveness::Expired);
    }
}
