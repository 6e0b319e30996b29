// src/debounce.rs
use std::time::{Duration, Instant};

/// Tracks how long a per-frame condition has held without interruption.
///
/// The start timestamp is set on the first frame the condition is true and
/// cleared on the first frame it is false, so a broken hold never carries
/// over into the next one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HoldTimer {
    since: Option<Instant>,
}

impl HoldTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one frame. Returns the continuous hold so far, or `None` (and
    /// resets) when the condition is false.
    pub fn update(&mut self, condition: bool, now: Instant) -> Option<Duration> {
        if !condition {
            self.since = None;
            return None;
        }
        let since = *self.since.get_or_insert(now);
        Some(now.saturating_duration_since(since))
    }

    pub fn held(&self, now: Instant) -> Option<Duration> {
        self.since.map(|since| now.saturating_duration_since(since))
    }

    pub fn is_running(&self) -> bool {
        self.since.is_some()
    }

    /// Restarts the hold at `now`, e.g. after a repeating action fired.
    pub fn rearm(&mut self, now: Instant) {
        self.since = Some(now);
    }

    pub fn reset(&mut self) {
        self.since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn measures_continuous_hold() {
        let t0 = Instant::now();
        let mut timer = HoldTimer::new();
        assert_eq!(timer.update(true, t0), Some(Duration::ZERO));
        assert_eq!(timer.update(true, t0 + ms(300)), Some(ms(300)));
        assert_eq!(timer.held(t0 + ms(450)), Some(ms(450)));
    }

    #[test]
    fn interruption_clears_start() {
        let t0 = Instant::now();
        let mut timer = HoldTimer::new();
        timer.update(true, t0);
        assert_eq!(timer.update(false, t0 + ms(100)), None);
        assert!(!timer.is_running());
        assert_eq!(timer.update(true, t0 + ms(200)), Some(Duration::ZERO));
        assert_eq!(timer.held(t0 + ms(250)), Some(ms(50)));
    }

    #[test]
    fn rearm_restarts_the_clock() {
        let t0 = Instant::now();
        let mut timer = HoldTimer::new();
        timer.update(true, t0);
        timer.rearm(t0 + ms(1000));
        assert_eq!(timer.update(true, t0 + ms(1400)), Some(ms(400)));
    }

    #[test]
    fn reset_stops_the_clock() {
        let t0 = Instant::now();
        let mut timer = HoldTimer::new();
        timer.update(true, t0);
        timer.reset();
        assert_eq!(timer.held(t0 + ms(100)), None);
        assert_eq!(timer.update(true, t0 + ms(200)), Some(Duration::ZERO));
    }
}
