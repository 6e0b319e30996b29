// src/levels.rs - Pinch-to-level brightness and volume control
use crate::action::{Action, LevelChannel};
use crate::config::LevelConfig;
use crate::features::FeatureSet;
use crate::liveness::{Liveness, LivenessMonitor};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Maps a thumb-index pinch onto 0..=100, clamped to the configured span.
pub fn pinch_percent(distance: f64, min_px: f64, max_px: f64) -> u8 {
    let clamped = distance.clamp(min_px, max_px);
    let fraction = (clamped - min_px) / (max_px - min_px);
    (fraction * 100.0) as u8
}

/// Each visible hand drives brightness from the left third of the frame and
/// volume from the right third. A level is re-sent only when it changes.
#[derive(Debug, Clone)]
pub struct LevelControl {
    config: LevelConfig,
    timeout: Duration,
    liveness: LivenessMonitor,
    brightness: Option<u8>,
    volume: Option<u8>,
    halted: bool,
}

impl LevelControl {
    pub fn new(config: LevelConfig, timeout: Duration, now: Instant) -> Self {
        Self {
            config,
            timeout,
            liveness: LivenessMonitor::new(timeout, now),
            brightness: None,
            volume: None,
            halted: false,
        }
    }

    pub fn advance(&mut self, features: &FeatureSet) -> Vec<Action> {
        if self.halted {
            return Vec::new();
        }

        let now = features.frame.captured_at;
        if self.liveness.observe(features.hand_count(), now) == Liveness::Expired {
            info!(timeout_secs = self.timeout.as_secs_f64(), "no hands seen, returning to idle");
            self.halted = true;
            return vec![Action::ReturnToIdle];
        }

        let third = f64::from(features.frame.width) / 3.0;
        let mut out = Vec::new();
        for hand in &features.hands {
            let channel = if hand.index_tip.x < third {
                LevelChannel::Brightness
            } else if hand.index_tip.x > 2.0 * third {
                LevelChannel::Volume
            } else {
                continue;
            };

            let percent = pinch_percent(
                hand.thumb_index_dist,
                self.config.min_pinch_px,
                self.config.max_pinch_px,
            );
            let last = match channel {
                LevelChannel::Brightness => &mut self.brightness,
                LevelChannel::Volume => &mut self.volume,
            };
            if *last != Some(percent) {
                debug!(channel = channel.as_str(), percent, "level changed");
                *last = Some(percent);
                out.push(Action::SetLevel { channel, percent });
            }
        }
        out
    }

    /// Nothing is ever held down, so there is nothing to release.
    pub fn shutdown(&mut self) -> Vec<Action> {
        self.halted = true;
        Vec::new()
    }

    pub fn restart(&mut self, now: Instant) {
        *self = Self::new(self.config.clone(), self.timeout, now);
    }

    pub fn level(&self, channel: LevelChannel) -> Option<u8> {
        match channel {
            LevelChannel::Brightness => self.brightness,
            LevelChannel::Volume => self.volume,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;
    use crate::features::extract;
    use crate::landmarks::{HandObservation, Pixel};

    fn hand_at(x: f64, pinch: f64) -> HandObservation {
        let index = Pixel::new(x, 200.0);
        HandObservation::new(Pixel::new(x, 200.0 + pinch), index, index, index)
    }

    fn feed(
        control: &mut LevelControl,
        t0: Instant,
        ms: u64,
        hands: &[HandObservation],
    ) -> Vec<Action> {
        let frame = Frame {
            seq: ms,
            captured_at: t0 + Duration::from_millis(ms),
            width: 600,
            height: 480,
        };
        control.advance(&extract(&frame, hands))
    }

    #[test]
    fn percent_is_clamped_and_truncated() {
        assert_eq!(pinch_percent(5.0, 20.0, 150.0), 0);
        assert_eq!(pinch_percent(20.0, 20.0, 150.0), 0);
        assert_eq!(pinch_percent(85.0, 20.0, 150.0), 50);
        assert_eq!(pinch_percent(100.0, 20.0, 150.0), 61);
        assert_eq!(pinch_percent(400.0, 20.0, 150.0), 100);
    }

    #[test]
    fn thirds_pick_the_channel() {
        let t0 = Instant::now();
        let mut control = LevelControl::new(LevelConfig::default(), Duration::from_secs(5), t0);

        let actions = feed(&mut control, t0, 0, &[hand_at(100.0, 85.0), hand_at(500.0, 150.0)]);
        assert_eq!(
            actions,
            vec![
                Action::SetLevel { channel: LevelChannel::Brightness, percent: 50 },
                Action::SetLevel { channel: LevelChannel::Volume, percent: 100 },
            ]
        );
        assert!(feed(&mut control, t0, 100, &[hand_at(300.0, 85.0)]).is_empty());
    }

    #[test]
    fn unchanged_level_is_not_resent() {
        let t0 = Instant::now();
        let mut control = LevelControl::new(LevelConfig::default(), Duration::from_secs(5), t0);

        assert_eq!(feed(&mut control, t0, 0, &[hand_at(500.0, 85.0)]).len(), 1);
        assert!(feed(&mut control, t0, 100, &[hand_at(500.0, 85.0)]).is_empty());
        assert_eq!(
            feed(&mut control, t0, 200, &[hand_at(500.0, 20.0)]),
            vec![Action::SetLevel { channel: LevelChannel::Volume, percent: 0 }]
        );
        assert_eq!(control.level(LevelChannel::Volume), Some(0));
    }

    #[test]
    fn times_out_after_window() {
        let t0 = Instant::now();
        let mut control = LevelControl::new(LevelConfig::default(), Duration::from_secs(5), t0);

        assert!(feed(&mut control, t0, 4900, &[]).is_empty());
        assert_eq!(feed(&mut control, t0, 5000, &[]), vec![Action::ReturnToIdle]);
        assert!(control.is_halted());
        assert!(feed(&mut control, t0, 5100, &[hand_at(100.0, 85.0)]).is_empty());

        control.restart(t0 + Duration::from_secs(6));
        assert_eq!(feed(&mut control, t0, 6100, &[hand_at(100.0, 85.0)]).len(), 1);
    }
}
