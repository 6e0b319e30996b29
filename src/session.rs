// src/session.rs - One control session: capture → landmarks → features → gestures → input
use crate::action::{Action, Dispatch, Dispatcher, InputInjector};
use crate::capture::FrameSource;
use crate::features;
use crate::gesture::GestureMachine;
use crate::landmarks::{sanitize, LandmarkProvider};
use crate::levels::LevelControl;
use crate::trace::ActionRecorder;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Turns features into actions frame by frame.
pub trait Decoder {
    fn advance(&mut self, features: &features::FeatureSet) -> Vec<Action>;
    /// Halts the decoder and returns whatever must be released.
    fn shutdown(&mut self) -> Vec<Action>;
    fn restart(&mut self, now: Instant);
    fn mode_label(&self) -> &'static str;
}

impl Decoder for GestureMachine {
    fn advance(&mut self, features: &features::FeatureSet) -> Vec<Action> {
        GestureMachine::advance(self, features)
    }
    fn shutdown(&mut self) -> Vec<Action> {
        GestureMachine::shutdown(self)
    }
    fn restart(&mut self, now: Instant) {
        GestureMachine::restart(self, now)
    }
    fn mode_label(&self) -> &'static str {
        self.mode().as_str()
    }
}

impl Decoder for LevelControl {
    fn advance(&mut self, features: &features::FeatureSet) -> Vec<Action> {
        LevelControl::advance(self, features)
    }
    fn shutdown(&mut self) -> Vec<Action> {
        LevelControl::shutdown(self)
    }
    fn restart(&mut self, now: Instant) {
        LevelControl::restart(self, now)
    }
    fn mode_label(&self) -> &'static str {
        "levels"
    }
}

impl<T: Decoder + ?Sized> Decoder for Box<T> {
    fn advance(&mut self, features: &features::FeatureSet) -> Vec<Action> {
        (**self).advance(features)
    }
    fn shutdown(&mut self) -> Vec<Action> {
        (**self).shutdown()
    }
    fn restart(&mut self, now: Instant) {
        (**self).restart(now)
    }
    fn mode_label(&self) -> &'static str {
        (**self).mode_label()
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// No hands for the timeout window; the supervisor should show its idle UI.
    ReturnedToIdle,
    /// The stop flag was raised.
    Stopped,
    /// Capture failed for good.
    Aborted { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u64,
    pub frames_with_hands: u64,
    pub capture_failures: u64,
    pub provider_failures: u64,
    pub actions: u64,
    pub injection_failures: u64,
}

pub struct Session<S, P, D, I> {
    id: Uuid,
    source: S,
    provider: P,
    decoder: D,
    dispatcher: Dispatcher<I>,
    trace: Option<ActionRecorder>,
    max_consecutive_capture_failures: u32,
    started_at: Option<Instant>,
    stats: SessionStats,
}

impl<S, P, D, I> Session<S, P, D, I>
where
    S: FrameSource,
    P: LandmarkProvider,
    D: Decoder,
    I: InputInjector,
{
    pub fn new(
        source: S,
        provider: P,
        decoder: D,
        injector: I,
        max_consecutive_capture_failures: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            provider,
            decoder,
            dispatcher: Dispatcher::new(injector),
            trace: None,
            max_consecutive_capture_failures: max_consecutive_capture_failures.max(1),
            started_at: None,
            stats: SessionStats::default(),
        }
    }

    pub fn with_trace(mut self, recorder: ActionRecorder) -> Self {
        self.trace = Some(recorder);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Runs frames until the decoder hands off, `stop` is raised, or capture
    /// fails for good. Anything still held down is released before returning.
    pub fn run(&mut self, stop: &AtomicBool) -> SessionOutcome {
        info!("session started");
        let mut consecutive_failures = 0u32;

        loop {
            if stop.load(Ordering::Relaxed) {
                info!("stop requested");
                self.release();
                return SessionOutcome::Stopped;
            }

            let captured = match self.source.next_frame() {
                Ok(captured) => {
                    consecutive_failures = 0;
                    captured
                }
                Err(e) if e.is_fatal() => {
                    error!("Capture failed: {}", e);
                    self.release();
                    return SessionOutcome::Aborted { reason: e.to_string() };
                }
                Err(e) => {
                    self.stats.capture_failures += 1;
                    consecutive_failures += 1;
                    warn!(consecutive = consecutive_failures, "Skipping frame: {}", e);
                    if consecutive_failures >= self.max_consecutive_capture_failures {
                        error!(
                            "Giving up after {} consecutive capture failures",
                            consecutive_failures
                        );
                        self.release();
                        return SessionOutcome::Aborted {
                            reason: format!(
                                "{consecutive_failures} consecutive capture failures, last: {e}"
                            ),
                        };
                    }
                    continue;
                }
            };

            self.stats.frames += 1;
            let frame = captured.frame;
            self.started_at.get_or_insert(frame.captured_at);

            let hands = match self.provider.detect(&captured) {
                Ok(hands) => sanitize(hands),
                Err(e) => {
                    self.stats.provider_failures += 1;
                    warn!(seq = frame.seq, "Landmark detection failed: {}", e);
                    Vec::new()
                }
            };
            if !hands.is_empty() {
                self.stats.frames_with_hands += 1;
            }

            let features = features::extract(&frame, &hands);
            let actions = self.decoder.advance(&features);

            let hand_count = features.hand_count();
            let mut handed_off = false;
            for action in &actions {
                handed_off |= self.dispatch(frame.seq, frame.captured_at, hand_count, action);
            }
            if handed_off {
                self.release();
                return SessionOutcome::ReturnedToIdle;
            }
        }
    }

    /// Dispatches and traces one action. Returns true on handoff.
    fn dispatch(&mut self, seq: u64, at: Instant, hands: usize, action: &Action) -> bool {
        self.stats.actions += 1;
        if let Some(trace) = self.trace.as_mut() {
            let elapsed = self
                .started_at
                .map(|start| at.saturating_duration_since(start).as_secs_f64())
                .unwrap_or_default();
            if let Err(e) = trace.record(seq, elapsed, hands, self.decoder.mode_label(), action) {
                warn!("Failed to write action trace, disabling it: {:#}", e);
                self.trace = None;
            }
        }

        let result = self.dispatcher.dispatch(action);
        if result == Dispatch::Failed {
            self.stats.injection_failures += 1;
        }
        result == Dispatch::Handoff
    }

    fn release(&mut self) {
        let actions = self.decoder.shutdown();
        if !actions.is_empty() {
            debug!(count = actions.len(), "releasing held input");
        }
        let at = Instant::now();
        for action in &actions {
            self.dispatch(self.stats.frames, at, 0, action);
        }
    }

    /// Flushes the trace and logs a summary.
    pub fn finish(self) -> Result<SessionStats> {
        let stats = self.stats;
        info!(
            frames = stats.frames,
            frames_with_hands = stats.frames_with_hands,
            actions = stats.actions,
            capture_failures = stats.capture_failures,
            provider_failures = stats.provider_failures,
            injection_failures = stats.injection_failures,
            "session finished"
        );
        if let Some(trace) = self.trace {
            let path = trace.finish()?;
            info!(path = %path.display(), "action trace written");
        }
        Ok(stats)
    }
}
