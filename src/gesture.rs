//! Gesture state machine.
//!
//! Turns the per-frame [`FeatureSet`] stream into debounced control
//! [`Action`]s. All cross-frame state lives in one [`GestureState`]; each
//! frame runs the rule table in priority order:
//!
//! | rule           | layer   | emits                                   |
//! |----------------|---------|-----------------------------------------|
//! | `show_desktop` | overlay | `ShowDesktop` (edge-triggered)          |
//! | `task_switch`  | primary | `TaskSwitchOpen/Prev/Next/Close`        |
//! | `scroll`       | primary | `Scroll` (every frame)                  |
//! | `drag`         | overlay | `DragStart`, `DragEnd`, `DoubleClick`   |
//! | `pointer`      | primary | `MoveTo`, `ClickLeft`, `ClickRight`     |
//! | `rest`         | primary | nothing                                 |
//!
//! The first primary rule that matches ends primary evaluation for the
//! frame; overlay rules always run.
//!
//! Thresholds are compared as plain levels with no hysteresis band, so a
//! pose sitting right on a boundary (e.g. thumbs at 60px) can flap between
//! task-switch entry and exit from frame to frame.

use crate::action::{Action, ScrollDirection};
use crate::config::GestureConfig;
use crate::debounce::HoldTimer;
use crate::features::FeatureSet;
use crate::liveness::{Liveness, LivenessMonitor};
use nalgebra::{Point2, Vector2};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Idle,
    Pointing,
    TwoHandActive,
    TaskSwitching,
    Dragging,
}

impl Mode {
    /// Mode implied by the hand count alone.
    fn resting(hand_count: usize) -> Self {
        match hand_count {
            0 => Mode::Idle,
            1 => Mode::Pointing,
            _ => Mode::TwoHandActive,
        }
    }

    /// Latched modes persist across frames until their exit condition.
    fn is_latched(self) -> bool {
        matches!(self, Mode::TaskSwitching | Mode::Dragging)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Pointing => "pointing",
            Mode::TwoHandActive => "two_hand",
            Mode::TaskSwitching => "task_switching",
            Mode::Dragging => "dragging",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwitchDirection {
    #[default]
    None,
    Left,
    Right,
}

/// Everything the machine remembers between frames.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureState {
    pub mode: Mode,
    pub task_switch_hold: HoldTimer,
    pub switch_dwell: HoldTimer,
    pub drag_hold: HoldTimer,
    pub task_switch_direction: SwitchDirection,
    pub smoothed_pointer: Point2<f64>,
    /// Cleared when the show-desktop pose fires, set again once the thumbs
    /// come back within the threshold.
    pub show_desktop_armed: bool,
    pub liveness: LivenessMonitor,
    /// Set by timeout or shutdown. A halted machine emits nothing.
    pub halted: bool,
}

impl GestureState {
    pub fn new(screen: (f64, f64), timeout: Duration, now: Instant) -> Self {
        Self {
            mode: Mode::Idle,
            task_switch_hold: HoldTimer::new(),
            switch_dwell: HoldTimer::new(),
            drag_hold: HoldTimer::new(),
            task_switch_direction: SwitchDirection::None,
            smoothed_pointer: Point2::new(screen.0 / 2.0, screen.1 / 2.0),
            show_desktop_armed: true,
            liveness: LivenessMonitor::new(timeout, now),
            halted: false,
        }
    }

    /// Releases whatever the machine is holding down on the OS side.
    fn release_held(&mut self) -> Vec<Action> {
        let mut out = Vec::new();
        match self.mode {
            Mode::TaskSwitching => {
                info!("releasing task switcher");
                out.push(Action::TaskSwitchClose);
            }
            Mode::Dragging => {
                info!("releasing drag");
                out.push(Action::DragEnd);
            }
            _ => {}
        }
        self.mode = Mode::Idle;
        self.task_switch_hold.reset();
        self.switch_dwell.reset();
        self.drag_hold.reset();
        self.task_switch_direction = SwitchDirection::None;
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layer {
    Primary,
    Overlay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Matched,
    Pass,
}

/// Read-only inputs every rule sees for the current frame.
struct RuleCtx<'a> {
    config: &'a GestureConfig,
    screen: (f64, f64),
    now: Instant,
}

type RuleFn = fn(&RuleCtx, &mut GestureState, &FeatureSet, &mut Vec<Action>) -> Outcome;

struct Rule {
    name: &'static str,
    layer: Layer,
    eval: RuleFn,
}

const RULES: &[Rule] = &[
    Rule {
        name: "show_desktop",
        layer: Layer::Overlay,
        eval: show_desktop,
    },
    Rule {
        name: "task_switch",
        layer: Layer::Primary,
        eval: task_switch,
    },
    Rule {
        name: "scroll",
        layer: Layer::Primary,
        eval: scroll,
    },
    Rule {
        name: "drag",
        layer: Layer::Overlay,
        eval: drag,
    },
    Rule {
        name: "pointer",
        layer: Layer::Primary,
        eval: pointer,
    },
    Rule {
        name: "rest",
        layer: Layer::Primary,
        eval: rest,
    },
];

/// Runs one frame through the rule table. Does not consult liveness.
pub fn transition(
    config: &GestureConfig,
    screen: (f64, f64),
    state: &mut GestureState,
    features: &FeatureSet,
) -> Vec<Action> {
    let ctx = RuleCtx {
        config,
        screen,
        now: features.frame.captured_at,
    };

    if !state.mode.is_latched() {
        state.mode = Mode::resting(features.hand_count());
    }

    let mut out = Vec::new();
    let mut primary_matched: Option<&'static str> = None;
    for rule in RULES {
        if rule.layer == Layer::Primary && primary_matched.is_some() {
            continue;
        }
        let outcome = (rule.eval)(&ctx, state, features, &mut out);
        if rule.layer == Layer::Primary && outcome == Outcome::Matched {
            primary_matched = Some(rule.name);
        }
    }

    if !out.is_empty() {
        debug!(
            seq = features.frame.seq,
            rule = primary_matched.unwrap_or("none"),
            mode = state.mode.as_str(),
            actions = out.len(),
            "frame decoded"
        );
    }
    out
}

// ── Rules ───────────────────────────────────────────────────────────────

fn show_desktop(
    ctx: &RuleCtx,
    state: &mut GestureState,
    f: &FeatureSet,
    out: &mut Vec<Action>,
) -> Outcome {
    let Some(pair) = f.pair else {
        return Outcome::Pass;
    };
    let threshold = ctx.config.show_desktop_threshold_px;

    if pair.thumb_dist < threshold {
        state.show_desktop_armed = true;
        return Outcome::Pass;
    }

    let pose = pair.thumb_dist > threshold && f.hands.iter().all(|h| h.index_below_thumb);
    if pose && state.show_desktop_armed && state.mode != Mode::TaskSwitching {
        info!(thumb_dist = pair.thumb_dist, "show desktop");
        state.show_desktop_armed = false;
        out.push(Action::ShowDesktop);
    }
    Outcome::Pass
}

fn task_switch(
    ctx: &RuleCtx,
    state: &mut GestureState,
    f: &FeatureSet,
    out: &mut Vec<Action>,
) -> Outcome {
    let Some(pair) = f.pair else {
        state.task_switch_hold.reset();
        state.switch_dwell.reset();
        state.task_switch_direction = SwitchDirection::None;
        return if state.mode == Mode::TaskSwitching {
            Outcome::Matched
        } else {
            Outcome::Pass
        };
    };
    let threshold = ctx.config.task_switch_threshold_px;
    let dwell = ctx.config.task_switch_dwell();

    if state.mode == Mode::TaskSwitching {
        if pair.thumb_dist >= threshold {
            info!(thumb_dist = pair.thumb_dist, "task switcher closed");
            out.push(Action::TaskSwitchClose);
            state.mode = Mode::TwoHandActive;
            state.switch_dwell.reset();
            state.task_switch_direction = SwitchDirection::None;
            return Outcome::Matched;
        }

        let width = f64::from(f.frame.width);
        let zone = if pair.center_x < width / 3.0 {
            SwitchDirection::Left
        } else if pair.center_x > 2.0 * width / 3.0 {
            SwitchDirection::Right
        } else {
            SwitchDirection::None
        };

        if zone == SwitchDirection::None {
            state.switch_dwell.reset();
            state.task_switch_direction = SwitchDirection::None;
        } else if zone != state.task_switch_direction {
            debug!(?zone, "task switcher zone entered");
            state.task_switch_direction = zone;
            state.switch_dwell.rearm(ctx.now);
        } else if state.switch_dwell.held(ctx.now).is_some_and(|held| held >= dwell) {
            out.push(if zone == SwitchDirection::Left {
                Action::TaskSwitchPrev
            } else {
                Action::TaskSwitchNext
            });
            state.switch_dwell.rearm(ctx.now);
        }
        return Outcome::Matched;
    }

    let arming = pair.thumb_dist < threshold && state.mode != Mode::Dragging;
    match state.task_switch_hold.update(arming, ctx.now) {
        Some(held) if held >= dwell => {
            info!(held_ms = held.as_millis() as u64, "task switcher opened");
            out.push(Action::TaskSwitchOpen);
            state.mode = Mode::TaskSwitching;
            state.task_switch_hold.reset();
            state.switch_dwell.reset();
            state.task_switch_direction = SwitchDirection::None;
            Outcome::Matched
        }
        Some(_) => Outcome::Matched,
        None => Outcome::Pass,
    }
}

fn scroll(
    ctx: &RuleCtx,
    state: &mut GestureState,
    f: &FeatureSet,
    out: &mut Vec<Action>,
) -> Outcome {
    let Some(pair) = f.pair else {
        return Outcome::Pass;
    };
    if state.mode == Mode::TaskSwitching || pair.thumb_dist < ctx.config.task_switch_threshold_px {
        return Outcome::Pass;
    }

    let amount = (pair.index_offset_y.abs() / ctx.config.scroll_divisor).floor();
    if amount >= 1.0 {
        let direction = if pair.index_offset_y > 0.0 {
            ScrollDirection::Down
        } else {
            ScrollDirection::Up
        };
        out.push(Action::Scroll {
            amount: amount.min(f64::from(u32::MAX)) as u32,
            direction,
        });
    }
    Outcome::Matched
}

fn drag(
    ctx: &RuleCtx,
    state: &mut GestureState,
    f: &FeatureSet,
    out: &mut Vec<Action>,
) -> Outcome {
    if state.mode == Mode::TaskSwitching {
        state.drag_hold.reset();
        return Outcome::Pass;
    }

    let Some(pair) = f.pair else {
        if state.mode == Mode::Dragging {
            info!(hands = f.hand_count(), "drag released: second hand lost");
            out.push(Action::DragEnd);
            state.mode = Mode::resting(f.hand_count());
        }
        state.drag_hold.reset();
        return Outcome::Pass;
    };

    if pair.index_dist < ctx.config.pinch_threshold_px {
        let held = state.drag_hold.update(true, ctx.now).unwrap_or_default();
        if held >= ctx.config.drag_hold() && state.mode != Mode::Dragging {
            info!(held_ms = held.as_millis() as u64, "drag started");
            out.push(Action::DragStart);
            state.mode = Mode::Dragging;
        }
    } else if state.drag_hold.is_running() {
        if state.mode == Mode::Dragging {
            info!("drag ended");
            out.push(Action::DragEnd);
            state.mode = Mode::TwoHandActive;
        } else {
            debug!("short index pinch");
            out.push(Action::DoubleClick);
        }
        state.drag_hold.reset();
    }
    Outcome::Pass
}

fn pointer(
    ctx: &RuleCtx,
    state: &mut GestureState,
    f: &FeatureSet,
    out: &mut Vec<Action>,
) -> Outcome {
    if state.mode == Mode::TaskSwitching {
        return Outcome::Pass;
    }
    let Some(hand) = f.single() else {
        return Outcome::Pass;
    };
    if f.frame.width == 0 || f.frame.height == 0 {
        return Outcome::Pass;
    }

    let scale = Vector2::new(
        ctx.screen.0 / f64::from(f.frame.width),
        ctx.screen.1 / f64::from(f.frame.height),
    );
    let target = Point2::from(hand.index_tip.coords.component_mul(&scale));
    let smoothed = state.smoothed_pointer
        + (target - state.smoothed_pointer) / ctx.config.smoothing_factor;
    state.smoothed_pointer = smoothed;

    out.push(Action::MoveTo {
        x: smoothed.x.round() as i32,
        y: smoothed.y.round() as i32,
    });

    let pinch = ctx.config.pinch_threshold_px;
    if hand.thumb_index_dist < pinch {
        out.push(Action::ClickLeft);
    }
    if hand.index_middle_dist < pinch {
        out.push(Action::ClickRight);
    }
    Outcome::Matched
}

fn rest(_: &RuleCtx, _: &mut GestureState, _: &FeatureSet, _: &mut Vec<Action>) -> Outcome {
    Outcome::Matched
}

// ── Machine ─────────────────────────────────────────────────────────────

/// Owns the gesture state for one control session.
#[derive(Debug, Clone)]
pub struct GestureMachine {
    config: GestureConfig,
    screen: (f64, f64),
    timeout: Duration,
    state: GestureState,
}

impl GestureMachine {
    pub fn new(config: GestureConfig, screen: (u32, u32), timeout: Duration, now: Instant) -> Self {
        let screen = (f64::from(screen.0), f64::from(screen.1));
        Self {
            state: GestureState::new(screen, timeout, now),
            config,
            screen,
            timeout,
        }
    }

    /// Advances one frame. After a timeout the machine emits the release
    /// actions it owes, then `ReturnToIdle`, then nothing until [`restart`].
    ///
    /// [`restart`]: GestureMachine::restart
    pub fn advance(&mut self, features: &FeatureSet) -> Vec<Action> {
        if self.state.halted {
            return Vec::new();
        }

        let now = features.frame.captured_at;
        if self.state.liveness.observe(features.hand_count(), now) == Liveness::Expired {
            info!(timeout_secs = self.timeout.as_secs_f64(), "no hands seen, returning to idle");
            let mut out = self.state.release_held();
            out.push(Action::ReturnToIdle);
            self.state.halted = true;
            return out;
        }

        transition(&self.config, self.screen, &mut self.state, features)
    }

    /// Stops the machine, returning the actions that release anything held.
    pub fn shutdown(&mut self) -> Vec<Action> {
        if self.state.halted {
            return Vec::new();
        }
        self.state.halted = true;
        self.state.release_held()
    }

    pub fn restart(&mut self, now: Instant) {
        self.state = GestureState::new(self.screen, self.timeout, now);
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    pub fn is_halted(&self) -> bool {
        self.state.halted
    }
}
