// src/action.rs - Discrete control events and their mapping onto input injection
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScrollDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelChannel {
    Brightness,
    Volume,
}

impl LevelChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            LevelChannel::Brightness => "brightness",
            LevelChannel::Volume => "volume",
        }
    }
}

/// One decoded control event. A frame yields zero or more, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    MoveTo { x: i32, y: i32 },
    ClickLeft,
    ClickRight,
    DoubleClick,
    DragStart,
    DragEnd,
    Scroll { amount: u32, direction: ScrollDirection },
    TaskSwitchOpen,
    TaskSwitchPrev,
    TaskSwitchNext,
    TaskSwitchClose,
    ShowDesktop,
    SetLevel { channel: LevelChannel, percent: u8 },
    /// Terminal: the session is over and control goes back to the supervisor.
    ReturnToIdle,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::MoveTo { .. } => "move_to",
            Action::ClickLeft => "click_left",
            Action::ClickRight => "click_right",
            Action::DoubleClick => "double_click",
            Action::DragStart => "drag_start",
            Action::DragEnd => "drag_end",
            Action::Scroll { .. } => "scroll",
            Action::TaskSwitchOpen => "task_switch_open",
            Action::TaskSwitchPrev => "task_switch_prev",
            Action::TaskSwitchNext => "task_switch_next",
            Action::TaskSwitchClose => "task_switch_close",
            Action::ShowDesktop => "show_desktop",
            Action::SetLevel { .. } => "set_level",
            Action::ReturnToIdle => "return_to_idle",
        }
    }

    /// Parameters as a short string, empty for parameterless actions.
    pub fn detail(&self) -> String {
        match self {
            Action::MoveTo { x, y } => format!("{x},{y}"),
            Action::Scroll { amount, direction } => {
                format!("{direction:?} {amount}").to_lowercase()
            }
            Action::SetLevel { channel, percent } => format!("{} {percent}%", channel.as_str()),
            _ => String::new(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let detail = self.detail();
        if detail.is_empty() {
            f.write_str(self.name())
        } else {
            write!(f, "{}({})", self.name(), detail)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Alt,
    Tab,
    Shift,
    /// Windows / Super / Command.
    Meta,
    Char(char),
}

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("input backend rejected the event: {0}")]
    Backend(String),

    #[error("`{command}` could not be run: {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    CommandFailed { command: String, status: std::process::ExitStatus },
}

/// OS input primitives. Each [`Action`] maps onto exactly one of these.
pub trait InputInjector {
    fn move_cursor_to(&mut self, x: i32, y: i32) -> Result<(), InjectError>;
    fn click_button(&mut self, button: MouseButton, count: u32) -> Result<(), InjectError>;
    fn press_button(&mut self, button: MouseButton) -> Result<(), InjectError>;
    fn release_button(&mut self, button: MouseButton) -> Result<(), InjectError>;
    /// Positive scrolls down.
    fn scroll_by(&mut self, amount: i32) -> Result<(), InjectError>;
    fn key_down(&mut self, key: Key) -> Result<(), InjectError>;
    fn key_up(&mut self, key: Key) -> Result<(), InjectError>;
    /// Presses `keys` in order as a chord, then releases them in reverse.
    fn press_keys(&mut self, keys: &[Key]) -> Result<(), InjectError>;
    /// Leaves `hold` down and taps `tap` once.
    fn hold_and_tap(&mut self, hold: Key, tap: Key) -> Result<(), InjectError>;
    fn set_level(&mut self, channel: LevelChannel, percent: u8) -> Result<(), InjectError>;
}

impl<T: InputInjector + ?Sized> InputInjector for Box<T> {
    fn move_cursor_to(&mut self, x: i32, y: i32) -> Result<(), InjectError> {
        (**self).move_cursor_to(x, y)
    }
    fn click_button(&mut self, button: MouseButton, count: u32) -> Result<(), InjectError> {
        (**self).click_button(button, count)
    }
    fn press_button(&mut self, button: MouseButton) -> Result<(), InjectError> {
        (**self).press_button(button)
    }
    fn release_button(&mut self, button: MouseButton) -> Result<(), InjectError> {
        (**self).release_button(button)
    }
    fn scroll_by(&mut self, amount: i32) -> Result<(), InjectError> {
        (**self).scroll_by(amount)
    }
    fn key_down(&mut self, key: Key) -> Result<(), InjectError> {
        (**self).key_down(key)
    }
    fn key_up(&mut self, key: Key) -> Result<(), InjectError> {
        (**self).key_up(key)
    }
    fn press_keys(&mut self, keys: &[Key]) -> Result<(), InjectError> {
        (**self).press_keys(keys)
    }
    fn hold_and_tap(&mut self, hold: Key, tap: Key) -> Result<(), InjectError> {
        (**self).hold_and_tap(hold, tap)
    }
    fn set_level(&mut self, channel: LevelChannel, percent: u8) -> Result<(), InjectError> {
        (**self).set_level(channel, percent)
    }
}

/// What became of one dispatched action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Injected,
    /// The injection call failed; already logged.
    Failed,
    /// `ReturnToIdle`: nothing to inject, the supervisor takes over.
    Handoff,
}

pub struct Dispatcher<I> {
    injector: I,
}

impl<I: InputInjector> Dispatcher<I> {
    pub fn new(injector: I) -> Self {
        Self { injector }
    }

    /// Performs the single injection call for `action`. Failures are logged
    /// and reported, never raised, so a failed click cannot stop a later
    /// release from going out.
    pub fn dispatch(&mut self, action: &Action) -> Dispatch {
        let result = match *action {
            Action::MoveTo { x, y } => self.injector.move_cursor_to(x, y),
            Action::ClickLeft => self.injector.click_button(MouseButton::Left, 1),
            Action::ClickRight => self.injector.click_button(MouseButton::Right, 1),
            Action::DoubleClick => self.injector.click_button(MouseButton::Left, 2),
            Action::DragStart => self.injector.press_button(MouseButton::Left),
            Action::DragEnd => self.injector.release_button(MouseButton::Left),
            Action::Scroll { amount, direction } => {
                let amount = i32::try_from(amount).unwrap_or(i32::MAX);
                self.injector.scroll_by(match direction {
                    ScrollDirection::Down => amount,
                    ScrollDirection::Up => -amount,
                })
            }
            Action::TaskSwitchOpen => self.injector.hold_and_tap(Key::Alt, Key::Tab),
            Action::TaskSwitchPrev => self.injector.press_keys(&[Key::Shift, Key::Tab]),
            Action::TaskSwitchNext => self.injector.press_keys(&[Key::Tab]),
            Action::TaskSwitchClose => self.injector.key_up(Key::Alt),
            Action::ShowDesktop => self.injector.press_keys(&[Key::Meta, Key::Char('d')]),
            Action::SetLevel { channel, percent } => self.injector.set_level(channel, percent),
            Action::ReturnToIdle => {
                info!("handing control back to supervisor");
                return Dispatch::Handoff;
            }
        };

        match result {
            Ok(()) => {
                debug!(%action, "injected");
                Dispatch::Injected
            }
            Err(e) => {
                warn!(%action, "Input injection failed: {}", e);
                Dispatch::Failed
            }
        }
    }

    pub fn injector(&self) -> &I {
        &self.injector
    }
}
