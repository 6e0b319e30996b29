// src/input.rs - OS input injection backends
use crate::action::{InjectError, InputInjector, Key, LevelChannel, MouseButton};
use crate::config::LevelConfig;
use crate::landmarks::shell;
use enigo::{Axis, Button, Coordinate, Direction, Enigo, Keyboard, Mouse, Settings};
use tracing::{debug, info, warn};

fn backend<E: std::fmt::Debug>(e: E) -> InjectError {
    InjectError::Backend(format!("{e:?}"))
}

fn enigo_key(key: Key) -> enigo::Key {
    match key {
        Key::Alt => enigo::Key::Alt,
        Key::Tab => enigo::Key::Tab,
        Key::Shift => enigo::Key::Shift,
        Key::Meta => enigo::Key::Meta,
        Key::Char(c) => enigo::Key::Unicode(c),
    }
}

fn enigo_button(button: MouseButton) -> Button {
    match button {
        MouseButton::Left => Button::Left,
        MouseButton::Right => Button::Right,
    }
}

/// Runs the configured shell command for a level change, with `{percent}`
/// replaced by the new value.
#[derive(Debug, Clone, Default)]
pub struct LevelCommands {
    brightness: Option<String>,
    volume: Option<String>,
}

impl LevelCommands {
    pub fn from_config(config: &LevelConfig) -> Self {
        Self {
            brightness: config.brightness_command.clone(),
            volume: config.volume_command.clone(),
        }
    }

    pub fn render(&self, channel: LevelChannel, percent: u8) -> Option<String> {
        let template = match channel {
            LevelChannel::Brightness => self.brightness.as_ref(),
            LevelChannel::Volume => self.volume.as_ref(),
        }?;
        Some(template.replace("{percent}", &percent.to_string()))
    }

    pub fn run(&self, channel: LevelChannel, percent: u8) -> Result<(), InjectError> {
        let Some(command) = self.render(channel, percent) else {
            warn!(channel = channel.as_str(), "No command configured for level changes");
            return Ok(());
        };

        let status = shell(&command).status().map_err(|source| InjectError::Command {
            command: command.clone(),
            source,
        })?;
        if !status.success() {
            return Err(InjectError::CommandFailed { command, status });
        }
        Ok(())
    }
}

/// Injects real mouse and keyboard events through enigo.
pub struct EnigoInjector {
    enigo: Enigo,
    levels: LevelCommands,
}

impl EnigoInjector {
    pub fn new(levels: LevelCommands) -> anyhow::Result<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| anyhow::anyhow!("Failed to initialize input injection: {:?}", e))?;
        Ok(Self { enigo, levels })
    }

    /// Size of the main display in pixels.
    pub fn screen_size(&self) -> Option<(u32, u32)> {
        match self.enigo.main_display() {
            Ok((w, h)) if w > 0 && h > 0 => Some((w as u32, h as u32)),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to query display size: {:?}", e);
                None
            }
        }
    }
}

impl InputInjector for EnigoInjector {
    fn move_cursor_to(&mut self, x: i32, y: i32) -> Result<(), InjectError> {
        self.enigo.move_mouse(x, y, Coordinate::Abs).map_err(backend)
    }

    fn click_button(&mut self, button: MouseButton, count: u32) -> Result<(), InjectError> {
        for _ in 0..count {
            self.enigo
                .button(enigo_button(button), Direction::Click)
                .map_err(backend)?;
        }
        Ok(())
    }

    fn press_button(&mut self, button: MouseButton) -> Result<(), InjectError> {
        self.enigo
            .button(enigo_button(button), Direction::Press)
            .map_err(backend)
    }

    fn release_button(&mut self, button: MouseButton) -> Result<(), InjectError> {
        self.enigo
            .button(enigo_button(button), Direction::Release)
            .map_err(backend)
    }

    fn scroll_by(&mut self, amount: i32) -> Result<(), InjectError> {
        self.enigo.scroll(amount, Axis::Vertical).map_err(backend)
    }

    fn key_down(&mut self, key: Key) -> Result<(), InjectError> {
        self.enigo.key(enigo_key(key), Direction::Press).map_err(backend)
    }

    fn key_up(&mut self, key: Key) -> Result<(), InjectError> {
        self.enigo.key(enigo_key(key), Direction::Release).map_err(backend)
    }

    fn press_keys(&mut self, keys: &[Key]) -> Result<(), InjectError> {
        let mut pressed = 0;
        let mut result = Ok(());
        for &key in keys {
            if let Err(e) = self.enigo.key(enigo_key(key), Direction::Press) {
                result = Err(backend(e));
                break;
            }
            pressed += 1;
        }
        // Release whatever went down, even after a failed press.
        for &key in keys[..pressed].iter().rev() {
            if let Err(e) = self.enigo.key(enigo_key(key), Direction::Release) {
                if result.is_ok() {
                    result = Err(backend(e));
                }
            }
        }
        result
    }

    fn hold_and_tap(&mut self, hold: Key, tap: Key) -> Result<(), InjectError> {
        self.enigo.key(enigo_key(hold), Direction::Press).map_err(backend)?;
        self.enigo.key(enigo_key(tap), Direction::Click).map_err(backend)
    }

    fn set_level(&mut self, channel: LevelChannel, percent: u8) -> Result<(), InjectError> {
        self.levels.run(channel, percent)
    }
}

/// Logs every call instead of touching the OS. Used for `--dry-run`.
#[derive(Debug, Default)]
pub struct LoggingInjector {
    calls: u64,
}

impl LoggingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn log(&mut self, call: std::fmt::Arguments<'_>) -> Result<(), InjectError> {
        self.calls += 1;
        info!(target: "touchless_control::dry_run", "{}", call);
        Ok(())
    }
}

impl InputInjector for LoggingInjector {
    fn move_cursor_to(&mut self, x: i32, y: i32) -> Result<(), InjectError> {
        self.calls += 1;
        debug!(target: "touchless_control::dry_run", x, y, "move cursor");
        Ok(())
    }
    fn click_button(&mut self, button: MouseButton, count: u32) -> Result<(), InjectError> {
        self.log(format_args!("click {button:?} x{count}"))
    }
    fn press_button(&mut self, button: MouseButton) -> Result<(), InjectError> {
        self.log(format_args!("press {button:?}"))
    }
    fn release_button(&mut self, button: MouseButton) -> Result<(), InjectError> {
        self.log(format_args!("release {button:?}"))
    }
    fn scroll_by(&mut self, amount: i32) -> Result<(), InjectError> {
        self.log(format_args!("scroll {amount}"))
    }
    fn key_down(&mut self, key: Key) -> Result<(), InjectError> {
        self.log(format_args!("key down {key:?}"))
    }
    fn key_up(&mut self, key: Key) -> Result<(), InjectError> {
        self.log(format_args!("key up {key:?}"))
    }
    fn press_keys(&mut self, keys: &[Key]) -> Result<(), InjectError> {
        self.log(format_args!("keys {keys:?}"))
    }
    fn hold_and_tap(&mut self, hold: Key, tap: Key) -> Result<(), InjectError> {
        self.log(format_args!("hold {hold:?}, tap {tap:?}"))
    }
    fn set_level(&mut self, channel: LevelChannel, percent: u8) -> Result<(), InjectError> {
        self.log(format_args!("{} -> {percent}%", channel.as_str()))
    }
}
