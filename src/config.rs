// src/config.rs
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("cannot read config file `{path}`: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Which host module a session runs as. Each one decodes a different
/// gesture vocabulary and has its own idle timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Pointer, clicks, drag, scroll, task switcher, show desktop.
    Pointer,
    /// Pinch-to-level brightness and volume.
    Levels,
}

impl Profile {
    pub fn default_timeout(self) -> Duration {
        match self {
            Profile::Pointer => Duration::from_secs(10),
            Profile::Levels => Duration::from_secs(5),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Pointer => "pointer",
            Profile::Levels => "levels",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Fingertip pinch distance (pixels) for clicks and the two-hand drag.
    pub pinch_threshold_px: f64,
    /// Two-hand thumb distance (pixels) below which the task switcher arms.
    pub task_switch_threshold_px: f64,
    /// Hold before the switcher opens, and dwell between directional switches.
    pub task_switch_dwell_secs: f64,
    pub drag_hold_secs: f64,
    /// Two-hand thumb distance (pixels) above which the show-desktop pose counts.
    pub show_desktop_threshold_px: f64,
    /// Pointer moves 1/n of the remaining distance each frame.
    pub smoothing_factor: f64,
    /// Pixels of vertical index offset per scroll unit.
    pub scroll_divisor: f64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            pinch_threshold_px: 30.0,
            task_switch_threshold_px: 60.0,
            task_switch_dwell_secs: 1.0,
            drag_hold_secs: 0.5,
            show_desktop_threshold_px: 150.0,
            smoothing_factor: 3.0,
            scroll_divisor: 5.0,
        }
    }
}

impl GestureConfig {
    pub fn task_switch_dwell(&self) -> Duration {
        secs_or_max(self.task_switch_dwell_secs)
    }

    pub fn drag_hold(&self) -> Duration {
        secs_or_max(self.drag_hold_secs)
    }
}

/// Saturating conversion for values that skipped [`Config::validate`].
fn secs_or_max(secs: f64) -> Duration {
    if secs.is_nan() {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    pub min_pinch_px: f64,
    pub max_pinch_px: f64,
    /// Shell command run for brightness changes; `{percent}` is substituted.
    pub brightness_command: Option<String>,
    /// Shell command run for volume changes; `{percent}` is substituted.
    pub volume_command: Option<String>,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            min_pinch_px: 20.0,
            max_pinch_px: 150.0,
            brightness_command: None,
            volume_command: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub profile: Profile,
    /// Overrides the profile's idle timeout when set.
    pub timeout_secs: Option<f64>,
    pub max_consecutive_capture_failures: u32,
    /// Read frames on a separate thread into a single-slot buffer.
    pub decouple_capture: bool,
    /// Screen size in pixels; queried from the display when unset.
    pub screen_size: Option<(u32, u32)>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Pointer,
            timeout_secs: None,
            max_consecutive_capture_failures: 30,
            decouple_capture: false,
            screen_size: None,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .map(secs_or_max)
            .unwrap_or_else(|| self.profile.default_timeout())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub camera_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Flip frames horizontally so the preview behaves like a mirror.
    pub mirror: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            width: 640,
            height: 480,
            fps: 30,
            mirror: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gesture: GestureConfig,
    pub levels: LevelConfig,
    pub session: SessionConfig,
    pub capture: CaptureConfig,
}

impl Config {
    /// Platform config file location, e.g. `~/.config/touchless/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "touchless")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit path if given, else the platform file if it exists, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_json(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_json(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.gesture;
        let positive = [
            ("gesture.pinch_threshold_px", g.pinch_threshold_px),
            ("gesture.task_switch_threshold_px", g.task_switch_threshold_px),
            ("gesture.task_switch_dwell_secs", g.task_switch_dwell_secs),
            ("gesture.drag_hold_secs", g.drag_hold_secs),
            ("gesture.show_desktop_threshold_px", g.show_desktop_threshold_px),
            ("gesture.scroll_divisor", g.scroll_divisor),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::invalid(field, format!("must be > 0, got {value}")));
            }
        }
        check_secs("gesture.task_switch_dwell_secs", g.task_switch_dwell_secs)?;
        check_secs("gesture.drag_hold_secs", g.drag_hold_secs)?;
        if !(g.smoothing_factor.is_finite() && g.smoothing_factor >= 1.0) {
            return Err(ConfigError::invalid(
                "gesture.smoothing_factor",
                format!("must be >= 1, got {}", g.smoothing_factor),
            ));
        }

        let l = &self.levels;
        if !(l.min_pinch_px >= 0.0 && l.min_pinch_px < l.max_pinch_px) {
            return Err(ConfigError::invalid(
                "levels.min_pinch_px",
                format!(
                    "must be in [0, max_pinch_px), got {} (max {})",
                    l.min_pinch_px, l.max_pinch_px
                ),
            ));
        }

        if let Some(secs) = self.session.timeout_secs {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(ConfigError::invalid(
                    "session.timeout_secs",
                    format!("must be > 0, got {secs}"),
                ));
            }
            check_secs("session.timeout_secs", secs)?;
        }
        if let Some((w, h)) = self.session.screen_size {
            if w == 0 || h == 0 {
                return Err(ConfigError::invalid("session.screen_size", "must be non-zero"));
            }
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::invalid("capture.width", "frame size must be non-zero"));
        }
        Ok(())
    }
}

/// Upper bound for every seconds field (one week).
const MAX_SECS: f64 = 7.0 * 24.0 * 3600.0;

fn check_secs(field: &'static str, secs: f64) -> Result<(), ConfigError> {
    if secs > MAX_SECS {
        return Err(ConfigError::invalid(
            field,
            format!("must be at most {MAX_SECS} seconds, got {secs}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn default_timeouts_follow_profile() {
        let mut session = SessionConfig::default();
        assert_eq!(session.timeout(), Duration::from_secs(10));
        session.profile = Profile::Levels;
        assert_eq!(session.timeout(), Duration::from_secs(5));
        session.timeout_secs = Some(2.5);
        assert_eq!(session.timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{
            "gesture": { "smoothing_factor": 5 },
            "session": { "profile": "levels" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.gesture.smoothing_factor, 5.0);
        assert_eq!(config.gesture.pinch_threshold_px, 30.0);
        assert_eq!(config.session.profile, Profile::Levels);
        assert_eq!(config.capture, CaptureConfig::default());
    }

    #[test]
    fn rejects_smoothing_below_one() {
        let mut config = Config::default();
        config.gesture.smoothing_factor = 0.5;
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "gesture.smoothing_factor")
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_range_seconds() {
        let mut config = Config::default();
        config.session.timeout_secs = Some(1e30);
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "session.timeout_secs")
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }

        let mut config = Config::default();
        config.gesture.drag_hold_secs = 1e20;
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "gesture.drag_hold_secs")
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn unvalidated_seconds_saturate() {
        let mut config = Config::default();
        config.gesture.task_switch_dwell_secs = 1e30;
        config.session.timeout_secs = Some(f64::INFINITY);
        assert_eq!(config.gesture.task_switch_dwell(), Duration::MAX);
        assert_eq!(config.session.timeout(), Duration::MAX);
    }

    #[test]
    fn load_rejects_huge_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "session": { "timeout_secs": 1e30 } }"#).unwrap();
        assert!(matches!(
            Config::load(Some(&path)),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn rejects_inverted_level_range() {
        let mut config = Config::default();
        config.levels.min_pinch_px = 200.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "session": { "timeout_secs": 2.5 } }"#).unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.session.timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Parse { .. })));
    }
}
