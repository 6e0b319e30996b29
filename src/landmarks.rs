// src/landmarks.rs - Hand landmark types and the detector bridge
use crate::capture::CapturedFrame;
use anyhow::{Context, Result};
use nalgebra::Point2;
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use thiserror::Error;
use tracing::{debug, info, warn};

/// A position in frame pixel space.
pub type Pixel = Point2<f64>;

/// One hand as the detector reports it: 21 normalized points, each `[x, y]`
/// or `[x, y, z]`.
pub type RawHand = Vec<Vec<f64>>;

pub const HAND_LANDMARK_COUNT: usize = 21;

/// Most hands a frame can contribute. Extra detections are dropped.
pub const MAX_HANDS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Joint {
    Thumb,
    Index,
    Middle,
    Ring,
}

impl Joint {
    pub const ALL: [Joint; 4] = [Joint::Thumb, Joint::Index, Joint::Middle, Joint::Ring];

    /// Fingertip index in the 21-point hand model.
    pub fn landmark_index(self) -> usize {
        match self {
            Joint::Thumb => 4,
            Joint::Index => 8,
            Joint::Middle => 12,
            Joint::Ring => 16,
        }
    }
}

/// Fingertips of one detected hand, in frame pixels. Hands carry no identity
/// from one frame to the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandObservation {
    pub thumb: Pixel,
    pub index: Pixel,
    pub middle: Pixel,
    pub ring: Pixel,
}

impl HandObservation {
    pub fn new(thumb: Pixel, index: Pixel, middle: Pixel, ring: Pixel) -> Self {
        Self {
            thumb,
            index,
            middle,
            ring,
        }
    }

    pub fn joint(&self, joint: Joint) -> Pixel {
        match joint {
            Joint::Thumb => self.thumb,
            Joint::Index => self.index,
            Joint::Middle => self.middle,
            Joint::Ring => self.ring,
        }
    }

    pub fn is_finite(&self) -> bool {
        Joint::ALL.iter().all(|&j| {
            let p = self.joint(j);
            p.x.is_finite() && p.y.is_finite()
        })
    }

    /// Scales a normalized 21-point hand to pixel space. Returns `None` for
    /// short hands, points with fewer than two coordinates, or non-finite values.
    pub fn from_normalized(points: &[Vec<f64>], width: u32, height: u32) -> Option<Self> {
        if points.len() < HAND_LANDMARK_COUNT {
            return None;
        }
        let (w, h) = (width as f64, height as f64);
        let pixel = |joint: Joint| -> Option<Pixel> {
            match points[joint.landmark_index()].as_slice() {
                [x, y, ..] if x.is_finite() && y.is_finite() => Some(Pixel::new(x * w, y * h)),
                _ => None,
            }
        };

        Some(Self::new(
            pixel(Joint::Thumb)?,
            pixel(Joint::Index)?,
            pixel(Joint::Middle)?,
            pixel(Joint::Ring)?,
        ))
    }
}

/// Converts detector output for one frame, discarding malformed hands.
pub fn decode_hands(raw: &[RawHand], width: u32, height: u32) -> Vec<HandObservation> {
    raw.iter()
        .enumerate()
        .filter_map(|(i, points)| {
            let hand = HandObservation::from_normalized(points, width, height);
            if hand.is_none() {
                debug!(hand = i, points = points.len(), "discarding malformed hand");
            }
            hand
        })
        .collect()
}

/// Drops hands with non-finite coordinates and caps the count at [`MAX_HANDS`].
pub fn sanitize(hands: Vec<HandObservation>) -> Vec<HandObservation> {
    let detected = hands.len();
    let kept: Vec<_> = hands
        .into_iter()
        .filter(HandObservation::is_finite)
        .take(MAX_HANDS)
        .collect();
    if kept.len() != detected {
        debug!(detected, kept = kept.len(), "filtered hand observations");
    }
    kept
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("detector i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("detector reply is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("detector closed its output")]
    Closed,

    #[error("frame has no pixel data")]
    NoPixels,

    #[error("frame carries no recorded landmarks")]
    NoRecording,
}

/// Yields 0 to 2 hands for a frame. A failure means "no hands this frame",
/// never the end of the session.
pub trait LandmarkProvider {
    fn detect(&mut self, frame: &CapturedFrame) -> Result<Vec<HandObservation>, ProviderError>;
}

impl<T: LandmarkProvider + ?Sized> LandmarkProvider for Box<T> {
    fn detect(&mut self, frame: &CapturedFrame) -> Result<Vec<HandObservation>, ProviderError> {
        (**self).detect(frame)
    }
}

/// Reads landmarks stored alongside replayed frames.
#[derive(Debug, Default)]
pub struct RecordedLandmarks;

impl LandmarkProvider for RecordedLandmarks {
    fn detect(&mut self, frame: &CapturedFrame) -> Result<Vec<HandObservation>, ProviderError> {
        let raw = frame.recorded.as_ref().ok_or(ProviderError::NoRecording)?;
        Ok(decode_hands(raw, frame.frame.width, frame.frame.height))
    }
}

#[derive(Debug, Deserialize)]
struct DetectorReply {
    #[serde(default)]
    hands: Vec<RawHand>,
}

/// External hand detector running as a child process.
///
/// Per frame it receives a `<width> <height>\n` header followed by the RGB
/// bytes, and answers with one JSON line: `{"hands": [[[x, y], ...], ...]}`.
pub struct DetectorProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    line: String,
}

impl DetectorProcess {
    pub fn spawn(command: &str) -> Result<Self> {
        info!(command, "starting hand detector");
        let mut child = shell(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to start detector `{command}`"))?;

        let stdin = child.stdin.take().context("Detector stdin unavailable")?;
        let stdout = child.stdout.take().context("Detector stdout unavailable")?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            line: String::new(),
        })
    }
}

impl LandmarkProvider for DetectorProcess {
    fn detect(&mut self, frame: &CapturedFrame) -> Result<Vec<HandObservation>, ProviderError> {
        let image = frame.image.as_ref().ok_or(ProviderError::NoPixels)?;
        let rgb = image.to_rgb8();

        writeln!(self.stdin, "{} {}", rgb.width(), rgb.height())?;
        self.stdin.write_all(rgb.as_raw())?;
        self.stdin.flush()?;

        self.line.clear();
        if self.stdout.read_line(&mut self.line)? == 0 {
            return Err(ProviderError::Closed);
        }
        let reply: DetectorReply = serde_json::from_str(self.line.trim())?;
        Ok(decode_hands(&reply.hands, rgb.width(), rgb.height()))
    }
}

impl Drop for DetectorProcess {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!("Failed to stop detector: {}", e);
        }
        let _ = self.child.wait();
    }
}

/// Runs `line` through the platform shell.
pub fn shell(line: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", line]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", line]);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;
    use std::time::Instant;

    fn raw_hand(tips: [(f64, f64); 4]) -> RawHand {
        let mut points = vec![vec![0.5, 0.5, 0.0]; HAND_LANDMARK_COUNT];
        for (joint, (x, y)) in Joint::ALL.iter().zip(tips) {
            points[joint.landmark_index()] = vec![x, y, 0.0];
        }
        points
    }

    #[test]
    fn scales_normalized_points_to_pixels() {
        let raw = raw_hand([(0.1, 0.2), (0.5, 0.5), (0.25, 0.75), (1.0, 0.0)]);
        let hand = HandObservation::from_normalized(&raw, 640, 480).unwrap();
        assert_eq!(hand.thumb, Pixel::new(64.0, 96.0));
        assert_eq!(hand.index, Pixel::new(320.0, 240.0));
        assert_eq!(hand.middle, Pixel::new(160.0, 360.0));
        assert_eq!(hand.ring, Pixel::new(640.0, 0.0));
    }

    #[test]
    fn accepts_two_component_points() {
        let raw: RawHand = vec![vec![0.5, 0.5]; HAND_LANDMARK_COUNT];
        assert!(HandObservation::from_normalized(&raw, 100, 100).is_some());
    }

    #[test]
    fn rejects_short_and_nan_hands() {
        let short: RawHand = vec![vec![0.5, 0.5]; 10];
        assert!(HandObservation::from_normalized(&short, 640, 480).is_none());

        let mut nan = raw_hand([(0.1, 0.2), (0.5, 0.5), (0.25, 0.75), (1.0, 0.0)]);
        nan[Joint::Index.landmark_index()] = vec![f64::NAN, 0.5];
        assert!(HandObservation::from_normalized(&nan, 640, 480).is_none());

        let mut flat = raw_hand([(0.1, 0.2), (0.5, 0.5), (0.25, 0.75), (1.0, 0.0)]);
        flat[Joint::Ring.landmark_index()] = vec![0.3];
        assert!(HandObservation::from_normalized(&flat, 640, 480).is_none());
    }

    #[test]
    fn decode_keeps_only_valid_hands() {
        let good = raw_hand([(0.1, 0.2), (0.5, 0.5), (0.25, 0.75), (1.0, 0.0)]);
        let bad: RawHand = vec![vec![0.5, 0.5]; 3];
        let hands = decode_hands(&[bad, good], 640, 480);
        assert_eq!(hands.len(), 1);
    }

    #[test]
    fn sanitize_drops_nan_and_caps_at_two() {
        let p = Pixel::new(1.0, 1.0);
        let ok = HandObservation::new(p, p, p, p);
        let broken = HandObservation::new(Pixel::new(f64::NAN, 1.0), p, p, p);
        let hands = sanitize(vec![broken, ok, ok, ok]);
        assert_eq!(hands, vec![ok, ok]);
    }

    #[test]
    fn recorded_provider_reads_frame_payload() {
        let mut provider = RecordedLandmarks;
        let frame = Frame {
            seq: 0,
            captured_at: Instant::now(),
            width: 640,
            height: 480,
        };
        let with = CapturedFrame {
            frame,
            image: None,
            recorded: Some(vec![raw_hand([(0.1, 0.2), (0.5, 0.5), (0.25, 0.75), (1.0, 0.0)])]),
        };
        assert_eq!(provider.detect(&with).unwrap().len(), 1);

        let without = CapturedFrame {
            frame,
            image: None,
            recorded: None,
        };
        assert!(matches!(provider.detect(&without), Err(ProviderError::NoRecording)));
    }
}
