// src/capture.rs - Frame acquisition: camera, recorded sessions, latest-frame buffer
use crate::config::CaptureConfig;
use crate::landmarks::RawHand;
use image::{DynamicImage, ImageBuffer, RgbImage};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Metadata of one captured frame. `captured_at` is the monotonic timestamp
/// every hold timer is measured against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub seq: u64,
    pub captured_at: Instant,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub frame: Frame,
    /// Pixels, when the source has them (camera). Replayed frames don't.
    pub image: Option<DynamicImage>,
    /// Landmarks stored with a replayed frame.
    pub recorded: Option<Vec<RawHand>>,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// This frame is lost; the next one may succeed.
    #[error("frame capture failed: {0}")]
    Transient(String),

    /// The device or recording is gone for good.
    #[error("capture source disconnected: {0}")]
    Disconnected(String),
}

impl CaptureError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::Disconnected(_))
    }
}

pub trait FrameSource {
    fn next_frame(&mut self) -> Result<CapturedFrame, CaptureError>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self) -> Result<CapturedFrame, CaptureError> {
        (**self).next_frame()
    }
}

pub struct CameraSource {
    camera: Camera,
    seq: u64,
    mirror: bool,
}

impl CameraSource {
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        debug!(index = config.camera_index, "opening camera");

        let format = CameraFormat::new(
            Resolution::new(config.width, config.height),
            FrameFormat::MJPEG,
            config.fps,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

        let camera = Camera::new(CameraIndex::Index(config.camera_index), requested)
            .map_err(|e| CaptureError::Disconnected(format!("failed to open camera: {e}")))?;

        info!(
            index = config.camera_index,
            name = %camera.info().human_name(),
            "camera opened"
        );
        Ok(Self {
            camera,
            seq: 0,
            mirror: config.mirror,
        })
    }

    pub fn resolution(&self) -> (u32, u32) {
        let resolution = self.camera.resolution();
        (resolution.width(), resolution.height())
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<CapturedFrame, CaptureError> {
        if !self.camera.is_stream_open() {
            self.camera.open_stream().map_err(|e| {
                CaptureError::Disconnected(format!("failed to open camera stream: {e}"))
            })?;
        }

        let buffer = self
            .camera
            .frame()
            .map_err(|e| CaptureError::Transient(format!("failed to capture frame: {e}")))?;
        let captured_at = Instant::now();

        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CaptureError::Transient(format!("failed to decode frame: {e}")))?;
        let (width, height) = (decoded.width(), decoded.height());
        let img: RgbImage = ImageBuffer::from_raw(width, height, decoded.into_raw())
            .ok_or_else(|| CaptureError::Transient("frame buffer size mismatch".to_string()))?;

        let img = if self.mirror {
            image::imageops::flip_horizontal(&img)
        } else {
            img
        };

        let frame = Frame {
            seq: self.seq,
            captured_at,
            width,
            height,
        };
        self.seq += 1;

        Ok(CapturedFrame {
            frame,
            image: Some(DynamicImage::ImageRgb8(img)),
            recorded: None,
        })
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if self.camera.is_stream_open() {
            if let Err(e) = self.camera.stop_stream() {
                warn!("Failed to stop camera stream: {}", e);
            }
        }
    }
}

/// One line of a recorded session.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordedFrame {
    /// Seconds since the start of the recording.
    pub t: f64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub hands: Vec<RawHand>,
}

/// Plays back a JSON-lines recording as frames. Timestamps come from the
/// recording, so hold timers behave as they did live.
pub struct ReplaySource<R> {
    lines: Lines<R>,
    base: Instant,
    seq: u64,
    line_no: usize,
}

impl ReplaySource<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            CaptureError::Disconnected(format!("cannot open recording {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "replaying recorded session");
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            base: Instant::now(),
            seq: 0,
            line_no: 0,
        }
    }
}

impl<R: BufRead> FrameSource for ReplaySource<R> {
    fn next_frame(&mut self) -> Result<CapturedFrame, CaptureError> {
        let line = loop {
            self.line_no += 1;
            match self.lines.next() {
                None => return Err(CaptureError::Disconnected("end of recording".to_string())),
                Some(Err(e)) => {
                    return Err(CaptureError::Disconnected(format!("recording unreadable: {e}")))
                }
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => break line,
            }
        };

        let record: RecordedFrame = serde_json::from_str(&line)
            .map_err(|e| CaptureError::Transient(format!("line {}: {e}", self.line_no)))?;
        let captured_at = Some(record.t)
            .filter(|t| !t.is_nan())
            .and_then(|t| Duration::try_from_secs_f64(t.max(0.0)).ok())
            .and_then(|offset| self.base.checked_add(offset))
            .ok_or_else(|| {
                let line_no = self.line_no;
                CaptureError::Transient(format!("line {line_no}: bad timestamp {}", record.t))
            })?;

        let frame = Frame {
            seq: self.seq,
            captured_at,
            width: record.width,
            height: record.height,
        };
        self.seq += 1;

        Ok(CapturedFrame {
            frame,
            image: None,
            recorded: Some(record.hands),
        })
    }
}

#[derive(Default)]
struct Slot {
    latest: Option<Result<CapturedFrame, CaptureError>>,
    closed: bool,
}

type Shared = Arc<(Mutex<Slot>, Condvar)>;

/// Reads frames on its own thread and keeps only the newest one, so a slow
/// pipeline never works through a backlog. Frames still come out in capture
/// order; older unread frames are simply overwritten.
pub struct LatestFrame {
    shared: Shared,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    wait: Duration,
}

impl LatestFrame {
    /// `open` runs on the capture thread, so the source itself never has to
    /// cross threads.
    pub fn spawn<S, F>(open: F) -> Self
    where
        S: FrameSource,
        F: FnOnce() -> Result<S, CaptureError> + Send + 'static,
    {
        let shared: Shared = Arc::new((Mutex::new(Slot::default()), Condvar::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let shared = shared.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("frame-capture".to_string())
                .spawn(move || capture_loop(open, &shared, &stop))
                .map_err(|e| warn!("Failed to start capture thread: {}", e))
                .ok()
        };

        if worker.is_none() {
            if let Ok(mut slot) = shared.0.lock() {
                slot.closed = true;
            }
        }

        Self {
            shared,
            stop,
            worker,
            wait: Duration::from_secs(1),
        }
    }
}

fn capture_loop<S, F>(open: F, shared: &Shared, stop: &AtomicBool)
where
    S: FrameSource,
    F: FnOnce() -> Result<S, CaptureError>,
{
    let (lock, ready) = &**shared;
    let mut source = match open() {
        Ok(source) => source,
        Err(e) => {
            if let Ok(mut slot) = lock.lock() {
                slot.latest = Some(Err(e));
                slot.closed = true;
            }
            ready.notify_all();
            return;
        }
    };

    while !stop.load(Ordering::Relaxed) {
        let result = source.next_frame();
        let fatal = matches!(&result, Err(e) if e.is_fatal());
        match lock.lock() {
            Ok(mut slot) => {
                slot.latest = Some(result);
                slot.closed = fatal;
            }
            Err(_) => break,
        }
        ready.notify_all();
        if fatal {
            break;
        }
    }
    debug!("capture thread exiting");
}

impl FrameSource for LatestFrame {
    fn next_frame(&mut self) -> Result<CapturedFrame, CaptureError> {
        let (lock, ready) = &*self.shared;

        let slot = lock.lock().map_err(poisoned)?;
        let (mut slot, _) = ready
            .wait_timeout_while(slot, self.wait, |s| s.latest.is_none() && !s.closed)
            .map_err(poisoned)?;

        match slot.latest.take() {
            Some(result) => result,
            None if slot.closed => {
                Err(CaptureError::Disconnected("capture thread stopped".to_string()))
            }
            None => Err(CaptureError::Transient("no frame within wait window".to_string())),
        }
    }
}

fn poisoned<T>(_: PoisonError<T>) -> CaptureError {
    CaptureError::Disconnected("capture thread panicked".to_string())
}

impl Drop for LatestFrame {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;

    #[test]
    fn replay_uses_recorded_timestamps() {
        let data = "{\"t\": 0.0, \"width\": 640, \"height\": 480, \"hands\": []}\n\
                    \n\
                    {\"t\": 0.5, \"width\": 640, \"height\": 480}\n";
        let mut source = ReplaySource::new(Cursor::new(data));

        let first = source.next_frame().unwrap();
        let second = source.next_frame().unwrap();
        assert_eq!(first.frame.seq, 0);
        assert_eq!(second.frame.seq, 1);
        assert_eq!(
            second.frame.captured_at - first.frame.captured_at,
            Duration::from_millis(500)
        );
        assert_eq!(second.recorded.as_deref().map(|h| h.len()), Some(0));
        assert!(first.image.is_none());
    }

    #[test]
    fn replay_bad_line_is_transient_and_eof_is_fatal() {
        let data = "not json\n{\"t\": 1.0, \"width\": 10, \"height\": 10}\n";
        let mut source = ReplaySource::new(Cursor::new(data));

        let err = source.next_frame().unwrap_err();
        assert!(!err.is_fatal());
        assert!(source.next_frame().is_ok());
        assert!(source.next_frame().unwrap_err().is_fatal());
    }

    #[test]
    fn replay_out_of_range_timestamp_is_transient() {
        let data = "{\"t\": 1e20, \"width\": 10, \"height\": 10}\n\
                    {\"t\": 2.0, \"width\": 10, \"height\": 10}\n";
        let mut source = ReplaySource::new(Cursor::new(data));

        let err = source.next_frame().unwrap_err();
        assert!(!err.is_fatal());
        let next = source.next_frame().unwrap();
        assert_eq!(next.frame.seq, 0);
    }

    /// Produces one frame per token received; disconnects once the sender is
    /// dropped.
    struct Gated {
        tokens: mpsc::Receiver<()>,
        next_seq: u64,
    }

    impl FrameSource for Gated {
        fn next_frame(&mut self) -> Result<CapturedFrame, CaptureError> {
            if self.tokens.recv().is_err() {
                return Err(CaptureError::Disconnected("done".to_string()));
            }
            let seq = self.next_seq;
            self.next_seq += 1;
            Ok(CapturedFrame {
                frame: Frame {
                    seq,
                    captured_at: Instant::now(),
                    width: 1,
                    height: 1,
                },
                image: None,
                recorded: None,
            })
        }
    }

    fn gated() -> (mpsc::Sender<()>, LatestFrame) {
        let (tx, rx) = mpsc::channel();
        let slot = LatestFrame::spawn(move || {
            Ok(Gated {
                tokens: rx,
                next_seq: 0,
            })
        });
        (tx, slot)
    }

    #[test]
    fn latest_frame_delivers_in_capture_order() {
        let (tx, mut slot) = gated();
        let mut seqs = Vec::new();

        // Lockstep: every frame is read before the next one is captured.
        for _ in 0..3 {
            tx.send(()).unwrap();
            seqs.push(slot.next_frame().unwrap().frame.seq);
        }
        assert_eq!(seqs, vec![0, 1, 2]);

        // Burst: unread frames may be overwritten but never reordered.
        for _ in 0..5 {
            tx.send(()).unwrap();
        }
        drop(tx);
        loop {
            match slot.next_frame() {
                Ok(captured) => seqs.push(captured.frame.seq),
                Err(e) if e.is_fatal() => break,
                Err(_) => {}
            }
        }

        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "out of order: {seqs:?}");
        assert!(seqs.iter().all(|&seq| seq < 8));
    }

    #[test]
    fn latest_frame_reports_disconnect_after_source_ends() {
        let (tx, mut slot) = gated();
        drop(tx);
        assert!(slot.next_frame().unwrap_err().is_fatal());
        assert!(slot.next_frame().unwrap_err().is_fatal());
    }

    #[test]
    fn latest_frame_open_failure_is_fatal() {
        let mut slot =
            LatestFrame::spawn(|| Err::<Gated, _>(CaptureError::Disconnected("no device".into())));
        assert!(slot.next_frame().unwrap_err().is_fatal());
    }
}
