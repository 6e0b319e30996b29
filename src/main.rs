// src/main.rs
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use touchless_control::action::InputInjector;
use touchless_control::capture::{CameraSource, FrameSource, LatestFrame, ReplaySource};
use touchless_control::config::{Config, Profile};
use touchless_control::gesture::GestureMachine;
use touchless_control::input::{EnigoInjector, LevelCommands, LoggingInjector};
use touchless_control::landmarks::{shell, DetectorProcess, LandmarkProvider, RecordedLandmarks};
use touchless_control::levels::LevelControl;
use touchless_control::session::{Decoder, Session, SessionOutcome};
use touchless_control::trace::ActionRecorder;
use tracing::{info, info_span, warn};

const FALLBACK_SCREEN: (u32, u32) = (1920, 1080);

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file (JSON). Defaults to the platform config directory
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Gesture vocabulary to run
    #[arg(short, long, value_enum)]
    profile: Option<Profile>,

    /// Seconds without hands before returning to idle
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Replay a JSON-lines landmark recording instead of using the camera
    #[arg(long, conflicts_with = "detector")]
    replay: Option<PathBuf>,

    /// Hand detector command, fed RGB frames on stdin
    #[arg(long)]
    detector: Option<String>,

    /// Write a CSV trace of every action under this directory
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Command to run when a session returns to idle (the home UI)
    #[arg(long)]
    on_idle: Option<String>,

    /// Exit after the first session instead of starting another
    #[arg(long)]
    once: bool,

    /// Log actions instead of injecting them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(profile) = args.profile {
        config.session.profile = profile;
    }
    if let Some(timeout) = args.timeout {
        config.session.timeout_secs = Some(timeout);
    }
    config.validate()?;

    if args.replay.is_none() && args.detector.is_none() {
        bail!("Camera input needs a hand detector: pass --detector <command> or --replay <file>");
    }
    // A recording can only be played once.
    let once = args.once || args.replay.is_some();

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let args = Arc::new(args);
    let config = Arc::new(config);
    loop {
        let outcome = {
            let (args, config, stop) = (args.clone(), config.clone(), stop.clone());
            tokio::task::spawn_blocking(move || run_session(&args, &config, &stop))
                .await
                .context("Session task failed")??
        };

        match outcome {
            SessionOutcome::ReturnedToIdle => {
                if let Some(command) = &args.on_idle {
                    run_idle_command(command).await?;
                }
                if once || stop.load(Ordering::Relaxed) {
                    break;
                }
                info!("starting a new session");
            }
            SessionOutcome::Stopped => break,
            SessionOutcome::Aborted { reason } => bail!("Session aborted: {reason}"),
        }
    }
    Ok(())
}

/// Builds and runs one session. Everything it opens (camera, detector, input
/// backend) is dropped before this returns.
fn run_session(args: &Args, config: &Config, stop: &AtomicBool) -> Result<SessionOutcome> {
    let source: Box<dyn FrameSource>;
    let provider: Box<dyn LandmarkProvider>;
    match (&args.replay, &args.detector) {
        (Some(path), _) => {
            source = Box::new(ReplaySource::open(path)?);
            provider = Box::new(RecordedLandmarks);
        }
        (None, Some(command)) => {
            source = open_camera(config)?;
            provider = Box::new(DetectorProcess::spawn(command)?);
        }
        (None, None) => bail!("No landmark source configured"),
    }

    let injector: Box<dyn InputInjector>;
    let screen = if args.dry_run {
        injector = Box::new(LoggingInjector::new());
        config.session.screen_size.unwrap_or(FALLBACK_SCREEN)
    } else {
        let enigo = EnigoInjector::new(LevelCommands::from_config(&config.levels))?;
        let screen = config
            .session
            .screen_size
            .or_else(|| enigo.screen_size())
            .unwrap_or(FALLBACK_SCREEN);
        injector = Box::new(enigo);
        screen
    };

    let timeout = config.session.timeout();
    let now = Instant::now();
    let decoder: Box<dyn Decoder> = match config.session.profile {
        Profile::Pointer => Box::new(GestureMachine::new(
            config.gesture.clone(),
            screen,
            timeout,
            now,
        )),
        Profile::Levels => Box::new(LevelControl::new(config.levels.clone(), timeout, now)),
    };

    let mut session = Session::new(
        source,
        provider,
        decoder,
        injector,
        config.session.max_consecutive_capture_failures,
    );
    if let Some(dir) = &args.trace_dir {
        session = session.with_trace(ActionRecorder::create(dir, None)?);
    }

    let span = info_span!("session", id = %session.id(), profile = config.session.profile.as_str());
    let _enter = span.enter();
    info!(
        timeout_secs = timeout.as_secs_f64(),
        screen_w = screen.0,
        screen_h = screen.1,
        dry_run = args.dry_run,
        "session configured"
    );

    let outcome = session.run(stop);
    info!(?outcome, "session ended");
    if let Err(e) = session.finish() {
        warn!("Failed to finish session: {:#}", e);
    }
    Ok(outcome)
}

fn open_camera(config: &Config) -> Result<Box<dyn FrameSource>> {
    if config.session.decouple_capture {
        let capture = config.capture.clone();
        return Ok(Box::new(LatestFrame::spawn(move || CameraSource::open(&capture))));
    }
    let camera = CameraSource::open(&config.capture)?;
    let (width, height) = camera.resolution();
    info!(width, height, "camera resolution");
    Ok(Box::new(camera))
}

async fn run_idle_command(command: &str) -> Result<()> {
    info!(command, "running idle command");
    let status = tokio::process::Command::from(shell(command))
        .status()
        .await
        .with_context(|| format!("Failed to run idle command `{command}`"))?;
    if !status.success() {
        warn!(%status, "Idle command exited unsuccessfully");
    }
    Ok(())
}
