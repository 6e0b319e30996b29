use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use touchless_control::capture::{CameraSource, FrameSource};
use touchless_control::config::Config;

/// Checks that the configured camera opens and delivers frames.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file (JSON); its `capture` section is used
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera index, overriding the config
    #[arg(short, long)]
    index: Option<u32>,

    /// Frames to grab
    #[arg(short, long, default_value_t = 30)]
    frames: u32,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    println!("Testing camera access...\n");

    match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
        Ok(cameras) => {
            println!("Found {} camera(s):", cameras.len());
            for (i, camera) in cameras.iter().enumerate() {
                println!("  [{}] {}", i, camera.human_name());
            }
            println!();
        }
        Err(e) => println!("✗ Failed to query cameras: {}", e),
    }

    let mut capture = match Config::load(args.config.as_deref()) {
        Ok(config) => config.capture,
        Err(e) => {
            println!("✗ {}", e);
            return;
        }
    };
    if let Some(index) = args.index {
        capture.camera_index = index;
    }

    let mut camera = match CameraSource::open(&capture) {
        Ok(camera) => {
            println!("✓ Camera {} opened", capture.camera_index);
            camera
        }
        Err(e) => {
            println!("✗ {}", e);
            println!("\nPossible causes:");
            println!("1. Camera is being used by another app");
            println!("2. Camera permissions not granted");
            println!("3. No camera connected");
            return;
        }
    };

    let started = Instant::now();
    let mut ok = 0u32;
    for _ in 0..args.frames {
        match camera.next_frame() {
            Ok(_) => ok += 1,
            Err(e) if e.is_fatal() => {
                println!("✗ {}", e);
                return;
            }
            Err(e) => println!("✗ {}", e),
        }
    }

    let (width, height) = camera.resolution();
    let elapsed = started.elapsed().as_secs_f64();
    println!("✓ Captured {}/{} frames at {}x{}", ok, args.frames, width, height);
    if ok > 0 && elapsed > 0.0 {
        println!("✓ {:.1} fps", f64::from(ok) / elapsed);
    }
}
