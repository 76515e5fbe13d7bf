use anyhow::{Context, Result};
use clap::Parser;
use pipcam::capture::{CaptureDeviceScreenShare, FrameSource, LiveSource, WebcamCapture};
use pipcam::compositor::PlacementPreset;
use pipcam::output::{forward_stream, V4L2Output};
use pipcam::segmentation::SegmenterConfig;
use pipcam::{Pip, PipelineConfig, ReducedHeight};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Capture device carrying the screen share (e.g. a v4l2loopback desktop feed)
    #[arg(long)]
    screen_device: Option<u32>,

    /// Start with the screen share as background
    #[arg(long, requires = "screen_device")]
    share_screen: bool,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Maximum height of the frame fed to the model (720, 540, 450, 360, 270, 180, 90, 9)
    #[arg(long, default_value = "450")]
    reduced_height: ReducedHeight,

    /// Per-frame budget in milliseconds
    #[arg(long, default_value_t = 100)]
    frame_budget_ms: u64,

    /// Give up on a segmentation call after this many milliseconds
    #[arg(long, default_value_t = 2000)]
    segmentation_timeout_ms: u64,

    /// Foreground layout: full, intermediate or small
    #[arg(long, default_value = "small")]
    video_size: PlacementPreset,

    /// Still image used as the virtual background
    #[arg(long)]
    background: Option<String>,

    /// Start with background removal enabled
    #[arg(long)]
    effect: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to segmentation model (ONNX file)
    /// If not provided, runs in passthrough mode without segmentation
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("pipcam starting");
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Frame budget: {}ms", args.frame_budget_ms);

    let config = PipelineConfig {
        effect_on: args.effect,
        max_reduced_height: args.reduced_height,
        debug: args.debug,
        frame_budget: Duration::from_millis(args.frame_budget_ms),
        segmentation_timeout: Duration::from_millis(args.segmentation_timeout_ms),
    };

    let screen_share = CaptureDeviceScreenShare::new(args.screen_device.unwrap_or(1));
    let pip = Pip::new(config, Arc::new(screen_share))?
        .with_on_stop_screen_share(|| tracing::info!("Screen share closed by the user"))?;

    if let Some(model_path) = &args.model {
        tracing::info!("Loading segmentation model from {}", model_path);
        pip.load_segmenter(SegmenterConfig::new(model_path))?;
    } else {
        tracing::info!("Running in passthrough mode (no segmentation)");
    }

    if let Some(path) = &args.background {
        let still = image::open(path)
            .with_context(|| format!("Failed to load background image {path}"))?
            .into_rgba8();
        pip.set_background_image(Some(still));
    }
    pip.set_video_size(args.video_size);

    // Initialize capture
    let (device, width, height) = (args.input_device, args.capture_width, args.capture_height);
    let webcam = LiveSource::spawn_device("webcam", move || {
        let capture = WebcamCapture::new(device, width, height, 30)?;
        Ok(Box::new(capture) as Box<dyn FrameSource>)
    })
    .await
    .context("Failed to initialize webcam capture")?;
    pip.attach_stream(webcam.clone());

    if args.share_screen {
        pip.start_screen_share()
            .await
            .context("Failed to start screen share")?;
    }

    // Initialize output
    let output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;

    let render = pip.initialize_render().await?;
    let cancel = CancellationToken::new();
    let mut forward = tokio::spawn(forward_stream(pip.capture_stream(), output, cancel.clone()));

    tracing::info!("Press Ctrl+C to stop");
    let forwarded = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            None
        }
        // A failed sink ends the process instead of rendering into nothing.
        result = &mut forward => {
            tracing::warn!("Output stream ended, shutting down");
            Some(result)
        }
    };

    tracing::info!("Shutting down");
    render.stop().await;
    cancel.cancel();
    pip.stop_screen_share();
    pip.detach_stream();
    webcam.stop();

    let result = match forwarded {
        Some(result) => result,
        None => forward.await,
    };
    result.context("Output task panicked")??;

    Ok(())
}
