use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use cutout::capture::{CaptureSource, ResolutionPreset, WebcamCapture};
use cutout::control::{spawn_stdin_reader, ControlCommand};
use cutout::output::{FrameDump, OutputSink, V4L2Output};
use cutout::pipeline::{Controller, PipelineConfig, TickOutcome};
use cutout::segmentation::{
    self, matte_preview_into, Accuracy, MaskProvider, SegmentationModel, ThreadedSegmenter,
};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Consecutive capture failures tolerated before the stream is considered lost
const MAX_CAPTURE_FAILURES: u32 = 30;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Capture resolution preset
    #[arg(short, long, value_enum, default_value_t = ResolutionPreset::Standard)]
    resolution: ResolutionPreset,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Write composited frames as PNG files here instead of the loopback device
    #[arg(long)]
    dump_dir: Option<PathBuf>,

    /// Only dump every Nth frame
    #[arg(long, default_value_t = 1)]
    dump_every: u64,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to segmentation model (ONNX file)
    /// If not provided, runs in passthrough mode without segmentation
    #[arg(long)]
    model: Option<String>,

    /// Model accuracy mode (switch live by typing `fast` or `accurate`)
    #[arg(long, value_enum, default_value_t = Accuracy::Accurate)]
    accuracy: Accuracy,

    /// Weight of the newest mask in the temporal average, in (0, 1]
    #[arg(long, default_value_t = 0.35)]
    ema_alpha: f32,

    /// Edge feather radius in pixels
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    feather: f32,

    /// Edge dilation radius in pixels
    #[arg(long, default_value_t = 0.5, allow_negative_numbers = true)]
    dilate: f32,

    /// RGB scale under the matte, clamped to [0.975, 1.0]
    #[arg(long, default_value_t = 0.985)]
    rgb_shrink: f32,

    /// Run the model on every Nth frame
    #[arg(long, default_value_t = 1)]
    cadence: u32,

    /// Skip the final softening blur of the output matte
    #[arg(long)]
    no_final_soften: bool,

    /// Background color behind the cut-out on the loopback device, as r,g,b
    #[arg(long, default_value = "0,255,0", value_parser = parse_rgb)]
    key_color: Rgb<u8>,

    /// Do not mirror the user-facing camera
    #[arg(long)]
    no_mirror: bool,

    /// Show matte visualization (grayscale silhouette) instead of the cut-out
    #[arg(long)]
    show_matte: bool,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            feather_radius: self.feather,
            dilate_radius: self.dilate,
            ema_alpha: self.ema_alpha,
            rgb_shrink_factor: self.rgb_shrink,
            model_cadence_divider: self.cadence,
            accuracy: self.accuracy,
            final_soften: !self.no_final_soften,
        }
    }
}

fn parse_rgb(value: &str) -> Result<Rgb<u8>, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [r, g, b] = parts.as_slice() else {
        return Err(format!("expected r,g,b but got {value:?}"));
    };
    let channel = |s: &str| s.parse::<u8>().map_err(|err| format!("{s:?}: {err}"));
    Ok(Rgb([channel(*r)?, channel(*g)?, channel(*b)?]))
}

fn main() -> Result<()> {
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

    tracing::info!("Cutout starting");

    let config = args.pipeline_config();
    config.validate().context("Invalid pipeline configuration")?;

    // Initialize capture
    let mut capture = WebcamCapture::new(args.input_device, args.resolution, args.fps, !args.no_mirror)
        .context("Failed to initialize webcam capture")?;
    let (width, height) = capture.resolution();
    tracing::info!("Capture: {}x{}", width, height);
    tracing::info!("Target FPS: {}", args.fps);

    // Initialize output
    let mut output: Box<dyn OutputSink> = match &args.dump_dir {
        Some(directory) => Box::new(FrameDump::new(directory, args.dump_every)?),
        None => Box::new(
            V4L2Output::new(&args.output_device, width, height, args.key_color)
                .context("Failed to initialize v4l2loopback output")?,
        ),
    };

    // Initialize segmentation model if provided
    let controller = if let Some(model_path) = &args.model {
        tracing::info!("Loading segmentation model from {}", model_path);
        let model = segmentation::create_default_model(model_path, args.accuracy)
            .context("Failed to load segmentation model")?;
        let (model_w, model_h) = model.input_size();
        tracing::info!("Segmentation model ready, input {}x{}", model_w, model_h);
        let provider = ThreadedSegmenter::spawn(model)?;
        Some(Controller::new(config, provider)?)
    } else {
        tracing::info!("Running in passthrough mode (no segmentation)");
        None
    };

    let controls = spawn_stdin_reader();

    run_pipeline(
        &mut capture,
        output.as_mut(),
        controller,
        &controls,
        args.fps,
        args.show_matte,
    )
}

fn run_pipeline<C, O, P>(
    capture: &mut C,
    output: &mut O,
    mut controller: Option<Controller<P>>,
    controls: &Receiver<ControlCommand>,
    target_fps: u32,
    mut show_matte: bool,
) -> Result<()>
where
    C: CaptureSource,
    O: OutputSink + ?Sized,
    P: MaskProvider,
{
    let frame_duration = Duration::from_secs_f32(1.0 / target_fps.max(1) as f32);
    let mut frame_count = 0u64;
    let mut capture_failures = 0u32;
    let mut total_capture_time = Duration::ZERO;
    let mut total_pipeline_time = Duration::ZERO;
    let mut total_output_time = Duration::ZERO;
    // Passthrough and matte preview frames
    let mut display = RgbaImage::new(0, 0);

    tracing::info!("Starting main pipeline loop");
    if controller.is_some() {
        tracing::info!("Segmentation enabled, show_matte={}", show_matte);
    }
    tracing::info!("Type fast/accurate/matte/stats/quit and Enter to control, Ctrl+C to stop");

    loop {
        let loop_start = Instant::now();

        while let Ok(command) = controls.try_recv() {
            match command {
                ControlCommand::SetAccuracy(accuracy) => match controller.as_mut() {
                    Some(controller) => controller.set_accuracy(accuracy),
                    None => tracing::warn!("No model loaded, ignoring accuracy switch"),
                },
                ControlCommand::ToggleMatte => {
                    show_matte = !show_matte;
                    tracing::info!("show_matte={}", show_matte);
                }
                ControlCommand::Stats => {
                    if let Some(controller) = &controller {
                        tracing::info!("{:?}", controller.stats());
                    }
                }
                ControlCommand::Quit => {
                    if let Some(controller) = controller.as_mut() {
                        controller.stop();
                    }
                    tracing::info!("Stopped after {} frames", frame_count);
                    return Ok(());
                }
            }
        }

        // Capture frame
        let capture_start = Instant::now();
        let frame = match capture.capture_frame() {
            Ok(frame) => {
                capture_failures = 0;
                frame
            }
            Err(err) => {
                capture_failures += 1;
                if capture_failures >= MAX_CAPTURE_FAILURES {
                    bail!("Camera stopped delivering frames: {:#}", err);
                }
                tracing::warn!("Dropping frame: {:#}", err);
                std::thread::sleep(frame_duration);
                continue;
            }
        };
        total_capture_time += capture_start.elapsed();

        // Refine and composite (if model is loaded)
        let pipeline_start = Instant::now();
        let output_frame: &RgbaImage = match controller.as_mut() {
            Some(controller) => {
                let outcome = controller.tick(&frame);
                tracing::debug!("Frame {}: {:?}", frame_count, outcome);
                if show_matte {
                    matte_preview_into(controller.smoothed_mask(), &mut display);
                    &display
                } else if outcome == TickOutcome::Skipped {
                    passthrough_into(&frame, &mut display);
                    &display
                } else {
                    controller.output()
                }
            }
            None => {
                passthrough_into(&frame, &mut display);
                &display
            }
        };
        total_pipeline_time += pipeline_start.elapsed();

        // Output frame
        let output_start = Instant::now();
        if let Err(err) = output.write_frame(output_frame) {
            tracing::warn!("Failed to write frame: {:#}", err);
        }
        total_output_time += output_start.elapsed();

        frame_count += 1;

        // Log stats every 30 frames
        if frame_count % 30 == 0 {
            let avg_capture_ms = total_capture_time.as_secs_f64() * 1000.0 / frame_count as f64;
            let avg_pipeline_ms = total_pipeline_time.as_secs_f64() * 1000.0 / frame_count as f64;
            let avg_output_ms = total_output_time.as_secs_f64() * 1000.0 / frame_count as f64;
            let total_ms = avg_capture_ms + avg_pipeline_ms + avg_output_ms;
            let actual_fps = 1000.0 / total_ms;

            match &controller {
                Some(controller) => {
                    let stats = controller.stats();
                    tracing::info!(
                        "Frame {}: capture={:.1}ms, pipeline={:.1}ms, output={:.1}ms, total={:.1}ms, fps={:.1}, masks={}, reused={}, failures={}",
                        frame_count,
                        avg_capture_ms,
                        avg_pipeline_ms,
                        avg_output_ms,
                        total_ms,
                        actual_fps,
                        stats.refreshed,
                        stats.reused,
                        stats.model_failures
                    );
                }
                None => {
                    tracing::info!(
                        "Frame {}: capture={:.1}ms, output={:.1}ms, total={:.1}ms, fps={:.1}",
                        frame_count,
                        avg_capture_ms,
                        avg_output_ms,
                        total_ms,
                        actual_fps
                    );
                }
            }
        }

        // Frame rate limiting
        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }
}

/// Opaque copy of `frame` into `out`, reallocating only on a size change
fn passthrough_into(frame: &RgbImage, out: &mut RgbaImage) {
    if out.dimensions() != frame.dimensions() {
        *out = RgbaImage::new(frame.width(), frame.height());
    }
    for (dst, src) in out.pixels_mut().zip(frame.pixels()) {
        let Rgb([r, g, b]) = *src;
        *dst = Rgba([r, g, b, 255]);
    }
}
