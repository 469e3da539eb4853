mod settings;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use facesnap_core::capture::domain::capture_session::CaptureSession;
use facesnap_core::capture::domain::capture_state::CaptureOutcome;
use facesnap_core::capture::infrastructure::file_capture_device::FileCaptureDevice;
use facesnap_core::capture::infrastructure::log_notification_sink::LogNotificationSink;
use facesnap_core::detection::infrastructure::scripted_classifier::ScriptedClassifier;
use facesnap_core::pipeline::capture_consumer::CaptureConsumer;
use facesnap_core::pipeline::diagnostics::{DiagnosticsSink, LogDiagnostics};
use facesnap_core::pipeline::face_capture_use_case::{FaceCaptureUseCase, SessionReport};
use facesnap_core::video::infrastructure::image_directory_source::ImageDirectorySource;
use facesnap_core::video::infrastructure::image_file_writer::ImageFileWriter;

use settings::Settings;

/// Watch a camera feed and take one picture as soon as a face shows up.
#[derive(Parser)]
#[command(name = "facesnap")]
struct Cli {
    /// Directory of images replayed as the camera feed.
    frames_dir: PathBuf,

    /// JSON script with the per-frame face detection results.
    #[arg(long)]
    detections: PathBuf,

    /// Directory captured pictures are written to.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Settings file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Delay between frames in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Number of capture sessions to run back to back.
    #[arg(long)]
    sessions: Option<u32>,

    /// Replay the frames directory endlessly.
    #[arg(long = "loop")]
    loop_frames: bool,

    /// Open each captured picture in the default viewer.
    #[arg(long)]
    open: bool,

    /// JPEG quality of captured pictures (1-100).
    #[arg(long)]
    jpeg_quality: Option<u8>,

    /// Longer side frames are downscaled to before detection (0 = full size).
    #[arg(long)]
    analysis_size: Option<u32>,

    /// Clockwise rotation that turns the camera image upright (0, 90, 180, 270).
    #[arg(long)]
    rotation: Option<u16>,

    /// Write the effective settings back to the settings file.
    #[arg(long)]
    save_config: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let settings = apply_overrides(&cli, Settings::load(cli.config.as_deref()));
    if cli.save_config {
        let path = settings.save(cli.config.as_deref())?;
        log::info!("Settings saved to {}", path.display());
    }

    let classifier = ScriptedClassifier::from_path(&cli.detections)?;
    let source = build_source(&cli, &settings);

    let writer = ImageFileWriter::new().with_jpeg_quality(settings.jpeg_quality);
    let device = FileCaptureDevice::new(
        Arc::new(source.still_source()),
        Arc::new(writer),
        &settings.output_dir,
    )
    .with_prefix(settings.file_prefix.clone());
    let notifier = if settings.open_on_capture {
        LogNotificationSink::new().opening_captures()
    } else {
        LogNotificationSink::new()
    };

    let session = CaptureSession::start();
    let consumer = CaptureConsumer::spawn(session.clone(), Box::new(device), Box::new(notifier));
    let diagnostics = Arc::new(LogDiagnostics::new());
    let mut use_case = FaceCaptureUseCase::new(
        Box::new(source),
        Box::new(classifier),
        session.clone(),
        diagnostics.clone(),
        None,
    );

    let mut failures = 0;
    for run_index in 0..settings.sessions {
        if run_index > 0 {
            session.reset();
        }
        let report = use_case.execute()?;
        if matches!(report.outcome, Some(CaptureOutcome::Failure(_))) {
            failures += 1;
        }
        print_report(&report);
    }

    consumer.shutdown()?;
    diagnostics.summary();

    if failures > 0 {
        return Err(format!("{failures} of {} captures failed", settings.sessions).into());
    }
    Ok(())
}

fn build_source(cli: &Cli, settings: &Settings) -> ImageDirectorySource {
    ImageDirectorySource::new(&cli.frames_dir)
        .with_interval(Duration::from_millis(settings.frame_interval_ms))
        .with_looping(settings.loop_frames)
        .with_analysis_max_dimension(Some(settings.analysis_max_dimension))
        .with_rotation(settings.rotation_degrees)
}

fn apply_overrides(cli: &Cli, mut settings: Settings) -> Settings {
    if let Some(output) = &cli.output {
        settings.output_dir = output.clone();
    }
    if let Some(interval) = cli.interval_ms {
        settings.frame_interval_ms = interval;
    }
    if let Some(sessions) = cli.sessions {
        settings.sessions = sessions;
    }
    if let Some(quality) = cli.jpeg_quality {
        settings.jpeg_quality = quality;
    }
    if let Some(size) = cli.analysis_size {
        settings.analysis_max_dimension = size;
    }
    if let Some(rotation) = cli.rotation {
        settings.rotation_degrees = rotation;
    }
    settings.loop_frames |= cli.loop_frames;
    settings.open_on_capture |= cli.open;
    settings
}

fn print_report(report: &SessionReport) {
    match &report.outcome {
        Some(CaptureOutcome::Success(handle)) => {
            println!("Session {}: saved {}", report.session, handle.path().display())
        }
        Some(CaptureOutcome::Failure(error)) => {
            println!("Session {}: capture failed: {error}", report.session)
        }
        None if report.cancelled => println!("Session {}: cancelled", report.session),
        None => println!(
            "Session {}: no face in {} frames",
            report.session, report.frames_received
        ),
    }
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if !cli.frames_dir.is_dir() {
        return Err(format!("Frames directory not found: {}", cli.frames_dir.display()).into());
    }
    if !cli.detections.is_file() {
        return Err(format!("Detection script not found: {}", cli.detections.display()).into());
    }
    if let Some(q) = cli.jpeg_quality {
        if !(1..=100).contains(&q) {
            return Err(format!("JPEG quality must be between 1 and 100, got {q}").into());
        }
    }
    if let Some(r) = cli.rotation {
        if r % 90 != 0 || r >= 360 {
            return Err(format!("Rotation must be 0, 90, 180 or 270, got {r}").into());
        }
    }
    if cli.sessions == Some(0) {
        return Err("At least one session is required".into());
    }
    Ok(())
}
