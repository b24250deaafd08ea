//! camcalib CLI: calibrate from chessboard frames, rectify a frame sequence
//! and render the AR cylinder.

use camcalib::chessboard::ChessboardDetector;
use camcalib::frames::{
    CommandSource, DisplaySink, ImageSequence, NullSink, PngSequenceSink, ScriptedCommands,
};
use camcalib::io::{CalibrationRecord, PipelineConfig};
use camcalib::session::{
    calibrate_frames, detection_preview, select_frames, ArSession, RectifySession,
};
use camcalib::UndistortParams;
use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::PathBuf;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "camcalib")]
#[command(about = "Chessboard camera calibration, undistortion and AR overlay")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate intrinsics and distortion from frames showing the board.
    Calibrate(CalibrateArgs),
    /// Write undistorted copies of a frame sequence.
    Rectify(RectifyArgs),
    /// Estimate the board pose per frame and draw a cylinder on it.
    Ar(ArArgs),
    /// Report board detection per frame, optionally writing previews.
    Detect(DetectArgs),
}

#[derive(Debug, Clone, Args)]
struct FrameArgs {
    /// Directory of input frames, processed in file-name order.
    #[arg(long)]
    frames: PathBuf,

    /// Stop after this frame index.
    #[arg(long)]
    stop_at: Option<usize>,
}

#[derive(Debug, Clone, Args)]
struct CalibrateArgs {
    /// JSON pipeline config (pattern, flags, detector).
    #[arg(long)]
    config: PathBuf,

    #[command(flatten)]
    input: FrameArgs,

    /// Frame indices to use (comma separated). All frames when omitted.
    #[arg(long, value_delimiter = ',')]
    select: Vec<usize>,

    /// Calibration record to write (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Write the selection previews into this directory.
    #[arg(long)]
    preview: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct RectifyArgs {
    /// Calibration record written by `calibrate`.
    #[arg(long)]
    calib: PathBuf,

    /// Optional pipeline config; only `balance` is used.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the config's balance (0 = no black border, 1 = all pixels).
    #[arg(long)]
    balance: Option<f64>,

    #[command(flatten)]
    input: FrameArgs,

    /// Frame indices at which rectification is switched on/off.
    #[arg(long, value_delimiter = ',')]
    toggle_at: Vec<usize>,

    /// Output directory for the PNG sequence.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct ArArgs {
    /// JSON pipeline config (pattern, detector, cylinder).
    #[arg(long)]
    config: PathBuf,

    /// Calibration record written by `calibrate`.
    #[arg(long)]
    calib: PathBuf,

    #[command(flatten)]
    input: FrameArgs,

    /// Output directory for the PNG sequence.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct DetectArgs {
    /// JSON pipeline config (pattern, detector).
    #[arg(long)]
    config: PathBuf,

    #[command(flatten)]
    input: FrameArgs,

    /// Write corner overlays into this directory.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(err) = run(cli.command) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    #[cfg(feature = "tracing")]
    {
        let _ = verbose;
        let _ = tracing_log::LogTracer::init();
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = camcalib::core::init_with_verbosity(verbose);
    }
}

fn run(command: Commands) -> CliResult<()> {
    match command {
        Commands::Calibrate(args) => run_calibrate(&args),
        Commands::Rectify(args) => run_rectify(&args),
        Commands::Ar(args) => run_ar(&args),
        Commands::Detect(args) => run_detect(&args),
    }
}

fn commands(input: &FrameArgs, select: &[usize], toggle: &[usize]) -> ScriptedCommands {
    ScriptedCommands::new()
        .select(select.iter().copied())
        .toggle(toggle.iter().copied())
        .stop_at(input.stop_at)
}

fn selection(
    source: &mut ImageSequence,
    cmds: &mut impl CommandSource,
    preview: &Option<PathBuf>,
) -> CliResult<Vec<camcalib::RgbImage>> {
    match preview {
        Some(dir) => {
            let mut sink = PngSequenceSink::create(dir)?;
            let frames = select_frames(source, cmds, &mut sink)?;
            sink.finish()?;
            Ok(frames)
        }
        None => Ok(select_frames(source, cmds, &mut NullSink)?),
    }
}

fn run_calibrate(args: &CalibrateArgs) -> CliResult<()> {
    let config = PipelineConfig::load_json(&args.config)?;
    let mut source = ImageSequence::open(&args.input.frames)?;
    let mut cmds = if args.select.is_empty() {
        commands(&args.input, &(0..source.len()).collect::<Vec<_>>(), &[])
    } else {
        commands(&args.input, &args.select, &[])
    };
    let frames = selection(&mut source, &mut cmds, &args.preview)?;
    if frames.is_empty() {
        return Err("no frames were selected".into());
    }

    let outcome = calibrate_frames(&frames, &config)?;
    let record = outcome.record();
    record.save_json(&args.out)?;

    let k = record.intrinsics;
    let d = record.distortion;
    println!("## Camera Calibration Results");
    println!("* The number of selected images = {}", frames.len());
    println!("* The number of used images = {}", outcome.used_frames.len());
    println!("* RMS error = {:.6}", record.rms);
    println!("* Camera matrix (K) =");
    println!("  [{:.6} {:.6} {:.6}]", k.fx, k.skew, k.cx);
    println!("  [{:.6} {:.6} {:.6}]", 0.0, k.fy, k.cy);
    println!("  [{:.6} {:.6} {:.6}]", 0.0, 0.0, 1.0);
    println!(
        "* Distortion coefficient (k1, k2, p1, p2, k3) = [{:.6} {:.6} {:.6} {:.6} {:.6}]",
        d.k1, d.k2, d.p1, d.p2, d.k3
    );
    info!("calibration written to {}", args.out.display());
    Ok(())
}

fn run_rectify(args: &RectifyArgs) -> CliResult<()> {
    let record = CalibrationRecord::load_json(&args.calib)?;
    let mut params = match &args.config {
        Some(path) => PipelineConfig::load_json(path)?.undistort_params(),
        None => UndistortParams::default(),
    };
    if let Some(balance) = args.balance {
        if !(0.0..=1.0).contains(&balance) {
            return Err(format!("balance must lie in [0, 1], got {balance}").into());
        }
        params.balance = balance;
    }

    let mut session = RectifySession::new(record.model()?, params);
    let mut source = ImageSequence::open(&args.input.frames)?;
    let mut cmds = commands(&args.input, &[], &args.toggle_at);
    let mut sink = PngSequenceSink::create(&args.out)?;
    let shown = session.run(&mut source, &mut cmds, &mut sink)?;
    let written = sink.finish()?;
    println!(
        "rectify: {shown} frames, {written} written to {}",
        args.out.display()
    );
    Ok(())
}

fn run_ar(args: &ArArgs) -> CliResult<()> {
    let config = PipelineConfig::load_json(&args.config)?;
    let record = CalibrationRecord::load_json(&args.calib)?;
    let session = ArSession::from_config(record.model()?, &config)?;

    let mut source = ImageSequence::open(&args.input.frames)?;
    let mut cmds = commands(&args.input, &[], &[]);
    let mut sink = PngSequenceSink::create(&args.out)?;
    let stats = session.run(&mut source, &mut cmds, &mut sink)?;
    sink.finish()?;
    println!(
        "ar: augmented {} of {} frames, written to {}",
        stats.augmented,
        stats.frames,
        args.out.display()
    );
    Ok(())
}

fn run_detect(args: &DetectArgs) -> CliResult<()> {
    use camcalib::frames::FrameSource;

    let config = PipelineConfig::load_json(&args.config)?;
    let detector = ChessboardDetector::new(config.detector.clone());
    let mut source = ImageSequence::open(&args.input.frames)?;
    let mut sink: Option<PngSequenceSink> = match &args.out {
        Some(dir) => Some(PngSequenceSink::create(dir)?),
        None => None,
    };

    let mut index = 0;
    let mut found = 0;
    while let Some(frame) = source.next_frame()? {
        let (preview, detection) = detection_preview(&frame, &config.pattern, &detector);
        match &detection {
            Some(det) => {
                found += 1;
                let note = if det.symmetric { " (symmetric board)" } else { "" };
                println!("frame {index}: {} corners{note}", det.corners.len());
            }
            None => println!("frame {index}: board not found"),
        }
        if let Some(sink) = sink.as_mut() {
            sink.show(&preview, None);
        }
        if args.input.stop_at == Some(index) {
            break;
        }
        index += 1;
    }
    if let Some(sink) = sink {
        sink.finish()?;
    }
    println!("detected the board in {found} frames");
    Ok(())
}
