use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use nirtrack_core::recorder::{check_frame_numbers, read_records};
use nirtrack_core::session::SessionSummary;
use nirtrack_core::{OutputSink, PanelLayout, RecordWriter, Roi, SessionConfig, Statistic, TrackingSession};
use nirtrack_io::ImageSequence;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

/// Seeds used when no ROI is given on the command line or in the session file.
const DEFAULT_ROIS: [Roi; 2] = [Roi::new(10.0, 100.0, 30.0, 50.0), Roi::new(100.0, 100.0, 50.0, 30.0)];

#[derive(Parser)]
#[command(name = "nirtrack", about = "Visible-light ROI tracking with infrared intensity recording")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track regions over a frame sequence and record infrared intensities
    Track(TrackArgs),
    /// Validate an output file and print its record count
    Check {
        /// Output JSON written by `track`
        file: PathBuf,
    },
}

#[derive(Args)]
struct TrackArgs {
    /// Directory of combined visible/infrared frames, one image per frame
    #[arg(short, long)]
    frames: PathBuf,
    /// Session TOML (ROIs, statistics, panel layout, tracker tuning)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Seed region on the first visible frame; repeat for more regions
    #[arg(long = "roi", value_name = "L,T,W,H")]
    rois: Vec<Roi>,
    /// Intensity statistic (median, mean, std, min, max)
    #[arg(long)]
    aggregate: Option<Statistic>,
    /// Optional spread statistic recorded next to the intensity
    #[arg(long)]
    spread: Option<Statistic>,
    /// Output JSON path [env: NIRTRACK_OUTPUT, default: Output.json]
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Frames to skip before the seed frame [env: NIRTRACK_SKIP_FRAMES]
    #[arg(long)]
    skip: Option<usize>,
    /// Frames to record after the seed frame, 0 for all [env: NIRTRACK_MAX_FRAMES, default: 500]
    #[arg(long)]
    max_frames: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Track(args) => {
            let env = Config::from_env();
            let output = args.output.clone().unwrap_or_else(|| env.output.clone());
            let summary = track(&args, &env)?;
            println!("Recorded {} frames to {}", summary.frames, output.display());
            if summary.degraded_frames > 0 {
                println!(
                    "{} frames lost at least one ROI; {} measurements written as -1",
                    summary.degraded_frames, summary.invalid_measurements
                );
            }
        }
        Commands::Check { file } => {
            let count = check(&file)?;
            println!("{count}");
        }
    }

    Ok(())
}

/// Merge the session file with command-line overrides.
fn session_config(args: &TrackArgs) -> Result<SessionConfig> {
    let mut session = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if !args.rois.is_empty() {
        session.rois = args.rois.clone();
    }
    if let Some(aggregate) = args.aggregate {
        session.aggregate = aggregate;
    }
    if args.spread.is_some() {
        session.spread = args.spread;
    }
    if session.rois.is_empty() {
        tracing::info!("no ROIs given, using default seeds");
        session.rois = DEFAULT_ROIS.to_vec();
        if session.spread.is_none() {
            session.spread = Some(Statistic::Std);
        }
    }
    Ok(session)
}

fn track(args: &TrackArgs, env: &Config) -> Result<SessionSummary> {
    let session_config = session_config(args)?;
    // Reject a bad session before the output file is touched
    session_config.validate()?;
    let output = args.output.clone().unwrap_or_else(|| env.output.clone());
    let skip = args.skip.unwrap_or(env.skip_frames);
    let max_frames = args.max_frames.unwrap_or(env.max_frames);

    let mut frames = ImageSequence::open(&args.frames)?.skip_frames(skip);
    if max_frames > 0 {
        // Seed frame plus the recorded ones
        frames = frames.limit(max_frames.saturating_add(1));
    }

    let seed = frames
        .next()
        .with_context(|| format!("no frames left in {} after skipping {skip}", args.frames.display()))??;
    let seed = session_config.layout.split_for_tracking(&seed)?;

    let recorder = RecordWriter::create(&output).with_context(|| format!("failed to create {}", output.display()))?;
    let mut session = TrackingSession::start(&session_config, &seed.visible, recorder)?;

    // The output array is terminated even when a frame fails.
    let recorded = record_frames(&mut session, &session_config.layout, frames);
    let closed = session.close();
    recorded?;
    Ok(closed?)
}

fn record_frames<W: OutputSink>(
    session: &mut TrackingSession<W>,
    layout: &PanelLayout,
    frames: ImageSequence,
) -> Result<()> {
    for frame in frames {
        let frame = frame?;
        let pair = layout
            .split_for_tracking(&frame)
            .with_context(|| format!("frame {}", frame.sequence))?;
        session.step(&pair)?;
    }
    Ok(())
}

/// Validate an output file. Returns the number of records.
fn check(path: &Path) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let records = read_records(BufReader::new(file))?;
    let count = check_frame_numbers(&records)?;
    tracing::debug!(path = %path.display(), records = count, "output file is well formed");
    Ok(count)
}
