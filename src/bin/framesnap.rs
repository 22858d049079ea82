use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use framesnap::{
    Coordinator, ExtractOptions, ExtractionStage, FfmpegLogLevel, ProgressCallback, ProgressInfo,
    ResultMapping, VideoBuffer,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  framesnap extract input.mov --out frames\n  framesnap extract input.webm --out frames --interval 5 --progress\n  framesnap extract canonical.mp4 --no-normalize --json > frames.json\n  framesnap probe canonical.mp4 --json\n  framesnap completions zsh > _framesnap";

#[derive(Debug, Parser)]
#[command(
    name = "framesnap",
    version,
    about = "Extract timestamped still frames from video files",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar.
    #[arg(long, global = true)]
    progress: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract one frame per interval as PNG files.
    #[command(
        about = "Extract frames at a fixed interval",
        after_help = "Examples:\n  framesnap extract input.mov --out frames\n  framesnap extract input.mp4 --out frames --interval 0.5 --overwrite"
    )]
    Extract {
        /// Input video path.
        input: PathBuf,
        /// Output directory for `frame_<timestamp>.png` files.
        #[arg(long, required_unless_present = "json")]
        out: Option<PathBuf>,
        /// Sampling interval in seconds.
        #[arg(long, default_value_t = 2.0)]
        interval: f64,
        /// Skip re-encoding; the input must already be an MP4 the
        /// built-in demuxer can read.
        #[arg(long)]
        no_normalize: bool,
        /// Print the frame mapping as JSON instead of writing files.
        #[arg(long)]
        json: bool,
        /// Allow writing into an existing directory and replacing files.
        #[arg(long)]
        overwrite: bool,
    },

    /// Print the video track of an MP4 file.
    #[command(
        about = "Print video track information",
        after_help = "Examples:\n  framesnap probe canonical.mp4\n  framesnap probe canonical.mp4 --json"
    )]
    Probe {
        /// Input MP4 path.
        input: PathBuf,

        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

fn parse_interval(seconds: f64) -> Result<Duration, Box<dyn std::error::Error>> {
    const MESSAGE: &str = "--interval must be a positive number of seconds";
    if seconds <= 0.0 {
        return Err(MESSAGE.into());
    }
    Duration::try_from_secs_f64(seconds).map_err(|error| format!("{MESSAGE}: {error}").into())
}

fn prepare_output_directory(out: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if out.exists() {
        if !overwrite {
            return Err(format!(
                "output directory already exists: {} (use --overwrite)",
                out.display()
            )
            .into());
        }
        eprintln!(
            "{} {}",
            "warning:".yellow().bold(),
            format!("writing into existing directory {}", out.display()).yellow()
        );
    }
    fs::create_dir_all(out)?;
    Ok(())
}

fn frame_file_name(timestamp: i64) -> String {
    format!("frame_{timestamp}.png")
}

fn stage_label(stage: ExtractionStage) -> &'static str {
    match stage {
        ExtractionStage::Starting => "starting",
        ExtractionStage::Normalizing => "normalizing",
        ExtractionStage::Extracting => "extracting",
        ExtractionStage::Complete => "done",
        _ => "",
    }
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(100);
        let style =
            ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}% {msg}")?;
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar })
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.bar.set_position((info.ratio * 100.0).round() as u64);
        self.bar.set_message(stage_label(info.stage));
    }
}

fn write_frames(
    frames: &ResultMapping,
    out: &Path,
    overwrite: bool,
    verbose: bool,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut written = 0;
    for frame in frames {
        let path = out.join(frame_file_name(frame.timestamp));
        if path.exists() && !overwrite {
            return Err(format!(
                "output file already exists: {} (use --overwrite)",
                path.display()
            )
            .into());
        }
        fs::write(&path, STANDARD.decode(&frame.base64)?)?;
        written += 1;
        if verbose {
            eprintln!(
                "saved {:.3}s {}x{} -> {}",
                frame.seconds(),
                frame.width,
                frame.height,
                path.display()
            );
        }
    }
    Ok(written)
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(level) = &cli.global.log_level {
        let parsed =
            FfmpegLogLevel::parse(level).ok_or(format!("unsupported --log-level: {level}"))?;
        framesnap::set_ffmpeg_log_level(parsed);
    }

    match cli.command {
        Commands::Extract {
            input,
            out,
            interval,
            no_normalize,
            json,
            overwrite,
        } => {
            let interval = parse_interval(interval)?;
            if let Some(out) = &out {
                if !json {
                    prepare_output_directory(out, overwrite)?;
                }
            }

            let mut options = ExtractOptions::new()
                .with_interval(interval)
                .with_normalization(!no_normalize);
            let progress = if cli.global.progress {
                let progress = Arc::new(TerminalProgress::new()?);
                options = options.with_progress(progress.clone());
                Some(progress)
            } else {
                None
            };

            let buffer = VideoBuffer::from_path(&input)?;
            if cli.global.verbose {
                eprintln!("read {} bytes from {}", buffer.len(), input.display());
            }

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let mut coordinator = Coordinator::new()?;
            let result = runtime.block_on(coordinator.extract(buffer, &options));

            if let Some(progress) = &progress {
                match &result {
                    Ok(_) => progress.bar.finish_with_message("done"),
                    Err(_) => progress.bar.abandon_with_message("failed"),
                }
            }
            let frames = result?;

            if json {
                println!("{}", serde_json::to_string_pretty(&frames)?);
            } else if let Some(out) = out {
                let written = write_frames(&frames, &out, overwrite, cli.global.verbose)?;
                println!(
                    "{} {}",
                    "success:".green().bold(),
                    format!("Extracted {written} frame(s) to {}", out.display()).green()
                );
            }
        }
        Commands::Probe { input, json } => {
            let bytes = fs::read(&input)?;
            let (track, samples) = framesnap::demux::demux(&bytes)?;
            let keyframes = samples.iter().filter(|sample| sample.is_sync).count();
            let duration_seconds = track.duration_micros() as f64 / 1_000_000.0;

            if json {
                let payload = json!({
                    "track_id": track.id,
                    "codec": track.codec,
                    "width": track.width,
                    "height": track.height,
                    "timescale": track.timescale,
                    "duration_seconds": duration_seconds,
                    "sample_count": samples.len(),
                    "keyframe_count": keyframes,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("Track: {}", track.id);
                println!("Codec: {}", track.codec);
                println!("Resolution: {}x{}", track.width, track.height);
                println!("Timescale: {}", track.timescale);
                println!("Duration: {duration_seconds:.3}s");
                println!("Samples: {} ({} keyframes)", samples.len(), keyframes);
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "framesnap", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, frame_file_name, parse_interval};
    use clap::CommandFactory;

    #[test]
    fn interval_must_be_positive() {
        assert_eq!(parse_interval(2.0).unwrap().as_secs(), 2);
        assert_eq!(parse_interval(0.5).unwrap().as_millis(), 500);
        assert!(parse_interval(0.0).is_err());
        assert!(parse_interval(-1.0).is_err());
        assert!(parse_interval(f64::NAN).is_err());
        assert!(parse_interval(f64::INFINITY).is_err());
        assert!(parse_interval(1e30).is_err());
    }

    #[test]
    fn frame_files_are_named_by_timestamp() {
        assert_eq!(frame_file_name(0), "frame_0.png");
        assert_eq!(frame_file_name(2_000_000), "frame_2000000.png");
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
