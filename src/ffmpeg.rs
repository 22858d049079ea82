//! FFmpeg engine bootstrap and log level configuration.
//!
//! FFmpeg has its own internal logging system, separate from the Rust
//! [`log`](https://crates.io/crates/log) crate. By default, FFmpeg prints
//! warnings and errors to stderr, which is noisy when the normalizer runs
//! on every request. [`set_ffmpeg_log_level`] tunes that output without
//! importing `ffmpeg-next` directly.
//!
//! The engine itself is process-wide: [`engine`] initialises it exactly once
//! and every later call observes the same outcome.
//!
//! # Example
//!
//! ```no_run
//! use framesnap::FfmpegLogLevel;
//!
//! // Silence all FFmpeg output except fatal errors.
//! framesnap::set_ffmpeg_log_level(FfmpegLogLevel::Fatal);
//! ```

use std::sync::OnceLock;

use ffmpeg_next::util::log::Level;

/// Outcome of the one and only engine initialisation.
static ENGINE: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialise FFmpeg once per process and return the cached outcome.
///
/// Concurrent first callers block on the same [`OnceLock`] gate, so the
/// underlying `ffmpeg_next::init` runs at most once. A failed
/// initialisation is cached too and reported to every caller.
pub(crate) fn engine() -> Result<(), String> {
    ENGINE
        .get_or_init(|| {
            log::debug!("Initialising FFmpeg engine");
            ffmpeg_next::init().map_err(|error| format!("FFmpeg initialisation failed: {error}"))
        })
        .clone()
}

/// FFmpeg internal log verbosity level.
///
/// Maps directly to FFmpeg's `AV_LOG_*` constants. Setting a level causes
/// FFmpeg to suppress all messages below that severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Print no output at all.
    Quiet,
    /// Only log conditions after which the process will abort.
    Panic,
    /// Only log unrecoverable errors.
    Fatal,
    /// Log recoverable errors.
    Error,
    /// Log warnings (default FFmpeg level).
    Warning,
    /// Log informational messages.
    Info,
    /// Log verbose informational messages.
    Verbose,
    /// Log debugging messages.
    Debug,
    /// Extremely verbose tracing output.
    Trace,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }

    /// Parse a level name as accepted on the command line.
    ///
    /// Matching is case-insensitive; `warn` is accepted for `warning`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "quiet" => Some(FfmpegLogLevel::Quiet),
            "panic" => Some(FfmpegLogLevel::Panic),
            "fatal" => Some(FfmpegLogLevel::Fatal),
            "error" => Some(FfmpegLogLevel::Error),
            "warning" | "warn" => Some(FfmpegLogLevel::Warning),
            "info" => Some(FfmpegLogLevel::Info),
            "verbose" => Some(FfmpegLogLevel::Verbose),
            "debug" => Some(FfmpegLogLevel::Debug),
            "trace" => Some(FfmpegLogLevel::Trace),
            _ => None,
        }
    }
}

/// Set the FFmpeg internal log verbosity level.
///
/// This controls what FFmpeg prints to stderr. It does **not** affect
/// Rust-side `log` crate output.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}
