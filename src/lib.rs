//! # framesnap
//!
//! Extract timestamped still frames from arbitrary video files at a fixed
//! interval.
//!
//! `framesnap` re-encodes any input FFmpeg can read into a canonical MP4
//! (H.264, yuv420p, `moov` first, no audio), demultiplexes it with a
//! built-in ISO-BMFF parser, decodes the samples with FFmpeg, keeps one
//! frame every interval (two seconds by default), and returns each kept
//! frame as a base64 PNG keyed by its presentation timestamp in
//! microseconds. Demux, decode and render run on a dedicated worker thread
//! that receives the canonical buffer by move and replies with a
//! serialized message.
//!
//! ## Quick Start
//!
//! ```no_run
//! use framesnap::{Coordinator, ExtractOptions, VideoBuffer};
//!
//! # async fn example() -> Result<(), framesnap::ExtractError> {
//! let mut coordinator = Coordinator::new()?;
//! let frames = coordinator
//!     .extract(VideoBuffer::from_path("input.webm")?, &ExtractOptions::new())
//!     .await?;
//!
//! for frame in &frames {
//!     println!("{:.1}s {}x{}", frame.seconds(), frame.width, frame.height);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Demux Only
//!
//! ```no_run
//! let bytes = std::fs::read("canonical.mp4").unwrap();
//! let (track, samples) = framesnap::demux::demux(&bytes).unwrap();
//! println!("{} with {} samples", track.codec, samples.len());
//! ```
//!
//! ## Pipeline
//!
//! | Stage | Module | Runs on |
//! |-------|--------|---------|
//! | Normalize | [`normalize`] | Tokio blocking pool |
//! | Demux | [`demux`] | worker thread |
//! | Decode and sample | [`decode`], [`sampler`] | worker thread |
//! | Render | [`render`] | worker thread |
//! | Assemble | [`coordinator`] | caller task |
//!
//! ## Requirements
//!
//! FFmpeg development libraries (with libx264 for normalization) must be
//! installed on your system.

pub mod buffer;
pub mod configuration;
pub mod coordinator;
pub mod decode;
pub mod demux;
pub mod error;
pub mod ffmpeg;
pub mod normalize;
pub mod progress;
pub mod record;
pub mod render;
pub mod sampler;
mod utilities;
pub mod worker;

pub use buffer::{TransferSlot, VideoBuffer};
pub use configuration::{DEFAULT_INTERVAL, ExtractOptions, NormalizeOptions};
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use decode::{DecodedFrame, FfmpegDecoder, FrameSink, VideoDecoder};
pub use demux::{Mp4Demuxer, Sample, Track};
pub use error::{DemuxErrorKind, ExtractError};
pub use ffmpeg::{FfmpegLogLevel, set_ffmpeg_log_level};
pub use normalize::{FfmpegNormalizer, Normalizer};
pub use progress::{ExtractionStage, ProgressCallback, ProgressInfo, ProgressState};
pub use record::{FrameRecord, ResultMapping};
pub use render::PngRenderer;
pub use sampler::{IntervalSampler, decode_and_sample};
pub use utilities::ticks_to_micros;
pub use worker::{ExtractionWorker, FramePipeline, Mp4FramePipeline, WorkerReply};
