//! Error types for the `framesnap` crate.
//!
//! This module defines [`ExtractError`], the unified error type returned by
//! every fallible operation in the crate. Each pipeline stage has its own
//! variant so callers can tell a bad input apart from a decoder fault or a
//! crashed worker, while the [`Display`](std::fmt::Display) text stays a
//! single human-readable sentence suitable for showing to an end user.

use std::io::Error as IoError;

use ffmpeg_next::Error as FfmpegError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What went wrong while demultiplexing a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum DemuxErrorKind {
    /// A box header or table was truncated or internally inconsistent.
    Malformed(String),
    /// The container holds no track with a video handler.
    NoVideoTrack,
    /// A video track was found but its sample table is empty.
    NoSamples,
}

impl std::fmt::Display for DemuxErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DemuxErrorKind::Malformed(reason) => write!(f, "malformed container: {reason}"),
            DemuxErrorKind::NoVideoTrack => write!(f, "no video track found"),
            DemuxErrorKind::NoSamples => write!(f, "failed to extract video samples"),
        }
    }
}

/// The unified error type for all `framesnap` operations.
///
/// Every stage failure aborts the remaining pipeline for that request. No
/// variant ever carries a partial result.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExtractError {
    /// The input could not be normalized into the canonical container/codec
    /// (engine failed to initialise, unsupported input, encoder failure).
    #[error("Failed to transcode video: {0}")]
    Transcode(String),

    /// The canonical container could not be parsed.
    #[error("Failed to demux video: {0}")]
    Demux(DemuxErrorKind),

    /// The codec rejected its configuration or one of the samples.
    #[error("Failed to decode video: {0}")]
    Decode(String),

    /// The image rendering surface could not be created.
    #[error("Failed to render frame: {0}")]
    Render(String),

    /// Every stage succeeded but no frame passed the sampling predicate.
    #[error("No frames were extracted from the video")]
    EmptyResult,

    /// The isolated worker crashed or could not be reached.
    #[error("Extraction worker failed: {0}")]
    TransportFault(String),

    /// A sampling interval of zero was provided.
    #[error("Sampling interval must be greater than zero")]
    InvalidInterval,

    /// An error originating from the FFmpeg libraries outside a known stage.
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

impl ExtractError {
    /// Shorthand for a [`DemuxErrorKind::Malformed`] error.
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        ExtractError::Demux(DemuxErrorKind::Malformed(reason.into()))
    }
}

impl From<FfmpegError> for ExtractError {
    fn from(error: FfmpegError) -> Self {
        ExtractError::Ffmpeg(error.to_string())
    }
}
