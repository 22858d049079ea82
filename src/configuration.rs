//! Extraction configuration.
//!
//! [`ExtractOptions`] is a builder that threads the sampling interval,
//! progress callback, and normalization settings through
//! [`Coordinator::extract`](crate::Coordinator::extract) without polluting
//! its signature.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use framesnap::{ExtractOptions, NormalizeOptions};
//!
//! let options = ExtractOptions::new()
//!     .with_interval(Duration::from_secs(5))
//!     .with_normalize_options(NormalizeOptions::default().with_crf(28));
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ExtractError;
use crate::progress::{NoOpProgress, ProgressCallback};

/// Default spacing between selected frames.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Encoder settings for the canonical re-encode.
///
/// The output is always H.264 in `yuv420p` inside an MP4 container with
/// audio dropped; these knobs only trade speed against size and quality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// x264 preset name. Defaults to `"ultrafast"`.
    pub preset: String,
    /// Constant Rate Factor (0-51, lower is better). `None` keeps the
    /// encoder default.
    pub crf: Option<u32>,
    /// Move the `moov` box in front of `mdat` so the demuxer can emit
    /// samples while the buffer is still arriving. Defaults to `true`.
    pub faststart: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            preset: "ultrafast".to_string(),
            crf: None,
            faststart: true,
        }
    }
}

impl NormalizeOptions {
    /// Set the encoder preset.
    #[must_use]
    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }

    /// Set the CRF quality value. Clamped to 51.
    #[must_use]
    pub fn with_crf(mut self, crf: u32) -> Self {
        self.crf = Some(crf.min(51));
        self
    }

    /// Enable or disable the faststart layout.
    #[must_use]
    pub fn with_faststart(mut self, faststart: bool) -> Self {
        self.faststart = faststart;
        self
    }
}

/// Configuration for one extraction request.
///
/// All fields have sensible defaults: a two second interval, no progress
/// callback, and normalization enabled.
#[derive(Clone)]
pub struct ExtractOptions {
    pub(crate) interval: Duration,
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) normalize: bool,
    pub(crate) normalize_options: NormalizeOptions,
}

impl Debug for ExtractOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ExtractOptions")
            .field("interval", &self.interval)
            .field("has_progress", &true)
            .field("normalize", &self.normalize)
            .field("normalize_options", &self.normalize_options)
            .finish()
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractOptions {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            progress: Arc::new(NoOpProgress),
            normalize: true,
            normalize_options: NormalizeOptions::default(),
        }
    }

    /// Set the minimum presentation-time gap between selected frames.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Skip the re-encode when the input is already a canonical MP4.
    ///
    /// With normalization disabled the input bytes go to the worker as-is,
    /// so codecs the decoder cannot handle fail with
    /// [`ExtractError::Decode`].
    #[must_use]
    pub fn with_normalization(mut self, enabled: bool) -> Self {
        self.normalize = enabled;
        self
    }

    /// Set the encoder settings used by the normalizer.
    #[must_use]
    pub fn with_normalize_options(mut self, options: NormalizeOptions) -> Self {
        self.normalize_options = options;
        self
    }

    /// The sampling interval in whole microseconds.
    ///
    /// # Errors
    ///
    /// [`ExtractError::InvalidInterval`] if the interval rounds to zero.
    pub fn interval_micros(&self) -> Result<i64, ExtractError> {
        let micros = i64::try_from(self.interval.as_micros()).unwrap_or(i64::MAX);
        if micros <= 0 {
            return Err(ExtractError::InvalidInterval);
        }
        Ok(micros)
    }
}
