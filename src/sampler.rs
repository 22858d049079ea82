//! Interval sampling of decoded frames.
//!
//! Frames are considered in the order the decoder outputs them. A frame is
//! selected when at least one interval has passed since the last selected
//! frame; the first frame at or after time zero always qualifies because
//! the "last selected" timestamp starts one interval in the past.
//!
//! Selected frames are rendered immediately and dropped, so at most one
//! decoded picture is alive at a time.

use crate::decode::{DecodedFrame, FrameSink, VideoDecoder};
use crate::demux::Sample;
use crate::error::ExtractError;
use crate::record::{FrameRecord, ResultMapping};
use crate::render::PngRenderer;

/// The select-every-interval predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalSampler {
    interval: i64,
    last_selected: i64,
}

impl IntervalSampler {
    /// Create a sampler for an interval in microseconds.
    ///
    /// # Errors
    ///
    /// [`ExtractError::InvalidInterval`] if `interval` is not positive.
    pub fn new(interval: i64) -> Result<Self, ExtractError> {
        if interval <= 0 {
            return Err(ExtractError::InvalidInterval);
        }
        Ok(Self {
            interval,
            last_selected: -interval,
        })
    }

    /// Whether a frame at `timestamp` (µs) would be selected.
    pub fn should_select(&self, timestamp: i64) -> bool {
        timestamp.saturating_sub(self.last_selected) >= self.interval
    }

    /// Record that the frame at `timestamp` was selected.
    pub fn mark_selected(&mut self, timestamp: i64) {
        self.last_selected = timestamp;
    }

    /// Test and, if selected, record `timestamp` in one step.
    pub fn offer(&mut self, timestamp: i64) -> bool {
        let selected = self.should_select(timestamp);
        if selected {
            self.mark_selected(timestamp);
        }
        selected
    }
}

/// Sink that renders selected frames into a [`ResultMapping`].
struct RenderingSink<'a> {
    sampler: IntervalSampler,
    renderer: &'a PngRenderer,
    mapping: ResultMapping,
}

impl FrameSink for RenderingSink<'_> {
    fn wants(&mut self, timestamp: i64) -> bool {
        self.sampler.should_select(timestamp)
    }

    fn accept(&mut self, frame: DecodedFrame) -> Result<(), ExtractError> {
        let base64 = self.renderer.render_base64(&frame)?;
        log::trace!(
            "Selected frame at {} µs ({}x{})",
            frame.timestamp,
            frame.width,
            frame.height
        );
        self.sampler.mark_selected(frame.timestamp);
        self.mapping.insert(FrameRecord {
            base64,
            timestamp: frame.timestamp,
            width: frame.width,
            height: frame.height,
            duration: frame.duration,
        });
        Ok(())
    }
}

/// Decode every sample in order and render one frame per interval.
///
/// Any decoder or render fault aborts the whole run; no partial mapping is
/// returned.
///
/// # Errors
///
/// [`ExtractError::InvalidInterval`] for a non-positive interval, or the
/// first error raised by the decoder or renderer.
pub fn decode_and_sample<I>(
    samples: I,
    interval: i64,
    decoder: &mut dyn VideoDecoder,
    renderer: &PngRenderer,
) -> Result<ResultMapping, ExtractError>
where
    I: IntoIterator<Item = Sample>,
{
    let mut sink = RenderingSink {
        sampler: IntervalSampler::new(interval)?,
        renderer,
        mapping: ResultMapping::new(),
    };

    let mut fed = 0usize;
    for sample in samples {
        decoder.decode(&sample, &mut sink)?;
        fed += 1;
    }
    decoder.flush(&mut sink)?;

    log::debug!(
        "Decoded {fed} samples, selected {} frames",
        sink.mapping.len()
    );
    Ok(sink.mapping)
}
