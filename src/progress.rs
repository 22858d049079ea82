//! Progress reporting for extraction requests.
//!
//! This module provides [`ProgressCallback`] for observing a request,
//! [`ProgressInfo`] for the individual snapshots, and [`ProgressState`], the
//! caller-side view of a request (a single ratio in `[0.0, 1.0]` plus an
//! idle/processing flag).
//!
//! Ratios delivered to a callback never decrease within one request. A
//! failed request resets the caller-side state to zero and idle without
//! emitting a decreasing snapshot.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framesnap::{ExtractOptions, ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("[{:?}] {:.0}%", info.stage, info.ratio * 100.0);
//!     }
//! }
//!
//! let options = ExtractOptions::new().with_progress(Arc::new(PrintProgress));
//! ```

use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// Ratio reported when a request starts.
pub(crate) const START_RATIO: f64 = 0.01;
/// Ratio reported when the normalized buffer is handed to the worker.
pub(crate) const HANDOFF_RATIO: f64 = 0.85;

/// The pipeline stage a snapshot was taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExtractionStage {
    /// The request was accepted.
    Starting,
    /// The input is being re-encoded into the canonical form.
    Normalizing,
    /// The canonical buffer is inside the worker (demux, decode, render).
    Extracting,
    /// The result mapping was received.
    Complete,
}

/// A snapshot of request progress.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Stage the request is in.
    pub stage: ExtractionStage,
    /// Overall completion in `[0.0, 1.0]`.
    pub ratio: f64,
    /// Wall-clock time elapsed since the request started.
    pub elapsed: Duration,
}

/// Trait for receiving progress updates during extraction.
///
/// Implementations must be [`Send`] and [`Sync`] because normalization
/// progress is delivered from a blocking thread.
///
/// Progress callbacks are **infallible**: they observe but cannot halt the
/// request.
pub trait ProgressCallback: Send + Sync {
    /// Called each time the overall ratio advances.
    fn on_progress(&self, info: &ProgressInfo);
}

/// A no-op implementation that discards all progress notifications.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Caller-side state of the current request.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProgressState {
    /// Overall completion in `[0.0, 1.0]`.
    pub ratio: f64,
    /// `true` while a request is in flight.
    pub processing: bool,
}

/// Map a normalizer ratio in `[0, 1)` into the caller range `[0.01, 0.85)`.
pub(crate) fn scale_normalize_ratio(ratio: f64) -> f64 {
    let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
    START_RATIO + ratio * (HANDOFF_RATIO - START_RATIO)
}

/// Owns the [`ProgressState`] of one coordinator and fans snapshots out to
/// the request's callback.
pub(crate) struct ProgressReporter {
    state: Mutex<ProgressState>,
    callback: Mutex<Arc<dyn ProgressCallback>>,
    started: Mutex<Instant>,
}

impl ProgressReporter {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ProgressState::default()),
            callback: Mutex::new(Arc::new(NoOpProgress)),
            started: Mutex::new(Instant::now()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn snapshot(&self) -> ProgressState {
        *self.state()
    }

    /// Start a request: state becomes processing at ratio zero.
    pub(crate) fn begin(&self, callback: Arc<dyn ProgressCallback>) {
        *self.callback.lock().unwrap_or_else(|p| p.into_inner()) = callback;
        *self.started.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
        *self.state() = ProgressState {
            ratio: 0.0,
            processing: true,
        };
    }

    /// Advance to `ratio`, ignoring values at or below the current one.
    pub(crate) fn advance(&self, stage: ExtractionStage, ratio: f64) {
        if ratio.is_nan() {
            return;
        }
        let ratio = ratio.clamp(0.0, 1.0);
        {
            let mut state = self.state();
            if !state.processing || ratio <= state.ratio {
                return;
            }
            state.ratio = ratio;
        }

        let info = ProgressInfo {
            stage,
            ratio,
            elapsed: self.started.lock().unwrap_or_else(|p| p.into_inner()).elapsed(),
        };
        let callback = Arc::clone(&self.callback.lock().unwrap_or_else(|p| p.into_inner()));
        callback.on_progress(&info);
    }

    /// Finish a request successfully.
    pub(crate) fn complete(&self) {
        self.advance(ExtractionStage::Complete, 1.0);
        self.state().processing = false;
    }

    /// Abort a request: back to zero and idle so it can be resubmitted.
    pub(crate) fn fail(&self) {
        *self.state() = ProgressState::default();
    }
}

/// A scoped registration of a progress listener.
///
/// While the subscription is alive, its [`ProgressEmitter`]s forward
/// ratios to the reporter. Dropping the subscription (on success, on error,
/// or on unwind) disconnects every emitter, so a late event from the engine
/// can never move the caller's progress after the stage has ended.
pub(crate) struct ProgressSubscription {
    active: Arc<AtomicBool>,
}

impl ProgressSubscription {
    pub(crate) fn subscribe(
        reporter: Arc<ProgressReporter>,
        stage: ExtractionStage,
        scale: fn(f64) -> f64,
    ) -> (Self, ProgressEmitter) {
        let active = Arc::new(AtomicBool::new(true));
        let emitter = ProgressEmitter {
            active: Arc::clone(&active),
            reporter,
            stage,
            scale,
        };
        (Self { active }, emitter)
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Sending half of a [`ProgressSubscription`].
#[derive(Clone)]
pub(crate) struct ProgressEmitter {
    active: Arc<AtomicBool>,
    reporter: Arc<ProgressReporter>,
    stage: ExtractionStage,
    scale: fn(f64) -> f64,
}

impl ProgressEmitter {
    pub(crate) fn emit(&self, ratio: f64) {
        if self.active.load(Ordering::Acquire) {
            self.reporter.advance(self.stage, (self.scale)(ratio));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recording(Mutex<Vec<f64>>);

    impl ProgressCallback for Recording {
        fn on_progress(&self, info: &ProgressInfo) {
            self.0.lock().unwrap().push(info.ratio);
        }
    }

    #[test]
    fn ratios_never_decrease() {
        let reporter = ProgressReporter::new();
        let recording = Arc::new(Recording(Mutex::new(Vec::new())));
        reporter.begin(recording.clone());

        reporter.advance(ExtractionStage::Starting, 0.01);
        reporter.advance(ExtractionStage::Normalizing, 0.4);
        reporter.advance(ExtractionStage::Normalizing, 0.2);
        reporter.advance(ExtractionStage::Extracting, 0.85);
        reporter.complete();

        let seen = recording.0.lock().unwrap().clone();
        assert_eq!(seen, vec![0.01, 0.4, 0.85, 1.0]);
        assert!(!reporter.snapshot().processing);
    }

    #[test]
    fn fail_resets_to_idle_zero() {
        let reporter = ProgressReporter::new();
        reporter.begin(Arc::new(NoOpProgress));
        reporter.advance(ExtractionStage::Normalizing, 0.5);
        reporter.fail();
        assert_eq!(reporter.snapshot(), ProgressState::default());
    }

    #[test]
    fn normalize_ratio_stays_below_handoff() {
        assert_eq!(scale_normalize_ratio(0.0), START_RATIO);
        assert!(scale_normalize_ratio(0.999) < HANDOFF_RATIO);
        assert_eq!(scale_normalize_ratio(f64::NAN), START_RATIO);
    }

    #[test]
    fn dropped_subscription_disconnects_emitter() {
        let reporter = Arc::new(ProgressReporter::new());
        reporter.begin(Arc::new(NoOpProgress));

        let (subscription, emitter) = ProgressSubscription::subscribe(
            Arc::clone(&reporter),
            ExtractionStage::Normalizing,
            scale_normalize_ratio,
        );
        emitter.emit(0.5);
        let during = reporter.snapshot().ratio;
        assert!(during > START_RATIO);

        drop(subscription);
        emitter.emit(0.9);
        assert_eq!(reporter.snapshot().ratio, during);
    }
}
