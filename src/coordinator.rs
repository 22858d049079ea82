//! Caller-facing extraction entry point.
//!
//! A [`Coordinator`] owns one [`ExtractionWorker`] for as long as it is
//! active. Each call to [`extract`](Coordinator::extract) normalizes the
//! input on a blocking thread, moves the canonical buffer into the worker,
//! and waits for the serialized reply.
//!
//! Progress is reported in three bands: `0.01` when the request starts,
//! `[0.01, 0.85)` while normalizing, `0.85` at handoff, and `1.0` on
//! success. Any failure resets the state to zero and idle.
//!
//! `extract` borrows the coordinator mutably, so a second request cannot be
//! started while one is in flight.
//!
//! # Example
//!
//! ```no_run
//! use framesnap::{Coordinator, ExtractOptions, VideoBuffer};
//!
//! # async fn example() -> Result<(), framesnap::ExtractError> {
//! let mut coordinator = Coordinator::new()?;
//! let frames = coordinator
//!     .extract(VideoBuffer::from_path("clip.mov")?, &ExtractOptions::new())
//!     .await?;
//! for frame in &frames {
//!     println!("{} µs: {}x{}", frame.timestamp, frame.width, frame.height);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};

use crate::buffer::{TransferSlot, VideoBuffer};
use crate::configuration::ExtractOptions;
use crate::error::ExtractError;
use crate::normalize::{FfmpegNormalizer, Normalizer};
use crate::progress::{
    ExtractionStage, HANDOFF_RATIO, ProgressReporter, ProgressState, ProgressSubscription,
    START_RATIO, scale_normalize_ratio,
};
use crate::record::ResultMapping;
use crate::worker::{ExtractionWorker, FramePipeline, Mp4FramePipeline, WorkerReply};

type PipelineFactory = dyn Fn() -> Box<dyn FramePipeline> + Send + Sync;
type WorkerSlot = Arc<Mutex<Option<Arc<ExtractionWorker>>>>;

/// Runs extraction requests against one isolated worker.
pub struct Coordinator {
    normalizer: Arc<dyn Normalizer>,
    pipeline: Arc<PipelineFactory>,
    worker: WorkerSlot,
    progress: Arc<ProgressReporter>,
}

impl Coordinator {
    /// Create an active coordinator with the FFmpeg normalizer and the MP4
    /// pipeline.
    ///
    /// # Errors
    ///
    /// [`ExtractError::TransportFault`] if the worker cannot be started.
    pub fn new() -> Result<Self, ExtractError> {
        Self::with_stages(FfmpegNormalizer::new(), Mp4FramePipeline::new)
    }

    /// Create an active coordinator with custom stages.
    ///
    /// `pipeline` is called each time a worker is started.
    ///
    /// # Errors
    ///
    /// [`ExtractError::TransportFault`] if the worker cannot be started.
    pub fn with_stages<N, P, F>(normalizer: N, pipeline: F) -> Result<Self, ExtractError>
    where
        N: Normalizer,
        P: FramePipeline,
        F: Fn() -> P + Send + Sync + 'static,
    {
        let coordinator = Self {
            normalizer: Arc::new(normalizer),
            pipeline: Arc::new(move || Box::new(pipeline()) as Box<dyn FramePipeline>),
            worker: Arc::new(Mutex::new(None)),
            progress: Arc::new(ProgressReporter::new()),
        };
        coordinator.activate()?;
        Ok(coordinator)
    }

    /// Start the worker if none is running.
    ///
    /// # Errors
    ///
    /// [`ExtractError::TransportFault`] if the worker cannot be started.
    pub fn activate(&self) -> Result<(), ExtractError> {
        let mut slot = self.worker.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(Arc::new(ExtractionWorker::spawn((self.pipeline)())?));
        }
        Ok(())
    }

    /// Terminate the worker. A request in flight is abandoned: its future
    /// never resolves.
    pub fn deactivate(&self) {
        self.handle().deactivate();
    }

    /// `true` while a worker is available.
    pub fn is_active(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    /// A handle that can deactivate this coordinator from elsewhere, for
    /// example while [`extract`](Self::extract) is being awaited.
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            worker: Arc::clone(&self.worker),
        }
    }

    /// Current progress of the request in flight, or of the last one.
    pub fn progress(&self) -> ProgressState {
        self.progress.snapshot()
    }

    /// Extract one frame per interval from `input`.
    ///
    /// Must be awaited inside a Tokio runtime; normalization runs on its
    /// blocking pool.
    ///
    /// # Errors
    ///
    /// - [`ExtractError::InvalidInterval`] for a zero interval.
    /// - [`ExtractError::Transcode`] if normalization fails.
    /// - [`ExtractError::Demux`], [`ExtractError::Decode`] or
    ///   [`ExtractError::Render`] as reported by the worker.
    /// - [`ExtractError::EmptyResult`] if no frame was selected.
    /// - [`ExtractError::TransportFault`] if the coordinator is inactive or
    ///   the worker crashed. A crashed worker is replaced before returning,
    ///   so the request can be resubmitted.
    pub async fn extract(
        &mut self,
        input: VideoBuffer,
        options: &ExtractOptions,
    ) -> Result<ResultMapping, ExtractError> {
        let interval = options.interval_micros()?;
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| ExtractError::TransportFault("coordinator is not active".to_string()))?;

        log::info!(
            "Extracting frames from {} bytes every {interval} µs",
            input.len()
        );
        self.progress.begin(Arc::clone(&options.progress));
        self.progress.advance(ExtractionStage::Starting, START_RATIO);

        match self.run(input, options, interval, &worker).await {
            Ok(frames) => {
                log::info!("Extracted {} frames", frames.len());
                self.progress.complete();
                Ok(frames)
            }
            Err(error) => {
                log::warn!("Extraction failed: {error}");
                self.progress.fail();
                if matches!(error, ExtractError::TransportFault(_)) {
                    self.replace_worker(&worker);
                }
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        input: VideoBuffer,
        options: &ExtractOptions,
        interval: i64,
        worker: &ExtractionWorker,
    ) -> Result<ResultMapping, ExtractError> {
        let canonical = if options.normalize {
            self.normalize(input, options).await
        } else {
            Ok(input)
        };
        if worker.is_terminated() {
            return abandon().await;
        }
        let canonical = canonical?;

        self.progress
            .advance(ExtractionStage::Extracting, HANDOFF_RATIO);
        let mut slot = TransferSlot::new(canonical);
        let reply = match worker.submit(&mut slot, interval) {
            Ok(reply) => reply,
            Err(_) if worker.is_terminated() => return abandon().await,
            Err(error) => return Err(error),
        };

        let outcome = reply.await;
        if worker.is_terminated() {
            return abandon().await;
        }
        let json = outcome.map_err(|_| {
            ExtractError::TransportFault("the extraction worker stopped unexpectedly".to_string())
        })?;

        let frames = WorkerReply::from_json(&json)?.into_result()?;
        if frames.is_empty() {
            return Err(ExtractError::EmptyResult);
        }
        Ok(frames)
    }

    async fn normalize(
        &self,
        input: VideoBuffer,
        options: &ExtractOptions,
    ) -> Result<VideoBuffer, ExtractError> {
        let (_subscription, emitter) = ProgressSubscription::subscribe(
            Arc::clone(&self.progress),
            ExtractionStage::Normalizing,
            scale_normalize_ratio,
        );
        let normalizer = Arc::clone(&self.normalizer);
        let normalize_options = options.normalize_options.clone();

        tokio::task::spawn_blocking(move || {
            normalizer.normalize(input, &normalize_options, &|ratio| emitter.emit(ratio))
        })
        .await
        .map_err(|error| ExtractError::Transcode(format!("normalizer stopped: {error}")))?
    }

    fn replace_worker(&self, crashed: &Arc<ExtractionWorker>) {
        let mut slot = self.worker.lock().unwrap_or_else(|p| p.into_inner());
        let current = slot.as_ref().is_some_and(|w| Arc::ptr_eq(w, crashed));
        if !current {
            return;
        }
        crashed.terminate();
        match ExtractionWorker::spawn((self.pipeline)()) {
            Ok(worker) => {
                log::debug!("Replaced crashed extraction worker");
                *slot = Some(Arc::new(worker));
            }
            Err(error) => {
                log::error!("Cannot restart extraction worker: {error}");
                *slot = None;
            }
        }
    }
}

/// Park a request whose worker was terminated while it was in flight.
async fn abandon<T>() -> T {
    log::debug!("Worker terminated with a request in flight; abandoning it");
    std::future::pending().await
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.deactivate();
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("active", &self.is_active())
            .field("progress", &self.progress())
            .finish_non_exhaustive()
    }
}

/// Deactivates a [`Coordinator`] without borrowing it.
#[derive(Clone)]
pub struct CoordinatorHandle {
    worker: WorkerSlot,
}

impl CoordinatorHandle {
    /// Terminate the coordinator's worker. See [`Coordinator::deactivate`].
    pub fn deactivate(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(worker) = worker {
            worker.terminate();
        }
    }
}
