//! The isolated extraction context.
//!
//! An [`ExtractionWorker`] owns one dedicated thread that runs a
//! [`FramePipeline`] (demux, decode and sample, render) for one request at a
//! time. The only way in is a [`WorkerRequest`] that takes ownership of the
//! canonical buffer; the only way out is a [`WorkerReply`] serialized to a
//! JSON string. Nothing else is shared with the caller.
//!
//! A pipeline panic kills the thread. The pending reply channel is dropped
//! with it, which the caller observes as [`ExtractError::TransportFault`].

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::buffer::{TransferSlot, VideoBuffer};
use crate::decode::FfmpegDecoder;
use crate::demux::demux;
use crate::error::{DemuxErrorKind, ExtractError};
use crate::record::ResultMapping;
use crate::render::PngRenderer;
use crate::sampler::decode_and_sample;

/// Message used when the worker dies without replying.
const GENERIC_FAULT: &str = "the extraction worker stopped unexpectedly";

/// The work done inside the isolated context for one request.
pub trait FramePipeline: Send + 'static {
    /// Turn a canonical buffer into the selected frames.
    ///
    /// # Errors
    ///
    /// Any stage error; the request fails as a whole.
    fn run(&mut self, buffer: VideoBuffer, interval: i64) -> Result<ResultMapping, ExtractError>;
}

/// The production pipeline: MP4 demux, FFmpeg decode, PNG render.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp4FramePipeline {
    renderer: PngRenderer,
}

impl Mp4FramePipeline {
    /// Create a pipeline with the default renderer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific renderer.
    pub fn with_renderer(renderer: PngRenderer) -> Self {
        Self { renderer }
    }
}

impl FramePipeline for Mp4FramePipeline {
    fn run(&mut self, buffer: VideoBuffer, interval: i64) -> Result<ResultMapping, ExtractError> {
        let (track, samples) = demux(buffer.as_bytes())?;
        drop(buffer);

        let mut decoder = FfmpegDecoder::new(&track)?;
        decode_and_sample(samples, interval, &mut decoder, &self.renderer)
    }
}

/// A request posted into the worker. Owns the buffer it carries.
pub struct WorkerRequest {
    /// Canonical video, moved out of the caller.
    pub buffer: VideoBuffer,
    /// Sampling interval in microseconds.
    pub interval: i64,
    /// Where the serialized [`WorkerReply`] goes.
    pub reply: oneshot::Sender<String>,
}

/// Structured cause attached to an error reply so the caller can rebuild
/// the matching [`ExtractError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "detail", rename_all = "snake_case")]
pub enum FailureCause {
    /// See [`ExtractError::Demux`].
    Demux(DemuxErrorKind),
    /// See [`ExtractError::Decode`].
    Decode(String),
    /// See [`ExtractError::Render`].
    Render(String),
    /// See [`ExtractError::InvalidInterval`].
    InvalidInterval,
}

/// A reply from the worker, tagged by `kind` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkerReply {
    /// Every stage succeeded. `frames` may still be empty.
    Success {
        /// Selected frames keyed by timestamp.
        frames: ResultMapping,
    },
    /// A stage failed.
    Error {
        /// Human-readable cause.
        message: String,
        /// Stage that failed, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<FailureCause>,
    },
}

impl WorkerReply {
    /// Build the error reply for a failed request.
    pub fn failure(error: &ExtractError) -> Self {
        let cause = match error {
            ExtractError::Demux(kind) => Some(FailureCause::Demux(kind.clone())),
            ExtractError::Decode(detail) => Some(FailureCause::Decode(detail.clone())),
            ExtractError::Render(detail) => Some(FailureCause::Render(detail.clone())),
            ExtractError::InvalidInterval => Some(FailureCause::InvalidInterval),
            _ => None,
        };
        WorkerReply::Error {
            message: error.to_string(),
            cause,
        }
    }

    /// Decode a reply received from the worker.
    ///
    /// # Errors
    ///
    /// [`ExtractError::TransportFault`] if `json` is not a valid reply.
    pub fn from_json(json: &str) -> Result<Self, ExtractError> {
        serde_json::from_str(json)
            .map_err(|error| ExtractError::TransportFault(format!("unreadable reply: {error}")))
    }

    /// Convert into the caller-facing result.
    ///
    /// An error reply without a known cause becomes
    /// [`ExtractError::TransportFault`] carrying the worker's message.
    pub fn into_result(self) -> Result<ResultMapping, ExtractError> {
        match self {
            WorkerReply::Success { frames } => Ok(frames),
            WorkerReply::Error { message, cause } => Err(match cause {
                Some(FailureCause::Demux(kind)) => ExtractError::Demux(kind),
                Some(FailureCause::Decode(detail)) => ExtractError::Decode(detail),
                Some(FailureCause::Render(detail)) => ExtractError::Render(detail),
                Some(FailureCause::InvalidInterval) => ExtractError::InvalidInterval,
                None => ExtractError::TransportFault(message),
            }),
        }
    }
}

/// Handle to the dedicated extraction thread.
pub struct ExtractionWorker {
    requests: Mutex<Option<mpsc::Sender<WorkerRequest>>>,
    terminated: AtomicBool,
}

impl ExtractionWorker {
    /// Start the worker thread.
    ///
    /// # Errors
    ///
    /// [`ExtractError::TransportFault`] if the thread cannot be spawned.
    pub fn spawn(pipeline: Box<dyn FramePipeline>) -> Result<Self, ExtractError> {
        let (sender, receiver) = mpsc::channel::<WorkerRequest>();
        std::thread::Builder::new()
            .name("framesnap-worker".to_string())
            .spawn(move || serve(pipeline, receiver))
            .map_err(|error| {
                ExtractError::TransportFault(format!("cannot start worker thread: {error}"))
            })?;
        log::debug!("Extraction worker started");

        Ok(Self {
            requests: Mutex::new(Some(sender)),
            terminated: AtomicBool::new(false),
        })
    }

    /// Post a request, moving the buffer out of `slot`.
    ///
    /// The returned receiver resolves with the serialized [`WorkerReply`].
    /// It fails if the worker dies before replying.
    ///
    /// # Errors
    ///
    /// [`ExtractError::TransportFault`] if the worker has been terminated or
    /// has crashed, or if `slot` was already emptied.
    pub fn submit(
        &self,
        slot: &mut TransferSlot,
        interval: i64,
    ) -> Result<oneshot::Receiver<String>, ExtractError> {
        let requests = self
            .requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let sender = requests
            .as_ref()
            .ok_or_else(|| ExtractError::TransportFault("worker has been terminated".to_string()))?;
        let buffer = slot.take().ok_or_else(|| {
            ExtractError::TransportFault("buffer was already transferred".to_string())
        })?;

        let (reply, receiver) = oneshot::channel();
        sender
            .send(WorkerRequest {
                buffer,
                interval,
                reply,
            })
            .map_err(|_| ExtractError::TransportFault(GENERIC_FAULT.to_string()))?;
        Ok(receiver)
    }

    /// Stop accepting requests. The thread exits once its current request,
    /// if any, finishes; that request's reply is never delivered to anyone
    /// waiting on it through [`Coordinator`](crate::Coordinator).
    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            log::debug!("Terminating extraction worker");
        }
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    /// `true` once [`terminate`](Self::terminate) has been called.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

impl Drop for ExtractionWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn serve(mut pipeline: Box<dyn FramePipeline>, requests: mpsc::Receiver<WorkerRequest>) {
    while let Ok(request) = requests.recv() {
        log::debug!(
            "Worker received {} bytes (interval {} µs)",
            request.buffer.len(),
            request.interval
        );
        let reply = match pipeline.run(request.buffer, request.interval) {
            Ok(frames) => WorkerReply::Success { frames },
            Err(error) => {
                log::warn!("Extraction failed in worker: {error}");
                WorkerReply::failure(&error)
            }
        };

        match serde_json::to_string(&reply) {
            Ok(json) => {
                if request.reply.send(json).is_err() {
                    log::debug!("Reply dropped; the request was abandoned");
                }
            }
            Err(error) => log::error!("Cannot serialize worker reply: {error}"),
        }
    }
    log::debug!("Extraction worker exiting");
}
