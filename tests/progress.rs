//! Progress reporting integration tests.
//!
//! These drive a `Coordinator` with in-memory stages, so no FFmpeg work is
//! involved.

use std::sync::{Arc, Mutex};

use framesnap::{
    Coordinator, ExtractError, ExtractOptions, ExtractionStage, FramePipeline, FrameRecord,
    NormalizeOptions, Normalizer, ProgressCallback, ProgressInfo, ProgressState, ResultMapping,
    VideoBuffer,
};

struct SteppedNormalizer;

impl Normalizer for SteppedNormalizer {
    fn normalize(
        &self,
        input: VideoBuffer,
        _options: &NormalizeOptions,
        progress: &dyn Fn(f64),
    ) -> Result<VideoBuffer, ExtractError> {
        for step in 0..10 {
            progress(f64::from(step) / 10.0);
        }
        Ok(input)
    }
}

struct SingleFrame;

impl FramePipeline for SingleFrame {
    fn run(&mut self, _buffer: VideoBuffer, _interval: i64) -> Result<ResultMapping, ExtractError> {
        let mut frames = ResultMapping::new();
        frames.insert(FrameRecord {
            base64: String::new(),
            timestamp: 0,
            width: 16,
            height: 9,
            duration: 33_333,
        });
        Ok(frames)
    }
}

struct RecordingProgress {
    infos: Mutex<Vec<ProgressInfo>>,
}

impl ProgressCallback for RecordingProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.infos.lock().unwrap().push(info.clone());
    }
}

fn recorder() -> Arc<RecordingProgress> {
    Arc::new(RecordingProgress {
        infos: Mutex::new(Vec::new()),
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn stages_arrive_in_order_with_checkpoints() {
    let mut coordinator =
        Coordinator::with_stages(SteppedNormalizer, || SingleFrame).expect("Failed to start");
    let recorder = recorder();
    let options = ExtractOptions::new().with_progress(recorder.clone());

    coordinator
        .extract(VideoBuffer::new(vec![0; 16]), &options)
        .await
        .expect("Failed to extract");

    let infos = recorder.infos.lock().unwrap();
    let first = infos.first().expect("progress was reported");
    assert_eq!(first.stage, ExtractionStage::Starting);
    assert_eq!(first.ratio, 0.01);

    let normalizing: Vec<f64> = infos
        .iter()
        .filter(|info| info.stage == ExtractionStage::Normalizing)
        .map(|info| info.ratio)
        .collect();
    assert!(!normalizing.is_empty());
    assert!(normalizing.iter().all(|ratio| (0.01..0.85).contains(ratio)));

    let handoff = infos
        .iter()
        .find(|info| info.stage == ExtractionStage::Extracting)
        .expect("handoff was reported");
    assert_eq!(handoff.ratio, 0.85);

    let last = infos.last().expect("progress was reported");
    assert_eq!(last.stage, ExtractionStage::Complete);
    assert_eq!(last.ratio, 1.0);

    assert!(infos.windows(2).all(|pair| pair[0].ratio <= pair[1].ratio));
    assert!(infos.windows(2).all(|pair| pair[0].elapsed <= pair[1].elapsed));
}

#[tokio::test(flavor = "multi_thread")]
async fn skipping_normalization_jumps_to_handoff() {
    let mut coordinator =
        Coordinator::with_stages(SteppedNormalizer, || SingleFrame).expect("Failed to start");
    let recorder = recorder();
    let options = ExtractOptions::new()
        .with_normalization(false)
        .with_progress(recorder.clone());

    coordinator
        .extract(VideoBuffer::new(vec![0; 16]), &options)
        .await
        .expect("Failed to extract");

    let ratios: Vec<f64> = recorder
        .infos
        .lock()
        .unwrap()
        .iter()
        .map(|info| info.ratio)
        .collect();
    assert_eq!(ratios, vec![0.01, 0.85, 1.0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn each_request_starts_from_zero() {
    let mut coordinator =
        Coordinator::with_stages(SteppedNormalizer, || SingleFrame).expect("Failed to start");

    for _ in 0..2 {
        let recorder = recorder();
        let options = ExtractOptions::new()
            .with_normalization(false)
            .with_progress(recorder.clone());
        coordinator
            .extract(VideoBuffer::new(vec![0; 4]), &options)
            .await
            .expect("Failed to extract");
        assert_eq!(recorder.infos.lock().unwrap().len(), 3);
    }

    assert_eq!(
        coordinator.progress(),
        ProgressState {
            ratio: 1.0,
            processing: false,
        }
    );
}

#[test]
fn idle_coordinator_reports_zero() {
    let coordinator =
        Coordinator::with_stages(SteppedNormalizer, || SingleFrame).expect("Failed to start");
    assert_eq!(coordinator.progress(), ProgressState::default());
}
