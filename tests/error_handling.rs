//! Error handling integration tests.
//!
//! These tests verify that each stage fails with its own error category
//! and that a failed request leaves the coordinator ready for another.

mod common;

use common::Mp4Builder;
use framesnap::{
    Coordinator, DemuxErrorKind, ExtractError, ExtractOptions, FfmpegNormalizer, FramePipeline,
    Mp4FramePipeline, Normalizer, NormalizeOptions, ProgressState, VideoBuffer,
};

#[test]
fn zero_byte_input_has_no_video_track() {
    let result = Mp4FramePipeline::new().run(VideoBuffer::new(Vec::new()), 2_000_000);
    let error = result.expect_err("zero bytes cannot be demuxed");

    assert!(matches!(
        error,
        ExtractError::Demux(DemuxErrorKind::NoVideoTrack)
    ));
    assert!(
        error.to_string().contains("no video track found"),
        "unexpected message: {error}"
    );
}

#[test]
fn non_video_input_has_no_video_track() {
    let result = Mp4FramePipeline::new().run(
        VideoBuffer::new(b"this is not a media file".to_vec()),
        2_000_000,
    );
    assert!(matches!(
        result,
        Err(ExtractError::Demux(DemuxErrorKind::NoVideoTrack))
    ));
}

#[test]
fn corrupt_samples_fail_decoding() {
    // Structurally valid MP4 whose payloads are not H.264.
    let file = Mp4Builder::with_samples(4, 64).build();
    let result = Mp4FramePipeline::new().run(VideoBuffer::new(file), 2_000_000);

    match result {
        Err(ExtractError::Decode(_)) => {}
        // Some decoders silently drop garbage and produce nothing.
        Ok(frames) => assert!(frames.is_empty()),
        Err(other) => panic!("Expected a decode failure, got: {other}"),
    }
}

#[test]
fn unreadable_input_fails_normalization() {
    let temporary_directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = temporary_directory.path().join("invalid.mov");
    std::fs::write(&path, b"this is not a media file").expect("Failed to write invalid file");

    let buffer = VideoBuffer::from_path(&path).expect("Failed to read invalid file");
    let result = FfmpegNormalizer::new().normalize(buffer, &NormalizeOptions::default(), &|_| {});
    let error = result.expect_err("garbage cannot be transcoded");
    assert!(
        error.to_string().starts_with("Failed to transcode video"),
        "unexpected message: {error}"
    );
}

#[test]
fn missing_file_is_io_error() {
    let result = VideoBuffer::from_path("this_file_does_not_exist.mp4");
    assert!(matches!(result, Err(ExtractError::Io(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_request_resets_progress_and_allows_resubmission() {
    let mut coordinator = Coordinator::new().expect("Failed to start coordinator");
    let options = ExtractOptions::new().with_normalization(false);

    for _ in 0..2 {
        let result = coordinator
            .extract(VideoBuffer::new(Vec::new()), &options)
            .await;
        assert!(matches!(
            result,
            Err(ExtractError::Demux(DemuxErrorKind::NoVideoTrack))
        ));
        assert_eq!(coordinator.progress(), ProgressState::default());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_byte_input_fails_normalization_through_coordinator() {
    let mut coordinator = Coordinator::new().expect("Failed to start coordinator");
    let result = coordinator
        .extract(VideoBuffer::new(Vec::new()), &ExtractOptions::new())
        .await;
    assert!(matches!(result, Err(ExtractError::Transcode(_))));
    assert!(!coordinator.progress().processing);
}
