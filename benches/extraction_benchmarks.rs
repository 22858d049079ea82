//! Benchmarks for demuxing, rendering and the full extraction pipeline.
//!
//! Run with: cargo bench
//!
//! The pipeline benchmarks encode their own ten second 640x360 clip first.

#[path = "../tests/common/mod.rs"]
mod common;

use common::{Mp4Builder, h264_clip};
use criterion::Criterion;
use framesnap::demux::{Mp4Demuxer, demux};
use framesnap::{
    DecodedFrame, FfmpegLogLevel, FfmpegNormalizer, FramePipeline, Mp4FramePipeline,
    NormalizeOptions, Normalizer, PngRenderer, VideoBuffer,
};

fn benchmark_demux(criterion: &mut Criterion) {
    let file = Mp4Builder {
        samples_per_chunk: 30,
        ..Mp4Builder::with_samples(3000, 2048)
    }
    .build();

    criterion.bench_function("demux 3000 samples (single append)", |bencher| {
        bencher.iter(|| demux(&file).unwrap());
    });

    criterion.bench_function("demux 3000 samples (64 KiB chunks)", |bencher| {
        bencher.iter(|| {
            let mut demuxer = Mp4Demuxer::new();
            let mut count = 0;
            for chunk in file.chunks(64 * 1024) {
                demuxer.append(chunk).unwrap();
                count += demuxer.drain_samples().count();
            }
            demuxer.flush().unwrap();
            count + demuxer.drain_samples().count()
        });
    });
}

fn benchmark_render(criterion: &mut Criterion) {
    let frame = DecodedFrame {
        timestamp: 0,
        duration: 0,
        width: 1280,
        height: 720,
        data: (0..1280 * 720 * 4).map(|index| (index % 251) as u8).collect(),
    };
    let renderer = PngRenderer::new();

    criterion.bench_function("render 720p frame to base64 PNG", |bencher| {
        bencher.iter(|| renderer.render_base64(&frame).unwrap());
    });
}

fn benchmark_pipeline(criterion: &mut Criterion) {
    framesnap::set_ffmpeg_log_level(FfmpegLogLevel::Error);
    let original = h264_clip(10, 640, 360);

    let mut group = criterion.benchmark_group("pipeline");
    group.sample_size(10);

    group.bench_function("normalize", |bencher| {
        bencher.iter(|| {
            FfmpegNormalizer::new()
                .normalize(
                    VideoBuffer::new(original.clone()),
                    &NormalizeOptions::default(),
                    &|_| {},
                )
                .unwrap()
        });
    });

    let canonical = FfmpegNormalizer::new()
        .normalize(
            VideoBuffer::new(original.clone()),
            &NormalizeOptions::default(),
            &|_| {},
        )
        .unwrap()
        .into_bytes();

    group.bench_function("demux, decode and render every 2s", |bencher| {
        bencher.iter(|| {
            Mp4FramePipeline::new()
                .run(VideoBuffer::new(canonical.clone()), 2_000_000)
                .unwrap()
        });
    });

    group.finish();
}

criterion::criterion_group!(benches, benchmark_demux, benchmark_render, benchmark_pipeline);
criterion::criterion_main!(benches);
