//! Input normalization.
//!
//! Arbitrary input containers and codecs are re-encoded into one canonical
//! form before demuxing: an MP4 with a single H.264 (yuv420p) video track,
//! `moov` in front, and no audio. Everything downstream only has to
//! understand that one layout.
//!
//! [`FfmpegNormalizer`] stages the bytes in a private temporary directory,
//! which is removed when the call returns, on success and on failure.

use std::fmt::Display;
use std::path::Path;

use ffmpeg_next::codec::Id;
use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::codec::encoder::Video as OpenedEncoder;
use ffmpeg_next::format::context::Output;
use ffmpeg_next::format::{Flags as FormatFlags, Pixel};
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::media::Type;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::util::error::EAGAIN;
use ffmpeg_next::{Dictionary, Error as FfmpegError, Packet, Rational};

use crate::buffer::VideoBuffer;
use crate::configuration::NormalizeOptions;
use crate::error::ExtractError;
use crate::utilities::MICROS_PER_SECOND;

/// Largest ratio a normalizer reports before it returns.
const MAX_RATIO: f64 = 0.999;

/// Re-encodes an input video into the canonical container and codec.
pub trait Normalizer: Send + Sync + 'static {
    /// Consume `input` and return the canonical re-encoding.
    ///
    /// `progress` receives non-decreasing ratios in `[0, 1)`.
    ///
    /// # Errors
    ///
    /// [`ExtractError::Transcode`] for any failure.
    fn normalize(
        &self,
        input: VideoBuffer,
        options: &NormalizeOptions,
        progress: &dyn Fn(f64),
    ) -> Result<VideoBuffer, ExtractError>;
}

/// [`Normalizer`] backed by libavformat and libx264.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegNormalizer;

impl FfmpegNormalizer {
    /// Create a normalizer.
    pub fn new() -> Self {
        Self
    }
}

fn failed<E: Display>(context: &'static str) -> impl FnOnce(E) -> ExtractError {
    move |error| ExtractError::Transcode(format!("{context}: {error}"))
}

/// Interpret a `receive_frame`/`receive_packet` result: `true` when output
/// was produced, `false` once the codec wants more input or is drained.
fn produced(result: Result<(), FfmpegError>, context: &'static str) -> Result<bool, ExtractError> {
    match result {
        Ok(()) => Ok(true),
        Err(FfmpegError::Eof) => Ok(false),
        Err(FfmpegError::Other { errno }) if errno == EAGAIN => Ok(false),
        Err(error) => Err(failed(context)(error)),
    }
}

impl Normalizer for FfmpegNormalizer {
    fn normalize(
        &self,
        input: VideoBuffer,
        options: &NormalizeOptions,
        progress: &dyn Fn(f64),
    ) -> Result<VideoBuffer, ExtractError> {
        crate::ffmpeg::engine().map_err(ExtractError::Transcode)?;
        if input.is_empty() {
            return Err(ExtractError::Transcode("input is empty".to_string()));
        }

        let workdir = tempfile::Builder::new()
            .prefix("framesnap-")
            .tempdir()
            .map_err(failed("cannot create working directory"))?;
        let input_path = workdir.path().join("input");
        let output_path = workdir.path().join("output.mp4");

        log::debug!(
            "Normalizing {} bytes in {}",
            input.len(),
            workdir.path().display()
        );
        std::fs::write(&input_path, input.into_bytes())
            .map_err(failed("cannot stage input"))?;

        transcode(&input_path, &output_path, options, progress)?;

        let bytes = std::fs::read(&output_path).map_err(failed("cannot read output"))?;
        log::debug!("Normalized output is {} bytes", bytes.len());
        Ok(VideoBuffer::new(bytes))
    }
}

/// Tracks the decode position and reports it as a fraction of the input
/// duration.
struct ProgressTracker<'a> {
    callback: &'a dyn Fn(f64),
    time_base: Rational,
    duration: f64,
    last: f64,
}

impl ProgressTracker<'_> {
    fn update(&mut self, timestamp: Option<i64>) {
        let Some(timestamp) = timestamp else {
            return;
        };
        if self.duration <= 0.0 {
            return;
        }
        let seconds = timestamp as f64 * f64::from(self.time_base.numerator())
            / f64::from(self.time_base.denominator());
        let ratio = (seconds * MICROS_PER_SECOND / self.duration).clamp(0.0, MAX_RATIO);
        if ratio > self.last {
            self.last = ratio;
            (self.callback)(ratio);
        }
    }
}

/// Encoder half of a transcode: converts decoded frames and muxes packets.
struct EncodeSession {
    output: Output,
    encoder: OpenedEncoder,
    stream_index: usize,
    encoder_time_base: Rational,
    width: u32,
    height: u32,
    scaler: Option<(ScalingContext, Pixel, u32, u32)>,
    scaled: VideoFrame,
}

impl EncodeSession {
    fn push(&mut self, frame: &VideoFrame) -> Result<(), ExtractError> {
        let (format, width, height) = (frame.format(), frame.width(), frame.height());
        let stale = !matches!(
            &self.scaler,
            Some((_, f, w, h)) if *f == format && *w == width && *h == height
        );
        if stale {
            let scaler = ScalingContext::get(
                format,
                width,
                height,
                Pixel::YUV420P,
                self.width,
                self.height,
                ScalingFlags::BILINEAR,
            )
            .map_err(failed("cannot create scaler"))?;
            self.scaler = Some((scaler, format, width, height));
        }
        if let Some((scaler, ..)) = self.scaler.as_mut() {
            scaler
                .run(frame, &mut self.scaled)
                .map_err(failed("pixel conversion failed"))?;
        }
        self.scaled.set_pts(frame.timestamp().or_else(|| frame.pts()));

        self.encoder
            .send_frame(&self.scaled)
            .map_err(failed("encoder rejected frame"))?;
        self.write_packets()
    }

    fn write_packets(&mut self) -> Result<(), ExtractError> {
        let stream_time_base = self
            .output
            .stream(self.stream_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| ExtractError::Transcode("output stream disappeared".to_string()))?;

        let mut packet = Packet::empty();
        while produced(self.encoder.receive_packet(&mut packet), "encoder failed")? {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .map_err(failed("cannot write packet"))?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<(), ExtractError> {
        self.encoder.send_eof().map_err(failed("cannot flush encoder"))?;
        self.write_packets()?;
        self.output
            .write_trailer()
            .map_err(failed("cannot write trailer"))
    }
}

fn transcode(
    input_path: &Path,
    output_path: &Path,
    options: &NormalizeOptions,
    progress: &dyn Fn(f64),
) -> Result<(), ExtractError> {
    let mut input = ffmpeg_next::format::input(input_path).map_err(failed("unsupported input"))?;

    let (stream_index, time_base, frame_rate, parameters, stream_duration) = {
        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or_else(|| ExtractError::Transcode("input has no video stream".to_string()))?;
        (
            stream.index(),
            stream.time_base(),
            stream.avg_frame_rate(),
            stream.parameters(),
            stream.duration(),
        )
    };

    // Container duration is in AV_TIME_BASE (µs); fall back to the stream.
    let duration = if input.duration() > 0 {
        input.duration() as f64
    } else if stream_duration > 0 {
        stream_duration as f64 * f64::from(time_base.numerator()) * MICROS_PER_SECOND
            / f64::from(time_base.denominator())
    } else {
        0.0
    };

    let mut decoder = CodecContext::from_parameters(parameters)
        .and_then(|context| context.decoder().video())
        .map_err(failed("cannot open input decoder"))?;

    // yuv420p needs even dimensions.
    let width = (decoder.width() & !1).max(2);
    let height = (decoder.height() & !1).max(2);

    let mut output = ffmpeg_next::format::output(output_path)
        .map_err(failed("cannot create output"))?;
    let needs_global_header = output.format().flags().contains(FormatFlags::GLOBAL_HEADER);

    let codec = ffmpeg_next::encoder::find_by_name("libx264")
        .or_else(|| ffmpeg_next::encoder::find(Id::H264))
        .ok_or_else(|| ExtractError::Transcode("no H.264 encoder available".to_string()))?;

    let mut stream = output.add_stream(codec).map_err(failed("cannot add stream"))?;
    let output_index = stream.index();

    let mut encoder = CodecContext::from_parameters(stream.parameters())
        .and_then(|context| context.encoder().video())
        .map_err(failed("cannot create encoder"))?;
    encoder.set_width(width);
    encoder.set_height(height);
    encoder.set_format(Pixel::YUV420P);
    encoder.set_time_base(time_base);
    if frame_rate.numerator() > 0 && frame_rate.denominator() > 0 {
        encoder.set_frame_rate(Some(frame_rate));
    }
    if needs_global_header {
        unsafe {
            (*encoder.as_mut_ptr()).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
        }
    }

    let mut codec_options = Dictionary::new();
    codec_options.set("preset", &options.preset);
    if let Some(crf) = options.crf {
        codec_options.set("crf", &crf.to_string());
    }
    let encoder = encoder
        .open_as_with(codec, codec_options)
        .map_err(failed("cannot open encoder"))?;
    stream.set_parameters(&encoder);
    stream.set_time_base(time_base);

    let mut muxer_options = Dictionary::new();
    if options.faststart {
        muxer_options.set("movflags", "faststart");
    }
    output
        .write_header_with(muxer_options)
        .map_err(failed("cannot write header"))?;

    log::info!(
        "Transcoding video stream {stream_index} to H.264 {width}x{height} (preset {})",
        options.preset
    );

    let mut session = EncodeSession {
        output,
        encoder,
        stream_index: output_index,
        encoder_time_base: time_base,
        width,
        height,
        scaler: None,
        scaled: VideoFrame::empty(),
    };
    let mut tracker = ProgressTracker {
        callback: progress,
        time_base,
        duration,
        last: 0.0,
    };
    let mut decoded = VideoFrame::empty();

    for (stream, packet) in input.packets() {
        if stream.index() != stream_index {
            continue;
        }
        decoder
            .send_packet(&packet)
            .map_err(failed("input decoder rejected packet"))?;
        while produced(decoder.receive_frame(&mut decoded), "input decoder failed")? {
            tracker.update(decoded.timestamp().or_else(|| decoded.pts()));
            session.push(&decoded)?;
        }
    }

    decoder.send_eof().map_err(failed("cannot flush input decoder"))?;
    while produced(decoder.receive_frame(&mut decoded), "input decoder failed")? {
        tracker.update(decoded.timestamp().or_else(|| decoded.pts()));
        session.push(&decoded)?;
    }

    session.finish()
}
