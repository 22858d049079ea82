//! Sample decoding.
//!
//! [`VideoDecoder`] turns demuxed [`Sample`]s into [`DecodedFrame`]s and
//! hands each one to a [`FrameSink`]. The sink is asked first whether it
//! wants a frame at a given timestamp, so frames nobody keeps are never
//! converted to RGBA.
//!
//! [`FfmpegDecoder`] is the production implementation. It is configured
//! from the track's decoder configuration record directly, without a
//! format context, and works entirely in microseconds.

use std::collections::HashMap;

use ffmpeg_next::codec::Id;
use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::codec::decoder::Video as VideoDecoderContext;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::packet::Flags as PacketFlags;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::util::error::EAGAIN;
use ffmpeg_next::{Error as FfmpegError, Packet, Rational};

use crate::demux::{FourCc, Sample, Track, fourcc_str};
use crate::error::ExtractError;
use crate::utilities::{MICROS_PER_SECOND, frame_to_buffer};

/// One decoded picture as tightly packed RGBA.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Presentation timestamp in microseconds.
    pub timestamp: i64,
    /// Display duration in microseconds, zero when unknown.
    pub duration: i64,
    /// Display width in pixels.
    pub width: u32,
    /// Display height in pixels.
    pub height: u32,
    /// `width * height * 4` bytes, row-major, no padding.
    pub data: Vec<u8>,
}

impl std::fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("timestamp", &self.timestamp)
            .field("duration", &self.duration)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// Receives frames from a [`VideoDecoder`] in output order.
pub trait FrameSink {
    /// Whether the frame presented at `timestamp` (µs) should be converted
    /// and passed to [`accept`](FrameSink::accept).
    fn wants(&mut self, timestamp: i64) -> bool;

    /// Take ownership of a wanted frame. An error aborts decoding.
    fn accept(&mut self, frame: DecodedFrame) -> Result<(), ExtractError>;
}

/// A decoder for the samples of one track.
pub trait VideoDecoder {
    /// Feed one sample and deliver every frame that becomes available.
    ///
    /// # Errors
    ///
    /// [`ExtractError::Decode`] if the codec rejects the sample, or any
    /// error returned by the sink.
    fn decode(&mut self, sample: &Sample, sink: &mut dyn FrameSink) -> Result<(), ExtractError>;

    /// Signal end of stream and deliver every frame still buffered.
    ///
    /// # Errors
    ///
    /// Same as [`decode`](VideoDecoder::decode).
    fn flush(&mut self, sink: &mut dyn FrameSink) -> Result<(), ExtractError>;
}

/// Zeroed bytes libavcodec expects after extradata
/// (`AV_INPUT_BUFFER_PADDING_SIZE`).
const EXTRADATA_PADDING: usize = 64;

/// Map a sample entry format to an FFmpeg codec.
fn codec_id(format: &FourCc) -> Option<Id> {
    match format {
        b"avc1" | b"avc3" => Some(Id::H264),
        b"hvc1" | b"hev1" => Some(Id::HEVC),
        b"vp09" => Some(Id::VP9),
        b"av01" => Some(Id::AV1),
        b"mp4v" => Some(Id::MPEG4),
        _ => None,
    }
}

/// Hardware-agnostic software decoder backed by libavcodec.
pub struct FfmpegDecoder {
    decoder: VideoDecoderContext,
    timescale: u32,
    /// Packet durations keyed by presentation timestamp, so frames can be
    /// matched back to their sample after reordering.
    durations: HashMap<i64, i64>,
    scaler: Option<(ScalingContext, Pixel, u32, u32)>,
    decoded: VideoFrame,
    rgba: VideoFrame,
}

impl FfmpegDecoder {
    /// Configure a decoder for `track`.
    ///
    /// # Errors
    ///
    /// [`ExtractError::Decode`] if the engine cannot be initialised, the
    /// codec is not supported, or the codec rejects the configuration.
    pub fn new(track: &Track) -> Result<Self, ExtractError> {
        crate::ffmpeg::engine().map_err(ExtractError::Decode)?;

        let id = codec_id(&track.format).ok_or_else(|| {
            ExtractError::Decode(format!("unsupported codec '{}'", track.codec))
        })?;
        let codec = ffmpeg_next::decoder::find(id).ok_or_else(|| {
            ExtractError::Decode(format!(
                "no decoder for '{}' in this FFmpeg build",
                fourcc_str(&track.format)
            ))
        })?;

        let mut context = CodecContext::new_with_codec(codec);

        // ffmpeg-next has no safe setter for extradata, so write it through
        // the raw context like the encoder flags are.
        unsafe {
            let raw = context.as_mut_ptr();
            (*raw).width = track.width as i32;
            (*raw).height = track.height as i32;

            if let Some(config) = &track.config {
                let padded = config.data.len() + EXTRADATA_PADDING;
                let extradata = ffmpeg_sys_next::av_mallocz(padded) as *mut u8;
                if extradata.is_null() {
                    return Err(ExtractError::Decode(
                        "cannot allocate decoder configuration".to_string(),
                    ));
                }
                std::ptr::copy_nonoverlapping(config.data.as_ptr(), extradata, config.data.len());
                // Owned by the codec context from here on; freed with it.
                (*raw).extradata = extradata;
                (*raw).extradata_size = config.data.len() as i32;
            }
        }

        let mut decoder = context.decoder();
        decoder.set_packet_time_base(Rational::new(1, MICROS_PER_SECOND as i32));
        let decoder = decoder.video().map_err(|error| {
            ExtractError::Decode(format!(
                "decoder rejected configuration for '{}': {error}",
                track.codec
            ))
        })?;

        log::debug!(
            "Configured {} decoder for track {} ({}x{})",
            track.codec,
            track.id,
            track.width,
            track.height
        );

        Ok(Self {
            decoder,
            timescale: track.timescale,
            durations: HashMap::new(),
            scaler: None,
            decoded: VideoFrame::empty(),
            rgba: VideoFrame::empty(),
        })
    }

    fn micros(&self, ticks: i64) -> i64 {
        crate::utilities::ticks_to_micros(ticks, self.timescale)
    }

    fn receive_frames(&mut self, sink: &mut dyn FrameSink) -> Result<(), ExtractError> {
        loop {
            match self.decoder.receive_frame(&mut self.decoded) {
                Ok(()) => self.deliver(sink)?,
                Err(FfmpegError::Eof) => return Ok(()),
                Err(FfmpegError::Other { errno }) if errno == EAGAIN => return Ok(()),
                Err(error) => {
                    return Err(ExtractError::Decode(format!("decoder fault: {error}")));
                }
            }
        }
    }

    fn deliver(&mut self, sink: &mut dyn FrameSink) -> Result<(), ExtractError> {
        let timestamp = self
            .decoded
            .timestamp()
            .or_else(|| self.decoded.pts())
            .unwrap_or(0);
        let duration = self.durations.remove(&timestamp).unwrap_or(0);

        if !sink.wants(timestamp) {
            return Ok(());
        }

        let format = self.decoded.format();
        let width = self.decoded.width();
        let height = self.decoded.height();

        let stale = !matches!(
            &self.scaler,
            Some((_, f, w, h)) if *f == format && *w == width && *h == height
        );
        if stale {
            let scaler = ScalingContext::get(
                format,
                width,
                height,
                Pixel::RGBA,
                width,
                height,
                ScalingFlags::BILINEAR,
            )
            .map_err(|error| ExtractError::Decode(format!("cannot create scaler: {error}")))?;
            self.scaler = Some((scaler, format, width, height));
        }

        if let Some((scaler, ..)) = self.scaler.as_mut() {
            scaler
                .run(&self.decoded, &mut self.rgba)
                .map_err(|error| ExtractError::Decode(format!("pixel conversion failed: {error}")))?;
        }

        sink.accept(DecodedFrame {
            timestamp,
            duration,
            width,
            height,
            data: frame_to_buffer(&self.rgba, width, height, 4),
        })
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn decode(&mut self, sample: &Sample, sink: &mut dyn FrameSink) -> Result<(), ExtractError> {
        let pts = self.micros(sample.pts());
        let dts = self.micros(sample.dts);
        let duration = self.micros(i64::from(sample.duration));

        let mut packet = Packet::copy(&sample.data);
        packet.set_pts(Some(pts));
        packet.set_dts(Some(dts));
        packet.set_duration(duration);
        if sample.is_sync {
            packet.set_flags(PacketFlags::KEY);
        }
        self.durations.insert(pts, duration);

        self.decoder.send_packet(&packet).map_err(|error| {
            ExtractError::Decode(format!("sample at {dts} µs rejected: {error}"))
        })?;
        self.receive_frames(sink)
    }

    fn flush(&mut self, sink: &mut dyn FrameSink) -> Result<(), ExtractError> {
        match self.decoder.send_eof() {
            Ok(()) | Err(FfmpegError::Eof) => {}
            Err(error) => {
                return Err(ExtractError::Decode(format!("cannot flush decoder: {error}")));
            }
        }
        self.receive_frames(sink)?;
        self.durations.clear();
        Ok(())
    }
}
