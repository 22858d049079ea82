//! Synthetic MP4 construction for integration tests.
//!
//! [`Mp4Builder`] writes structurally valid ISO-BMFF with an `avc1` video
//! track but arbitrary sample payloads, so it exercises the demuxer without
//! FFmpeg. [`h264_clip`] encodes a real, decodable clip through FFmpeg.

#![allow(dead_code)]

use ffmpeg_next::codec::Id;
use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::format::context::Output;
use ffmpeg_next::format::{Flags as FormatFlags, Pixel};
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::{Dictionary, Packet, Rational};

/// Frame rate of [`h264_clip`].
pub const CLIP_FPS: i32 = 25;

/// Encode `seconds` of H.264 video at [`CLIP_FPS`] into a faststart MP4,
/// with a keyframe every second and no B-frames.
///
/// Each frame is a flat luma level that changes from frame to frame.
pub fn h264_clip(seconds: u32, width: u32, height: u32) -> Vec<u8> {
    ffmpeg_next::init().expect("Failed to initialize FFmpeg");
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = directory.path().join("clip.mp4");

    let mut output = ffmpeg_next::format::output(&path).expect("Failed to create output");
    let needs_global_header = output.format().flags().contains(FormatFlags::GLOBAL_HEADER);
    let codec = ffmpeg_next::encoder::find_by_name("libx264")
        .or_else(|| ffmpeg_next::encoder::find(Id::H264))
        .expect("No H.264 encoder available");

    let time_base = Rational::new(1, CLIP_FPS);
    let mut stream = output.add_stream(codec).expect("Failed to add stream");
    let stream_index = stream.index();
    let mut encoder = CodecContext::from_parameters(stream.parameters())
        .and_then(|context| context.encoder().video())
        .expect("Failed to create encoder");
    encoder.set_width(width);
    encoder.set_height(height);
    encoder.set_format(Pixel::YUV420P);
    encoder.set_time_base(time_base);
    encoder.set_frame_rate(Some(Rational::new(CLIP_FPS, 1)));
    encoder.set_gop(CLIP_FPS as u32);
    encoder.set_max_b_frames(0);
    if needs_global_header {
        unsafe {
            (*encoder.as_mut_ptr()).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
        }
    }

    let mut codec_options = Dictionary::new();
    codec_options.set("preset", "ultrafast");
    let mut encoder = encoder
        .open_as_with(codec, codec_options)
        .expect("Failed to open encoder");
    stream.set_parameters(&encoder);
    stream.set_time_base(time_base);

    let mut muxer_options = Dictionary::new();
    muxer_options.set("movflags", "faststart");
    output
        .write_header_with(muxer_options)
        .expect("Failed to write header");
    let stream_time_base = output
        .stream(stream_index)
        .expect("Output stream missing")
        .time_base();

    let mut frame = VideoFrame::new(Pixel::YUV420P, width, height);
    for index in 0..(seconds as i64 * i64::from(CLIP_FPS)) {
        frame.data_mut(0).fill((16 + index * 3 % 220) as u8);
        frame.data_mut(1).fill(128);
        frame.data_mut(2).fill(128);
        frame.set_pts(Some(index));
        encoder.send_frame(&frame).expect("Failed to send frame");
        write_packets(&mut encoder, &mut output, stream_index, stream_time_base);
    }
    encoder.send_eof().expect("Failed to flush encoder");
    write_packets(&mut encoder, &mut output, stream_index, stream_time_base);
    output.write_trailer().expect("Failed to write trailer");
    drop(output);

    std::fs::read(&path).expect("Failed to read encoded clip")
}

fn write_packets(
    encoder: &mut ffmpeg_next::encoder::Video,
    output: &mut Output,
    stream_index: usize,
    stream_time_base: Rational,
) {
    let mut packet = Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(stream_index);
        packet.rescale_ts(encoder.time_base(), stream_time_base);
        packet
            .write_interleaved(output)
            .expect("Failed to write packet");
    }
}

/// Builds a single-track MP4 in memory.
#[derive(Debug, Clone)]
pub struct Mp4Builder {
    pub timescale: u32,
    pub sample_delta: u32,
    pub samples: Vec<Vec<u8>>,
    pub samples_per_chunk: u32,
    /// 1-based sync sample numbers; `None` omits `stss`.
    pub sync_samples: Option<Vec<u32>>,
    /// `(count, offset)` runs; empty omits `ctts`.
    pub composition_offsets: Vec<(u32, i32)>,
    pub handler: [u8; 4],
    pub width: u16,
    pub height: u16,
    /// Put `moov` before `mdat`.
    pub faststart: bool,
    /// Write `mdat` with a 64-bit size.
    pub large_mdat: bool,
}

impl Default for Mp4Builder {
    fn default() -> Self {
        Self {
            timescale: 1000,
            sample_delta: 1000,
            samples: Vec::new(),
            samples_per_chunk: 2,
            sync_samples: None,
            composition_offsets: Vec::new(),
            handler: *b"vide",
            width: 320,
            height: 240,
            faststart: true,
            large_mdat: false,
        }
    }
}

impl Mp4Builder {
    /// `count` samples of `size` bytes, each filled with its own index.
    pub fn with_samples(count: usize, size: usize) -> Self {
        Self {
            samples: (0..count).map(|index| vec![index as u8; size]).collect(),
            ..Self::default()
        }
    }

    pub fn duration(&self) -> u32 {
        self.sample_delta * self.samples.len() as u32
    }

    pub fn build(&self) -> Vec<u8> {
        let ftyp = ftyp();
        let mdat_header_len = if self.large_mdat { 16 } else { 8 };

        // stco has a fixed size, so the moov length does not depend on the
        // offsets written into it.
        let probe = self.moov(0);
        let payload_start = if self.faststart {
            ftyp.len() + probe.len() + mdat_header_len
        } else {
            ftyp.len() + mdat_header_len
        };
        let moov = self.moov(payload_start as u64);
        let mdat = self.mdat();

        let mut file = ftyp;
        if self.faststart {
            file.extend_from_slice(&moov);
            file.extend_from_slice(&mdat);
        } else {
            file.extend_from_slice(&mdat);
            file.extend_from_slice(&moov);
        }
        file
    }

    fn mdat(&self) -> Vec<u8> {
        let payload: Vec<u8> = self.samples.concat();
        if self.large_mdat {
            let mut out = Vec::with_capacity(payload.len() + 16);
            out.extend_from_slice(&1u32.to_be_bytes());
            out.extend_from_slice(b"mdat");
            out.extend_from_slice(&(payload.len() as u64 + 16).to_be_bytes());
            out.extend_from_slice(&payload);
            out
        } else {
            mp4_box(b"mdat", &payload)
        }
    }

    fn chunk_offsets(&self, payload_start: u64) -> Vec<u64> {
        let mut offsets = Vec::new();
        let mut offset = payload_start;
        for chunk in self.samples.chunks(self.samples_per_chunk as usize) {
            offsets.push(offset);
            offset += chunk.iter().map(|sample| sample.len() as u64).sum::<u64>();
        }
        offsets
    }

    fn moov(&self, payload_start: u64) -> Vec<u8> {
        let mut mvhd = Vec::new();
        mvhd.extend_from_slice(&[0; 8]);
        mvhd.extend_from_slice(&self.timescale.to_be_bytes());
        mvhd.extend_from_slice(&self.duration().to_be_bytes());
        mvhd.extend_from_slice(&[0; 80]);

        let trak = mp4_box(b"trak", &[self.tkhd(), self.mdia(payload_start)].concat());
        mp4_box(b"moov", &[full_box(b"mvhd", 0, &mvhd), trak].concat())
    }

    fn tkhd(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0; 8]); // creation, modification
        body.extend_from_slice(&1u32.to_be_bytes()); // track_ID
        body.extend_from_slice(&[0; 4]);
        body.extend_from_slice(&self.duration().to_be_bytes());
        body.extend_from_slice(&[0; 8 + 2 + 2 + 2 + 2 + 36]);
        body.extend_from_slice(&(u32::from(self.width) << 16).to_be_bytes());
        body.extend_from_slice(&(u32::from(self.height) << 16).to_be_bytes());
        full_box(b"tkhd", 0, &body)
    }

    fn mdia(&self, payload_start: u64) -> Vec<u8> {
        let mut mdhd = Vec::new();
        mdhd.extend_from_slice(&[0; 8]);
        mdhd.extend_from_slice(&self.timescale.to_be_bytes());
        mdhd.extend_from_slice(&self.duration().to_be_bytes());
        mdhd.extend_from_slice(&[0x55, 0xc4, 0, 0]);

        let mut hdlr = Vec::new();
        hdlr.extend_from_slice(&[0; 4]);
        hdlr.extend_from_slice(&self.handler);
        hdlr.extend_from_slice(&[0; 12]);
        hdlr.push(0);

        let stbl = mp4_box(b"stbl", &self.stbl(payload_start));
        let minf = mp4_box(b"minf", &stbl);
        mp4_box(
            b"mdia",
            &[full_box(b"mdhd", 0, &mdhd), full_box(b"hdlr", 0, &hdlr), minf].concat(),
        )
    }

    fn sample_entry(&self) -> Vec<u8> {
        if &self.handler != b"vide" {
            // Minimal audio entry: reserved + data_reference_index + 20 bytes.
            let mut body = vec![0; 6];
            body.extend_from_slice(&1u16.to_be_bytes());
            body.extend_from_slice(&[0; 20]);
            return mp4_box(b"mp4a", &body);
        }

        let mut body = vec![0; 6];
        body.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
        body.extend_from_slice(&[0; 16]);
        body.extend_from_slice(&self.width.to_be_bytes());
        body.extend_from_slice(&self.height.to_be_bytes());
        body.extend_from_slice(&0x0048_0000u32.to_be_bytes());
        body.extend_from_slice(&0x0048_0000u32.to_be_bytes());
        body.extend_from_slice(&[0; 4]);
        body.extend_from_slice(&1u16.to_be_bytes()); // frame_count
        body.extend_from_slice(&[0; 32]); // compressorname
        body.extend_from_slice(&0x0018u16.to_be_bytes());
        body.extend_from_slice(&(-1i16).to_be_bytes());
        assert_eq!(body.len(), 78);

        // configurationVersion, profile (High), compatibility, level 3.1
        let avcc = [1, 0x64, 0x00, 0x1f, 0xff, 0xe0, 0x00];
        body.extend_from_slice(&mp4_box(b"avcC", &avcc));
        mp4_box(b"avc1", &body)
    }

    fn stbl(&self, payload_start: u64) -> Vec<u8> {
        let mut stsd = 1u32.to_be_bytes().to_vec();
        stsd.extend_from_slice(&self.sample_entry());

        let mut stts = 1u32.to_be_bytes().to_vec();
        stts.extend_from_slice(&(self.samples.len() as u32).to_be_bytes());
        stts.extend_from_slice(&self.sample_delta.to_be_bytes());

        let mut stsc = 1u32.to_be_bytes().to_vec();
        stsc.extend_from_slice(&1u32.to_be_bytes());
        stsc.extend_from_slice(&self.samples_per_chunk.to_be_bytes());
        stsc.extend_from_slice(&1u32.to_be_bytes());

        let mut stsz = 0u32.to_be_bytes().to_vec();
        stsz.extend_from_slice(&(self.samples.len() as u32).to_be_bytes());
        for sample in &self.samples {
            stsz.extend_from_slice(&(sample.len() as u32).to_be_bytes());
        }

        let offsets = self.chunk_offsets(payload_start);
        let mut stco = (offsets.len() as u32).to_be_bytes().to_vec();
        for offset in offsets {
            stco.extend_from_slice(&(offset as u32).to_be_bytes());
        }

        let mut children = [
            full_box(b"stsd", 0, &stsd),
            full_box(b"stts", 0, &stts),
            full_box(b"stsc", 0, &stsc),
            full_box(b"stsz", 0, &stsz),
            full_box(b"stco", 0, &stco),
        ]
        .concat();

        if let Some(sync) = &self.sync_samples {
            let mut stss = (sync.len() as u32).to_be_bytes().to_vec();
            for number in sync {
                stss.extend_from_slice(&number.to_be_bytes());
            }
            children.extend_from_slice(&full_box(b"stss", 0, &stss));
        }

        if !self.composition_offsets.is_empty() {
            let mut ctts = (self.composition_offsets.len() as u32).to_be_bytes().to_vec();
            for (count, offset) in &self.composition_offsets {
                ctts.extend_from_slice(&count.to_be_bytes());
                ctts.extend_from_slice(&offset.to_be_bytes());
            }
            children.extend_from_slice(&full_box(b"ctts", 1, &ctts));
        }

        children
    }
}

fn ftyp() -> Vec<u8> {
    let mut body = b"isom".to_vec();
    body.extend_from_slice(&0x200u32.to_be_bytes());
    body.extend_from_slice(b"isomiso2avc1mp41");
    mp4_box(b"ftyp", &body)
}

pub fn mp4_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(&(body.len() as u32 + 8).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

pub fn full_box(kind: &[u8; 4], version: u8, body: &[u8]) -> Vec<u8> {
    let mut payload = vec![version, 0, 0, 0];
    payload.extend_from_slice(body);
    mp4_box(kind, &payload)
}
