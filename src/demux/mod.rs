//! Incremental MP4 demultiplexing.
//!
//! [`Mp4Demuxer`] parses an ISO-BMFF byte stream delivered in one or more
//! chunks and yields the encoded [`Sample`]s of its first video track in
//! decode order. Samples become available as soon as the `moov` box and
//! their own payload bytes have arrived, so a faststart file streams out
//! samples while the rest of `mdat` is still being appended. Bytes that
//! precede every payload still needed are released after each append.
//!
//! For a buffer that is already fully in memory, [`demux`] does the
//! append-and-flush dance in one call.
//!
//! # Example
//!
//! ```no_run
//! use framesnap::demux::Mp4Demuxer;
//!
//! # fn example(chunks: Vec<Vec<u8>>) -> Result<(), framesnap::ExtractError> {
//! let mut demuxer = Mp4Demuxer::new();
//! for chunk in &chunks {
//!     demuxer.append(chunk)?;
//!     while let Some(sample) = demuxer.next_sample() {
//!         println!("dts={} key={}", sample.dts, sample.is_sync);
//!     }
//! }
//! demuxer.flush()?;
//! # Ok(())
//! # }
//! ```

mod boxes;
mod moov;
mod sample_table;

use std::collections::VecDeque;

pub use boxes::{FourCc, fourcc_str};

use crate::error::{DemuxErrorKind, ExtractError};
use crate::utilities::ticks_to_micros;
use boxes::BoxHeader;
use moov::{TrackBox, parse_moov};
use sample_table::SampleLocation;

/// Decoder configuration record carried by a sample entry
/// (`avcC`, `hvcC`, `vpcC` or `av1C`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfig {
    /// Configuration box type.
    pub kind: FourCc,
    /// Box body, exactly as stored in the file.
    pub data: Vec<u8>,
}

/// The selected video track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// `track_ID` from the track header.
    pub id: u32,
    /// Ticks per second for every timestamp and duration of this track.
    pub timescale: u32,
    /// Codec descriptor, e.g. `avc1.64001f`.
    pub codec: String,
    /// Sample entry four-character code, e.g. `avc1`.
    pub format: FourCc,
    /// Coded width from the sample entry.
    pub width: u32,
    /// Coded height from the sample entry.
    pub height: u32,
    /// Media duration in ticks.
    pub duration: u64,
    /// Total number of samples in the track.
    pub sample_count: usize,
    /// Decoder configuration record, if the entry carries one.
    pub config: Option<CodecConfig>,
}

impl Track {
    /// Convert a value in this track's timescale to microseconds.
    pub fn to_micros(&self, ticks: i64) -> i64 {
        ticks_to_micros(ticks, self.timescale)
    }

    /// Media duration in microseconds.
    pub fn duration_micros(&self) -> i64 {
        self.to_micros(i64::try_from(self.duration).unwrap_or(i64::MAX))
    }

    fn from_box(track: &TrackBox) -> Option<Self> {
        let entry = track.entry.as_ref()?;
        let config = entry.config.as_ref().map(|(kind, data)| CodecConfig {
            kind: *kind,
            data: data.clone(),
        });
        Some(Self {
            id: track.id,
            timescale: track.timescale,
            codec: codec_string(&entry.format, config.as_ref()),
            format: entry.format,
            width: u32::from(entry.width),
            height: u32::from(entry.height),
            duration: track.duration,
            sample_count: track.table.sample_count(),
            config,
        })
    }
}

/// Build a WebCodecs-style codec descriptor.
///
/// AVC entries become `avc1.PPCCLL` from the profile, constraint and level
/// bytes of `avcC`; everything else falls back to the entry's fourcc.
fn codec_string(format: &FourCc, config: Option<&CodecConfig>) -> String {
    let name = fourcc_str(format);
    match (format, config) {
        (b"avc1" | b"avc3", Some(config)) if &config.kind == b"avcC" && config.data.len() >= 4 => {
            format!(
                "{name}.{:02x}{:02x}{:02x}",
                config.data[1], config.data[2], config.data[3]
            )
        }
        _ => name,
    }
}

/// One encoded access unit of the selected track.
#[derive(Clone, PartialEq, Eq)]
pub struct Sample {
    /// Owning track.
    pub track_id: u32,
    /// Decode timestamp in track ticks.
    pub dts: i64,
    /// Duration in track ticks.
    pub duration: u32,
    /// Presentation minus decode time in track ticks. Zero for streams
    /// whose decode order is their presentation order.
    pub composition_offset: i32,
    /// `true` if the sample decodes without reference to earlier samples.
    pub is_sync: bool,
    /// Encoded payload.
    pub data: Vec<u8>,
}

impl Sample {
    /// Presentation timestamp in track ticks.
    pub fn pts(&self) -> i64 {
        self.dts + i64::from(self.composition_offset)
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("track_id", &self.track_id)
            .field("dts", &self.dts)
            .field("duration", &self.duration)
            .field("composition_offset", &self.composition_offset)
            .field("is_sync", &self.is_sync)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Streaming MP4 demultiplexer for the first video track.
#[derive(Debug, Default)]
pub struct Mp4Demuxer {
    /// Resident bytes; `data[0]` is at file offset `received - data.len()`.
    data: Vec<u8>,
    /// Total bytes appended so far.
    received: u64,
    /// File offset of the next unparsed top-level box.
    next_box: u64,
    /// Payload start of the first `mdat` seen before `moov`.
    first_mdat: Option<u64>,
    /// A top-level box with size 0 runs to end of input.
    open_ended: Option<(FourCc, u64)>,
    /// Top-level parsing gave up on an unreadable header.
    stalled: bool,
    moov_parsed: bool,
    track: Option<Track>,
    pending: VecDeque<SampleLocation>,
    /// `pending_min[i]` is the lowest offset among the last `i + 1`
    /// pending samples, so the front entry bounds what must stay resident.
    pending_min: Vec<u64>,
    ready: VecDeque<Sample>,
    finished: bool,
}

impl Mp4Demuxer {
    /// Create an empty demuxer.
    pub fn new() -> Self {
        Self::default()
    }

    /// The selected video track, once `moov` has been parsed.
    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    /// Number of bytes currently held in memory.
    pub fn resident_bytes(&self) -> usize {
        self.data.len()
    }

    /// Append the next chunk of the file.
    ///
    /// Chunks must arrive in file order with no gaps.
    ///
    /// # Errors
    ///
    /// [`ExtractError::Demux`] if the container is malformed, if the movie
    /// holds no video track or an empty one, or if called after
    /// [`flush`](Mp4Demuxer::flush).
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), ExtractError> {
        if self.finished {
            return Err(ExtractError::malformed("data appended after end of input"));
        }
        self.data.extend_from_slice(chunk);
        self.received += chunk.len() as u64;

        self.parse_top_level()?;
        self.collect_ready();
        self.release();
        Ok(())
    }

    /// Signal end of input and emit any samples still buffered.
    ///
    /// # Errors
    ///
    /// - [`DemuxErrorKind::NoVideoTrack`] if no `moov` with a video track
    ///   was found (this includes empty and non-MP4 input).
    /// - [`DemuxErrorKind::NoSamples`] if the video track is empty.
    /// - [`DemuxErrorKind::Malformed`] if samples point past the end of
    ///   the input.
    pub fn flush(&mut self) -> Result<(), ExtractError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        if let Some((kind, body_start)) = self.open_ended {
            if &kind == b"moov" && !self.moov_parsed {
                let start = self.resident_index(body_start)?;
                let body = self.data[start..].to_vec();
                self.load_moov(&body)?;
                self.collect_ready();
            }
        }

        if !self.moov_parsed || self.track.is_none() {
            return Err(ExtractError::Demux(DemuxErrorKind::NoVideoTrack));
        }
        if !self.pending.is_empty() {
            return Err(ExtractError::malformed(format!(
                "{} samples reference bytes past the end of input",
                self.pending.len()
            )));
        }
        self.data = Vec::new();
        Ok(())
    }

    /// Pop the next sample in decode order, if one is ready.
    pub fn next_sample(&mut self) -> Option<Sample> {
        self.ready.pop_front()
    }

    /// Drain every sample that is ready.
    pub fn drain_samples(&mut self) -> std::collections::vec_deque::Drain<'_, Sample> {
        self.ready.drain(..)
    }

    fn data_start(&self) -> u64 {
        self.received - self.data.len() as u64
    }

    fn resident_index(&self, offset: u64) -> Result<usize, ExtractError> {
        offset
            .checked_sub(self.data_start())
            .map(|index| index as usize)
            .ok_or_else(|| ExtractError::malformed(format!("offset {offset} was already released")))
    }

    fn parse_top_level(&mut self) -> Result<(), ExtractError> {
        while !self.moov_parsed && !self.stalled && self.open_ended.is_none() {
            if self.next_box < self.data_start() || self.next_box >= self.received {
                break;
            }
            let index = (self.next_box - self.data_start()) as usize;
            let header = match BoxHeader::parse(&self.data[index..]) {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(error) => {
                    // Not an ISO-BMFF stream (or trailing junk). Stop here;
                    // flush reports the missing track.
                    log::warn!("Stopping top-level parse at offset {}: {error}", self.next_box);
                    self.stalled = true;
                    break;
                }
            };
            let body_start = self.next_box + header.header_len;

            let Some(size) = header.size else {
                log::debug!("Top-level '{}' runs to end of input", fourcc_str(&header.kind));
                if &header.kind == b"mdat" {
                    self.first_mdat.get_or_insert(body_start);
                }
                self.open_ended = Some((header.kind, body_start));
                break;
            };

            match &header.kind {
                b"moov" => {
                    let end = self.next_box.saturating_add(size);
                    if end > self.received {
                        break;
                    }
                    let start = self.resident_index(body_start)?;
                    let body_end = self.resident_index(end)?;
                    let body = self.data[start..body_end].to_vec();
                    self.load_moov(&body)?;
                }
                b"mdat" => {
                    self.first_mdat.get_or_insert(body_start);
                }
                b"moof" => {
                    log::warn!("Fragmented MP4 movie fragments are not demuxed; ignoring 'moof'");
                }
                _ => {}
            }
            self.next_box = self.next_box.saturating_add(size);
        }
        Ok(())
    }

    fn load_moov(&mut self, body: &[u8]) -> Result<(), ExtractError> {
        let tracks = parse_moov(body)?;
        self.moov_parsed = true;

        let Some(selected) = tracks.iter().find(|track| track.is_video() && track.entry.is_some())
        else {
            log::debug!("Movie has {} tracks, none of them video", tracks.len());
            return Err(ExtractError::Demux(DemuxErrorKind::NoVideoTrack));
        };

        let track = Track::from_box(selected)
            .ok_or(ExtractError::Demux(DemuxErrorKind::NoVideoTrack))?;
        let locations = selected.table.locations()?;
        if locations.is_empty() {
            return Err(ExtractError::Demux(DemuxErrorKind::NoSamples));
        }

        log::info!(
            "Selected video track {} ({}, {}x{}, timescale {}, {} samples)",
            track.id,
            track.codec,
            track.width,
            track.height,
            track.timescale,
            locations.len()
        );

        let mut pending_min = Vec::with_capacity(locations.len());
        let mut lowest = u64::MAX;
        for location in locations.iter().rev() {
            lowest = lowest.min(location.offset);
            pending_min.push(lowest);
        }

        self.pending = locations.into();
        self.pending_min = pending_min;
        self.track = Some(track);
        Ok(())
    }

    fn collect_ready(&mut self) {
        let Some(track_id) = self.track.as_ref().map(|track| track.id) else {
            return;
        };
        let data_start = self.data_start();

        while let Some(location) = self.pending.front() {
            let end = location.offset + u64::from(location.size);
            if location.offset < data_start || end > self.received {
                break;
            }
            let start = (location.offset - data_start) as usize;
            let payload = self.data[start..start + location.size as usize].to_vec();

            self.ready.push_back(Sample {
                track_id,
                dts: location.dts,
                duration: location.duration,
                composition_offset: location.composition_offset,
                is_sync: location.is_sync,
                data: payload,
            });
            self.pending.pop_front();
            self.pending_min.pop();
        }
    }

    fn release(&mut self) {
        let keep_from = if self.moov_parsed {
            self.pending_min.last().copied().unwrap_or(self.received)
        } else {
            match self.open_ended {
                Some((kind, body_start)) if &kind == b"moov" => body_start,
                _ => self.next_box.min(self.first_mdat.unwrap_or(u64::MAX)),
            }
        };

        let data_start = self.data_start();
        if keep_from > data_start {
            let released = (keep_from.min(self.received) - data_start) as usize;
            if released > 0 {
                self.data.drain(..released);
            }
        }
    }
}

/// Demultiplex a complete in-memory file.
///
/// # Errors
///
/// See [`Mp4Demuxer::append`] and [`Mp4Demuxer::flush`].
pub fn demux(buffer: &[u8]) -> Result<(Track, Vec<Sample>), ExtractError> {
    let mut demuxer = Mp4Demuxer::new();
    demuxer.append(buffer)?;
    demuxer.flush()?;

    let track = demuxer
        .track()
        .cloned()
        .ok_or(ExtractError::Demux(DemuxErrorKind::NoVideoTrack))?;
    let samples: Vec<Sample> = demuxer.drain_samples().collect();
    if samples.is_empty() {
        return Err(ExtractError::Demux(DemuxErrorKind::NoSamples));
    }

    log::debug!("Demuxed {} samples from track {}", samples.len(), track.id);
    Ok((track, samples))
}
