//! Movie box (`moov`) parsing: track headers, media headers, handlers and
//! sample descriptions.

use crate::demux::boxes::{FourCc, Reader, fourcc_str};
use crate::demux::sample_table::SampleTable;
use crate::error::ExtractError;

/// Fixed part of a `VisualSampleEntry` that precedes its child boxes.
const VISUAL_SAMPLE_ENTRY_LEN: usize = 78;

/// Decoder configuration boxes that may follow a visual sample entry.
const CONFIG_BOXES: [&FourCc; 4] = [b"avcC", b"hvcC", b"vpcC", b"av1C"];

/// The first entry of a track's `stsd`.
#[derive(Debug, Clone, Default)]
pub(crate) struct SampleEntry {
    pub format: FourCc,
    pub width: u16,
    pub height: u16,
    /// (box type, box body) of the decoder configuration record.
    pub config: Option<(FourCc, Vec<u8>)>,
}

/// Everything the demuxer keeps from one `trak`.
#[derive(Debug, Clone, Default)]
pub(crate) struct TrackBox {
    pub id: u32,
    pub handler: FourCc,
    pub timescale: u32,
    pub duration: u64,
    pub entry: Option<SampleEntry>,
    pub table: SampleTable,
}

impl TrackBox {
    pub(crate) fn is_video(&self) -> bool {
        &self.handler == b"vide"
    }
}

/// Parse the body of a `moov` box into its tracks, in file order.
pub(crate) fn parse_moov(body: &[u8]) -> Result<Vec<TrackBox>, ExtractError> {
    let mut tracks = Vec::new();
    let mut reader = Reader::new(body);
    while let Some((kind, child)) = reader.next_child()? {
        if &kind == b"trak" {
            tracks.push(parse_trak(child)?);
        }
    }
    Ok(tracks)
}

fn parse_trak(body: &[u8]) -> Result<TrackBox, ExtractError> {
    let mut track = TrackBox::default();
    let mut reader = Reader::new(body);
    while let Some((kind, child)) = reader.next_child()? {
        match &kind {
            b"tkhd" => track.id = parse_tkhd(child)?,
            b"mdia" => parse_mdia(child, &mut track)?,
            _ => {}
        }
    }
    Ok(track)
}

fn parse_tkhd(body: &[u8]) -> Result<u32, ExtractError> {
    let mut reader = Reader::new(body);
    let (version, _) = reader.full_box_header()?;
    // creation_time + modification_time
    reader.skip(if version == 1 { 16 } else { 8 })?;
    reader.u32()
}

fn parse_mdia(body: &[u8], track: &mut TrackBox) -> Result<(), ExtractError> {
    let mut reader = Reader::new(body);
    while let Some((kind, child)) = reader.next_child()? {
        match &kind {
            b"mdhd" => parse_mdhd(child, track)?,
            b"hdlr" => {
                let mut hdlr = Reader::new(child);
                hdlr.full_box_header()?;
                hdlr.skip(4)?; // pre_defined
                track.handler = hdlr.fourcc()?;
            }
            b"minf" => parse_minf(child, track)?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_mdhd(body: &[u8], track: &mut TrackBox) -> Result<(), ExtractError> {
    let mut reader = Reader::new(body);
    let (version, _) = reader.full_box_header()?;
    if version == 1 {
        reader.skip(16)?;
        track.timescale = reader.u32()?;
        track.duration = reader.u64()?;
    } else {
        reader.skip(8)?;
        track.timescale = reader.u32()?;
        track.duration = u64::from(reader.u32()?);
    }
    if track.timescale == 0 {
        return Err(ExtractError::malformed("mdhd timescale is zero"));
    }
    Ok(())
}

fn parse_minf(body: &[u8], track: &mut TrackBox) -> Result<(), ExtractError> {
    let mut reader = Reader::new(body);
    while let Some((kind, child)) = reader.next_child()? {
        if &kind == b"stbl" {
            let mut entry = None;
            track.table.parse_children(child, |stsd| {
                entry = parse_stsd(stsd)?;
                Ok(())
            })?;
            track.entry = entry;
        }
    }
    Ok(())
}

fn parse_stsd(body: &[u8]) -> Result<Option<SampleEntry>, ExtractError> {
    let mut reader = Reader::new(body);
    reader.full_box_header()?;
    let entry_count = reader.u32()?;
    if entry_count == 0 {
        return Ok(None);
    }
    if entry_count > 1 {
        log::debug!("stsd has {entry_count} entries; using the first");
    }

    let Some((format, entry_body)) = reader.next_child()? else {
        return Ok(None);
    };

    let mut entry = SampleEntry {
        format,
        ..SampleEntry::default()
    };

    // Non-visual entries (audio, text) are shorter; keep just the format.
    if entry_body.len() < VISUAL_SAMPLE_ENTRY_LEN {
        return Ok(Some(entry));
    }

    let mut visual = Reader::new(entry_body);
    visual.skip(6 + 2 + 2 + 2 + 12)?; // reserved, data_reference_index, pre_defined, reserved, pre_defined
    entry.width = visual.u16()?;
    entry.height = visual.u16()?;
    visual.skip(VISUAL_SAMPLE_ENTRY_LEN - 28)?;

    while let Some((kind, child)) = visual.next_child()? {
        if CONFIG_BOXES.contains(&&kind) {
            entry.config = Some((kind, child.to_vec()));
        }
    }

    log::trace!(
        "Sample entry '{}' {}x{} (config: {})",
        fourcc_str(&entry.format),
        entry.width,
        entry.height,
        entry
            .config
            .as_ref()
            .map(|(kind, _)| fourcc_str(kind))
            .unwrap_or_else(|| "none".to_string())
    );

    Ok(Some(entry))
}
