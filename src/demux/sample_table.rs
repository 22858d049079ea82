//! MP4 sample table (`stbl`) parsing and expansion.
//!
//! The tables are stored run-length encoded; [`SampleTable::locations`]
//! expands them into one [`SampleLocation`] per sample, in decode order.

use crate::demux::boxes::Reader;
use crate::error::ExtractError;

/// Where one sample's payload lives and how it is timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SampleLocation {
    /// Absolute byte offset of the payload in the file.
    pub offset: u64,
    pub size: u32,
    /// Decode timestamp in track ticks.
    pub dts: i64,
    pub duration: u32,
    /// Presentation minus decode time, in track ticks.
    pub composition_offset: i32,
    pub is_sync: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SampleTable {
    pub sample_sizes: Vec<u32>,
    pub chunk_offsets: Vec<u64>,
    /// (first_chunk, samples_per_chunk, sample_description_index)
    pub sample_to_chunk: Vec<(u32, u32, u32)>,
    /// (sample_count, sample_delta)
    pub time_to_sample: Vec<(u32, u32)>,
    /// 1-based sample numbers of sync samples. `None` when `stss` is
    /// absent, meaning every sample is a sync sample.
    pub sync_samples: Option<Vec<u32>>,
    /// (sample_count, offset)
    pub composition_offsets: Vec<(u32, i32)>,
}

impl SampleTable {
    /// Parse the children of an `stbl` box. Unknown children are skipped.
    pub(crate) fn parse_children(
        &mut self,
        stbl: &[u8],
        mut on_stsd: impl FnMut(&[u8]) -> Result<(), ExtractError>,
    ) -> Result<(), ExtractError> {
        let mut reader = Reader::new(stbl);
        while let Some((kind, body)) = reader.next_child()? {
            match &kind {
                b"stsd" => on_stsd(body)?,
                b"stsz" => self.parse_stsz(body)?,
                b"stco" => self.parse_stco(body)?,
                b"co64" => self.parse_co64(body)?,
                b"stsc" => self.parse_stsc(body)?,
                b"stts" => self.parse_stts(body)?,
                b"stss" => self.parse_stss(body)?,
                b"ctts" => self.parse_ctts(body)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_stsz(&mut self, body: &[u8]) -> Result<(), ExtractError> {
        let mut reader = Reader::new(body);
        reader.full_box_header()?;
        let uniform_size = reader.u32()?;
        if uniform_size != 0 {
            let count = reader.u32()? as usize;
            // A uniform size with no payload bytes per entry still needs a
            // sane bound; no real track has more than 2^28 samples.
            if count > 1 << 28 {
                return Err(ExtractError::malformed(format!(
                    "stsz declares {count} samples"
                )));
            }
            self.sample_sizes = vec![uniform_size; count];
        } else {
            let count = reader.entry_count(4)?;
            self.sample_sizes = (0..count).map(|_| reader.u32()).collect::<Result<_, _>>()?;
        }
        Ok(())
    }

    fn parse_stco(&mut self, body: &[u8]) -> Result<(), ExtractError> {
        let mut reader = Reader::new(body);
        reader.full_box_header()?;
        let count = reader.entry_count(4)?;
        self.chunk_offsets = (0..count)
            .map(|_| reader.u32().map(u64::from))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn parse_co64(&mut self, body: &[u8]) -> Result<(), ExtractError> {
        let mut reader = Reader::new(body);
        reader.full_box_header()?;
        let count = reader.entry_count(8)?;
        self.chunk_offsets = (0..count).map(|_| reader.u64()).collect::<Result<_, _>>()?;
        Ok(())
    }

    fn parse_stsc(&mut self, body: &[u8]) -> Result<(), ExtractError> {
        let mut reader = Reader::new(body);
        reader.full_box_header()?;
        let count = reader.entry_count(12)?;
        self.sample_to_chunk = (0..count)
            .map(|_| -> Result<_, ExtractError> { Ok((reader.u32()?, reader.u32()?, reader.u32()?)) })
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn parse_stts(&mut self, body: &[u8]) -> Result<(), ExtractError> {
        let mut reader = Reader::new(body);
        reader.full_box_header()?;
        let count = reader.entry_count(8)?;
        self.time_to_sample = (0..count)
            .map(|_| -> Result<_, ExtractError> { Ok((reader.u32()?, reader.u32()?)) })
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn parse_stss(&mut self, body: &[u8]) -> Result<(), ExtractError> {
        let mut reader = Reader::new(body);
        reader.full_box_header()?;
        let count = reader.entry_count(4)?;
        let mut sync: Vec<u32> = (0..count).map(|_| reader.u32()).collect::<Result<_, _>>()?;
        sync.sort_unstable();
        self.sync_samples = Some(sync);
        Ok(())
    }

    fn parse_ctts(&mut self, body: &[u8]) -> Result<(), ExtractError> {
        let mut reader = Reader::new(body);
        // Version 0 offsets are unsigned on paper but every muxer treats
        // them as signed 32-bit; read both versions the same way.
        reader.full_box_header()?;
        let count = reader.entry_count(8)?;
        self.composition_offsets = (0..count)
            .map(|_| -> Result<_, ExtractError> { Ok((reader.u32()?, reader.i32()?)) })
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    pub(crate) fn sample_count(&self) -> usize {
        self.sample_sizes.len()
    }

    /// Expand the tables into per-sample locations in decode order.
    pub(crate) fn locations(&self) -> Result<Vec<SampleLocation>, ExtractError> {
        let total = self.sample_count();
        let mut locations = Vec::with_capacity(total);
        if total == 0 {
            return Ok(locations);
        }
        if self.sample_to_chunk.is_empty() || self.chunk_offsets.is_empty() {
            return Err(ExtractError::malformed(
                "sample table has sizes but no chunk layout",
            ));
        }

        let mut durations = expand_runs(&self.time_to_sample);
        let mut offsets = expand_runs(&self.composition_offsets);

        let chunk_count = self.chunk_offsets.len() as u32;
        let mut sample_index = 0usize;

        'entries: for (entry_index, &(first_chunk, samples_per_chunk, _)) in
            self.sample_to_chunk.iter().enumerate()
        {
            if first_chunk == 0 {
                return Err(ExtractError::malformed("stsc chunk numbers start at 1"));
            }
            let last_chunk = self
                .sample_to_chunk
                .get(entry_index + 1)
                .map(|next| next.0.saturating_sub(1))
                .unwrap_or(chunk_count);

            for chunk in first_chunk..=last_chunk {
                let mut offset = *self.chunk_offsets.get(chunk as usize - 1).ok_or_else(|| {
                    ExtractError::malformed(format!(
                        "stsc references chunk {chunk} of {chunk_count}"
                    ))
                })?;
                for _ in 0..samples_per_chunk {
                    if sample_index == total {
                        break 'entries;
                    }
                    let size = self.sample_sizes[sample_index];
                    locations.push(SampleLocation {
                        offset,
                        size,
                        dts: 0,
                        duration: durations.next().unwrap_or(0),
                        composition_offset: offsets.next().unwrap_or(0),
                        is_sync: self.is_sync(sample_index as u32 + 1),
                    });
                    offset += u64::from(size);
                    sample_index += 1;
                }
            }
        }

        if locations.len() != total {
            return Err(ExtractError::malformed(format!(
                "chunk layout covers {} of {total} samples",
                locations.len()
            )));
        }

        let mut dts = 0i64;
        for location in &mut locations {
            location.dts = dts;
            dts += i64::from(location.duration);
        }

        Ok(locations)
    }

    fn is_sync(&self, sample_number: u32) -> bool {
        match &self.sync_samples {
            Some(sync) => sync.binary_search(&sample_number).is_ok(),
            None => true,
        }
    }
}

/// Expand `(count, value)` runs into a per-sample iterator.
fn expand_runs<T: Copy>(runs: &[(u32, T)]) -> impl Iterator<Item = T> + '_ {
    runs.iter()
        .flat_map(|&(count, value)| std::iter::repeat_n(value, count as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SampleTable {
        SampleTable {
            sample_sizes: vec![10, 20, 30, 40, 50],
            chunk_offsets: vec![1000, 2000],
            sample_to_chunk: vec![(1, 3, 1), (2, 2, 1)],
            time_to_sample: vec![(5, 512)],
            sync_samples: Some(vec![1, 4]),
            composition_offsets: Vec::new(),
        }
    }

    #[test]
    fn expands_chunks_into_offsets() {
        let locations = table().locations().unwrap();
        let offsets: Vec<u64> = locations.iter().map(|l| l.offset).collect();
        assert_eq!(offsets, vec![1000, 1010, 1030, 2000, 2040]);
    }

    #[test]
    fn decode_timestamps_accumulate() {
        let locations = table().locations().unwrap();
        let dts: Vec<i64> = locations.iter().map(|l| l.dts).collect();
        assert_eq!(dts, vec![0, 512, 1024, 1536, 2048]);
        assert!(locations.iter().all(|l| l.duration == 512));
    }

    #[test]
    fn sync_flags_follow_stss() {
        let locations = table().locations().unwrap();
        let sync: Vec<bool> = locations.iter().map(|l| l.is_sync).collect();
        assert_eq!(sync, vec![true, false, false, true, false]);

        let mut all_sync = table();
        all_sync.sync_samples = None;
        assert!(all_sync.locations().unwrap().iter().all(|l| l.is_sync));
    }

    #[test]
    fn composition_offsets_are_per_sample() {
        let mut table = table();
        table.composition_offsets = vec![(1, 1024), (2, -512), (2, 0)];
        let offsets: Vec<i32> = table
            .locations()
            .unwrap()
            .iter()
            .map(|l| l.composition_offset)
            .collect();
        assert_eq!(offsets, vec![1024, -512, -512, 0, 0]);
    }

    #[test]
    fn missing_chunk_is_malformed() {
        let mut table = table();
        table.chunk_offsets.truncate(1);
        assert!(table.locations().is_err());
    }
}
