//! ISO-BMFF box headers and a bounds-checked big-endian reader.

use crate::error::ExtractError;

/// A four-character box or codec code.
pub type FourCc = [u8; 4];

/// Render a four-character code for logs and codec strings.
pub fn fourcc_str(code: &FourCc) -> String {
    String::from_utf8_lossy(code).into_owned()
}

/// A parsed box header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BoxHeader {
    pub kind: FourCc,
    /// 8, or 16 when a 64-bit `largesize` follows the type.
    pub header_len: u64,
    /// Total box size including the header. `None` means the box runs to
    /// the end of its container (size field 0).
    pub size: Option<u64>,
}

impl BoxHeader {
    /// Parse a header from the front of `data`.
    ///
    /// Returns `Ok(None)` if `data` is too short to hold the full header.
    pub(crate) fn parse(data: &[u8]) -> Result<Option<Self>, ExtractError> {
        if data.len() < 8 {
            return Ok(None);
        }
        let size32 = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let kind = [data[4], data[5], data[6], data[7]];

        let (header_len, size) = match size32 {
            0 => (8, None),
            1 => {
                if data.len() < 16 {
                    return Ok(None);
                }
                let mut large = [0u8; 8];
                large.copy_from_slice(&data[8..16]);
                (16, Some(u64::from_be_bytes(large)))
            }
            n => (8, Some(u64::from(n))),
        };

        if let Some(size) = size {
            if size < header_len {
                return Err(ExtractError::malformed(format!(
                    "box '{}' declares size {size}, smaller than its {header_len}-byte header",
                    fourcc_str(&kind)
                )));
            }
        }

        Ok(Some(Self {
            kind,
            header_len,
            size,
        }))
    }
}

/// Cursor over a fully resident box body.
///
/// Every read is bounds-checked and reports a truncated box as
/// [`ExtractError::Demux`] instead of panicking.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8], ExtractError> {
        if len > self.remaining() {
            return Err(ExtractError::malformed(format!(
                "needed {len} bytes but only {} remain in box",
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<(), ExtractError> {
        self.bytes(len).map(|_| ())
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ExtractError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, ExtractError> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, ExtractError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, ExtractError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub(crate) fn i32(&mut self) -> Result<i32, ExtractError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, ExtractError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub(crate) fn fourcc(&mut self) -> Result<FourCc, ExtractError> {
        self.array()
    }

    /// Read the `version` byte and 24-bit `flags` of a full box.
    pub(crate) fn full_box_header(&mut self) -> Result<(u8, u32), ExtractError> {
        let version = self.u8()?;
        let flags = self.array::<3>()?;
        Ok((
            version,
            u32::from_be_bytes([0, flags[0], flags[1], flags[2]]),
        ))
    }

    /// Read an entry count and check that `count * entry_size` bytes remain,
    /// so a corrupt count cannot trigger a huge allocation.
    pub(crate) fn entry_count(&mut self, entry_size: usize) -> Result<usize, ExtractError> {
        let count = self.u32()? as usize;
        if count.saturating_mul(entry_size) > self.remaining() {
            return Err(ExtractError::malformed(format!(
                "table declares {count} entries but only {} bytes remain",
                self.remaining()
            )));
        }
        Ok(count)
    }

    /// Read the next child box, returning its type and body.
    pub(crate) fn next_child(&mut self) -> Result<Option<(FourCc, &'a [u8])>, ExtractError> {
        if self.is_empty() {
            return Ok(None);
        }
        let rest = &self.data[self.pos..];
        let header = BoxHeader::parse(rest)?.ok_or_else(|| {
            ExtractError::malformed(format!("{} trailing bytes are not a box", rest.len()))
        })?;

        let total = match header.size {
            Some(size) => usize::try_from(size).unwrap_or(usize::MAX),
            None => rest.len(),
        };
        if total > rest.len() {
            return Err(ExtractError::malformed(format!(
                "box '{}' of {total} bytes overruns its parent",
                fourcc_str(&header.kind)
            )));
        }

        let body = &rest[header.header_len as usize..total];
        self.pos += total;
        Ok(Some((header.kind, body)))
    }
}
