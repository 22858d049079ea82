//! Move-only video byte buffers.
//!
//! A [`VideoBuffer`] is the encoded video as it travels through the
//! pipeline: created by the caller, consumed by the normalizer, then
//! moved into the worker. It is neither [`Clone`] nor
//! [`Copy`], so once a stage takes it by value the previous owner can no
//! longer reach the bytes.
//!
//! Where a buffer has to be parked before it can be moved on (a request
//! waiting to be posted to the worker, for instance), [`TransferSlot`]
//! provides the dynamic form of the same guarantee: the bytes can be taken
//! out exactly once.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::Path;

use crate::error::ExtractError;

/// An immutable encoded video, owned by exactly one stage at a time.
pub struct VideoBuffer {
    bytes: Vec<u8>,
}

impl VideoBuffer {
    /// Wrap bytes already in memory.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Read a whole file into a buffer.
    ///
    /// # Errors
    ///
    /// [`ExtractError::Io`] if the file cannot be read.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ExtractError> {
        let bytes = std::fs::read(path.as_ref())?;
        log::debug!(
            "Loaded {} bytes from {}",
            bytes.len(),
            path.as_ref().display()
        );
        Ok(Self::new(bytes))
    }

    /// Borrow the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of encoded bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` for a zero-byte buffer.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Give up the handle and return the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<Vec<u8>> for VideoBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl Debug for VideoBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("VideoBuffer")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A holder a [`VideoBuffer`] can be taken out of exactly once.
#[derive(Debug)]
pub struct TransferSlot {
    buffer: Option<VideoBuffer>,
}

impl TransferSlot {
    /// Park a buffer.
    pub fn new(buffer: VideoBuffer) -> Self {
        Self {
            buffer: Some(buffer),
        }
    }

    /// Move the buffer out. Every later call returns `None`.
    pub fn take(&mut self) -> Option<VideoBuffer> {
        self.buffer.take()
    }

    /// `true` once the buffer has been moved out.
    pub fn is_transferred(&self) -> bool {
        self.buffer.is_none()
    }
}
