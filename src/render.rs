//! PNG rendering of decoded frames.

use std::io::Cursor;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};

use crate::decode::DecodedFrame;
use crate::error::ExtractError;

/// Draws RGBA frames onto a lossless PNG surface.
#[derive(Debug, Clone, Copy)]
pub struct PngRenderer {
    compression: CompressionType,
}

impl Default for PngRenderer {
    fn default() -> Self {
        Self {
            compression: CompressionType::Fast,
        }
    }
}

impl PngRenderer {
    /// A renderer using fast PNG compression.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different zlib compression level.
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Encode a frame as PNG at its own dimensions.
    ///
    /// # Errors
    ///
    /// [`ExtractError::Render`] if the frame has a zero dimension, its pixel
    /// buffer does not match its dimensions, or PNG encoding fails.
    pub fn render(&self, frame: &DecodedFrame) -> Result<Vec<u8>, ExtractError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(ExtractError::Render(format!(
                "cannot create a {}x{} surface",
                frame.width, frame.height
            )));
        }
        let expected = frame.width as usize * frame.height as usize * 4;
        if frame.data.len() != expected {
            return Err(ExtractError::Render(format!(
                "frame at {} µs has {} bytes, expected {expected}",
                frame.timestamp,
                frame.data.len()
            )));
        }

        let mut png = Cursor::new(Vec::with_capacity(expected / 4));
        PngEncoder::new_with_quality(&mut png, self.compression, FilterType::Adaptive)
            .write_image(
                &frame.data,
                frame.width,
                frame.height,
                ExtendedColorType::Rgba8,
            )
            .map_err(|error| ExtractError::Render(format!("PNG encoding failed: {error}")))?;
        Ok(png.into_inner())
    }

    /// Encode a frame as PNG and return it base64 encoded.
    ///
    /// # Errors
    ///
    /// See [`render`](PngRenderer::render).
    pub fn render_base64(&self, frame: &DecodedFrame) -> Result<String, ExtractError> {
        self.render(frame).map(|png| STANDARD.encode(png))
    }
}
