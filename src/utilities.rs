//! Internal utility functions.
//!
//! Helpers for timestamp conversion and pixel-data copying that do not
//! belong in any single public module.

use ffmpeg_next::frame::Video as VideoFrame;

/// Microseconds per second.
pub const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Convert a value in a track's native timescale to microseconds.
///
/// Computed as `round(value / timescale * 1_000_000)`, half away from
/// zero, so one tick at a timescale of 2 is exactly 500 000 µs rather than
/// 499 999. A zero timescale yields zero.
pub fn ticks_to_micros(value: i64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    (value as f64 / timescale as f64 * MICROS_PER_SECOND).round() as i64
}

/// Copy pixel data from an FFmpeg video frame into a tightly-packed buffer.
///
/// FFmpeg frames frequently carry per-row padding (stride > width × bpp).
/// This strips that padding so the result can be handed to the `image`
/// crate directly.
pub fn frame_to_buffer(
    video_frame: &VideoFrame,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Vec<u8> {
    let stride = video_frame.stride(0);
    let expected_stride = (width as usize) * bytes_per_pixel;
    let data = video_frame.data(0);

    if stride == expected_stride {
        data[..expected_stride * (height as usize)].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(expected_stride * (height as usize));
        for row in 0..(height as usize) {
            let row_start = row * stride;
            buffer.extend_from_slice(&data[row_start..row_start + expected_stride]);
        }
        buffer
    }
}
