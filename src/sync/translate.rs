//! Time offset to byte offset
//!
//! Assumes bytes advance linearly with time, which only holds for
//! constant-bitrate material. With VBR files a late joiner lands near, not
//! on, the program position; the error is bounded by the file and never
//! causes a failure. Encoder mode does not use this at all.

use crate::catalog::Track;
use crate::constants::MAX_SEEK_FRACTION;

/// Approximate byte position of `offset_secs` into `track`.
///
/// The fraction is clamped to `[0, 0.9999]` so an imprecise duration can
/// never seek to or past end of file.
pub fn to_byte_offset(track: &Track, offset_secs: f64) -> u64 {
    if track.size == 0 || !(track.duration > 0.0) {
        return 0;
    }
    let fraction = offset_secs / track.duration;
    if !fraction.is_finite() {
        return 0;
    }
    let fraction = fraction.clamp(0.0, MAX_SEEK_FRACTION);
    (fraction * track.size as f64).floor() as u64
}
