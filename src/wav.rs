//! 16-bit PCM WAV encoding
//!
//! Takes are written through `hound` into memory. Mono and stereo 16-bit PCM
//! get the canonical 44-byte RIFF header followed by interleaved
//! little-endian samples.

use std::io::Cursor;

use crate::error::EngineError;

/// Size of the RIFF/fmt/data header preceding the samples
pub const HEADER_LEN: usize = 44;

/// Convert a float sample to 16-bit PCM.
///
/// Clamped to [-1, 1] first; negative values scale by 32768 and non-negative
/// values by 32767, so both extremes are representable. NaN encodes as silence.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encode planar channel data as a 16-bit PCM WAV file.
///
/// Every channel is expected to hold the same number of frames; shorter
/// channels are padded with silence.
pub fn encode(channels: &[Vec<f32>], sample_rate: u32) -> Result<Vec<u8>, EngineError> {
    let num_channels = channels.len().max(1);
    let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
    let spec = hound::WavSpec {
        channels: num_channels as u16,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(HEADER_LEN + frames * num_channels * 2));
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for frame in 0..frames {
        for ch in 0..num_channels {
            let sample = channels
                .get(ch)
                .and_then(|c| c.get(frame))
                .copied()
                .unwrap_or(0.0);
            writer.write_sample(sample_to_i16(sample))?;
        }
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}
