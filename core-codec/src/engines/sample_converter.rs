//! # Sample Format Converter
//!
//! Turns decoded Symphonia buffers into the interleaved little-endian PCM
//! written to output slots.

use crate::error::{CodecError, Result};
use crate::format::SampleFormat;
use bytes::{BufMut, Bytes, BytesMut};
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::conv::IntoSample;
use symphonia::core::sample::Sample;

/// Sample converter that normalizes decoded audio to interleaved PCM.
///
/// Symphonia outputs audio in various formats (i16, i24, i32, f32, f64) and
/// always in planar layout. Everything goes through f32 in [-1.0, 1.0] first,
/// then gets packed into the requested [`SampleFormat`].
pub struct SampleConverter;

impl SampleConverter {
    /// Convert a decoded buffer to interleaved f32 samples.
    pub fn to_interleaved_f32(buffer: &AudioBufferRef<'_>) -> Vec<f32> {
        match buffer {
            AudioBufferRef::F32(buf) => Self::interleave(&**buf, |sample: f32| sample),
            AudioBufferRef::F64(buf) => Self::interleave(&**buf, |sample: f64| sample.into_sample()),
            AudioBufferRef::S32(buf) => Self::interleave(&**buf, |sample: i32| sample.into_sample()),
            AudioBufferRef::S16(buf) => Self::interleave(&**buf, |sample: i16| sample.into_sample()),
            AudioBufferRef::S24(buf) => Self::interleave(&**buf, |sample| IntoSample::into_sample(sample)),
            AudioBufferRef::S8(buf) => Self::interleave(&**buf, |sample: i8| sample.into_sample()),
            AudioBufferRef::U32(buf) => Self::interleave(&**buf, |sample: u32| sample.into_sample()),
            AudioBufferRef::U16(buf) => Self::interleave(&**buf, |sample: u16| sample.into_sample()),
            AudioBufferRef::U24(buf) => Self::interleave(&**buf, |sample| IntoSample::into_sample(sample)),
            AudioBufferRef::U8(buf) => Self::interleave(&**buf, |sample: u8| sample.into_sample()),
        }
    }

    /// Pack f32 samples into little-endian bytes of `format`.
    ///
    /// Samples outside [-1.0, 1.0] are clamped.
    pub fn encode(samples: &[f32], format: SampleFormat) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(samples.len() * format.bytes_per_sample());
        match format {
            SampleFormat::S16Le => {
                for sample in samples {
                    out.put_i16_le((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                }
            }
            SampleFormat::S32Le => {
                for sample in samples {
                    out.put_i32_le((sample.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32);
                }
            }
            SampleFormat::F32Le => {
                for sample in samples {
                    out.put_f32_le(sample.clamp(-1.0, 1.0));
                }
            }
            other => {
                return Err(CodecError::Unsupported(format!(
                    "decoder output sample format {}",
                    other.as_str()
                )))
            }
        }
        Ok(out.freeze())
    }

    /// Returns `true` if [`encode`](Self::encode) can produce `format`.
    pub fn supports(format: SampleFormat) -> bool {
        matches!(
            format,
            SampleFormat::S16Le | SampleFormat::S32Le | SampleFormat::F32Le
        )
    }

    fn interleave<T>(buf: &AudioBuffer<T>, convert: fn(T) -> f32) -> Vec<f32>
    where
        T: Sample + Copy,
    {
        let num_channels = buf.spec().channels.count();
        let num_frames = buf.frames();
        let mut interleaved = Vec::with_capacity(num_frames * num_channels);

        for frame_idx in 0..num_frames {
            for chan_idx in 0..num_channels {
                interleaved.push(convert(buf.chan(chan_idx)[frame_idx]));
            }
        }

        interleaved
    }
}
