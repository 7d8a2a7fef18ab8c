//! # Symphonia Software Decoders
//!
//! Packet-level audio decoding with Symphonia. Each input slot carries one
//! compressed packet (no container); decoded PCM is queued and handed out to
//! output slots as interleaved little-endian samples.
//!
//! ## Error Handling
//!
//! Corrupt packets are skipped with a warning, matching how a player keeps
//! going over a damaged frame. After [`MAX_CONSECUTIVE_ERRORS`] skipped packets
//! in a row the engine gives up and reports an extension error.

use super::sample_converter::SampleConverter;
use super::PendingOutput;
use crate::engine::{CodecEngine, InputBuffer, OutputBuffer, ReceiveStatus};
use crate::error::{CodecError, Result};
use crate::format::{keys, Format, SampleFormat};
use symphonia::core::audio::Channels;
use symphonia::core::codecs::{
    CodecParameters, CodecType, Decoder, DecoderOptions, CODEC_TYPE_AAC, CODEC_TYPE_ALAC,
    CODEC_TYPE_FLAC, CODEC_TYPE_MP3, CODEC_TYPE_VORBIS,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;
use tracing::{debug, error, info, instrument, warn};

/// MIME types served by [`SymphoniaEngine`] and their Symphonia codec.
pub const SUPPORTED: &[(&str, CodecType)] = &[
    ("audio/mpeg", CODEC_TYPE_MP3),
    ("audio/flac", CODEC_TYPE_FLAC),
    ("audio/vorbis", CODEC_TYPE_VORBIS),
    ("audio/mp4a-latm", CODEC_TYPE_AAC),
    ("audio/alac", CODEC_TYPE_ALAC),
];

/// Skipped packets tolerated in a row before decoding fails.
pub const MAX_CONSECUTIVE_ERRORS: usize = 10;

/// Extension code: the decoder could not be created.
pub const ERR_DECODER_CREATE: i32 = 1;
/// Extension code: decoding failed unrecoverably.
pub const ERR_DECODE: i32 = 2;
/// Extension code: too many corrupt packets in a row.
pub const ERR_CORRUPTED_STREAM: i32 = 3;

const DEFAULT_INPUT_BUFFER_SIZE: usize = 8 * 1024;
// Enough for one 8192-frame FLAC block of stereo f32
const DEFAULT_OUTPUT_BUFFER_SIZE: usize = 64 * 1024;

/// Software decoder backed by Symphonia.
pub struct SymphoniaEngine {
    mime: &'static str,
    codec: CodecType,
    decoder: Option<Box<dyn Decoder>>,
    format: Format,
    sample_format: SampleFormat,
    pending: PendingOutput,
    consecutive_errors: usize,
}

impl SymphoniaEngine {
    pub fn new(mime: &'static str, codec: CodecType) -> Self {
        Self {
            mime,
            codec,
            decoder: None,
            format: Format::new(),
            sample_format: SampleFormat::default(),
            pending: PendingOutput::default(),
            consecutive_errors: 0,
        }
    }

    /// Engine for `mime`, if Symphonia can decode it.
    pub fn for_mime(mime: &str) -> Option<Self> {
        SUPPORTED
            .iter()
            .find(|(name, _)| *name == mime)
            .map(|&(name, codec)| Self::new(name, codec))
    }

    fn codec_parameters(&self, format: &Format) -> Result<CodecParameters> {
        let channels = match format.get_int(keys::CHANNEL_COUNT) {
            Some(n) if (1..=32).contains(&n) => n as u32,
            _ => return Err(CodecError::ConfigureMismatchChannelCount),
        };
        let sample_rate = match format.get_int(keys::SAMPLE_RATE) {
            Some(rate) if rate > 0 => rate as u32,
            _ => return Err(CodecError::MismatchSampleRate),
        };

        let channel_mask = if channels == 32 {
            u32::MAX
        } else {
            (1u32 << channels) - 1
        };

        let mut params = CodecParameters::new();
        params
            .for_codec(self.codec)
            .with_sample_rate(sample_rate)
            .with_channels(Channels::from_bits_truncate(channel_mask));
        if let Some(extra) = format.get_buffer(keys::CODEC_CONFIG) {
            params.with_extra_data(extra.to_vec().into_boxed_slice());
        }
        Ok(params)
    }

    fn bytes_per_second(&self) -> u64 {
        let channels = self.format.get_int(keys::CHANNEL_COUNT).unwrap_or(0).max(0) as u64;
        let rate = self.format.get_int(keys::SAMPLE_RATE).unwrap_or(0).max(0) as u64;
        channels * rate * self.sample_format.bytes_per_sample() as u64
    }

    fn skip_packet(&mut self, reason: &dyn std::fmt::Display) -> Result<()> {
        self.consecutive_errors += 1;
        warn!(
            "Skipping packet with decode error (attempt {}/{}): {}",
            self.consecutive_errors, MAX_CONSECUTIVE_ERRORS, reason
        );
        if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            error!("Too many consecutive decode errors, stream may be corrupted");
            return Err(CodecError::engine(
                ERR_CORRUPTED_STREAM,
                format!(
                    "stream corruption after {} failed packets",
                    MAX_CONSECUTIVE_ERRORS
                ),
            ));
        }
        Ok(())
    }
}

impl CodecEngine for SymphoniaEngine {
    fn name(&self) -> &str {
        self.mime
    }

    #[instrument(skip(self, format), fields(codec = self.mime))]
    fn init(&mut self, format: &Format) -> Result<()> {
        let params = self.codec_parameters(format)?;

        let sample_format = SampleFormat::from_format(format)
            .filter(|f| SampleConverter::supports(*f))
            .ok_or_else(|| {
                CodecError::Unsupported(format!(
                    "decoder output sample format {:?}",
                    format.get(keys::AUDIO_SAMPLE_FORMAT)
                ))
            })?;

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| {
                error!("Failed to create decoder: {}", e);
                CodecError::engine(ERR_DECODER_CREATE, format!("failed to create decoder: {}", e))
            })?;

        let mut output = Format::new();
        output
            .put_string(keys::MIME, "audio/raw")
            .put_string(keys::AUDIO_SAMPLE_FORMAT, sample_format.as_str());
        for key in [keys::CHANNEL_COUNT, keys::SAMPLE_RATE] {
            if let Some(value) = format.get_int(key) {
                output.put_int(key, value);
            }
        }

        self.decoder = Some(decoder);
        self.sample_format = sample_format;
        self.format = output;
        self.pending = PendingOutput::new(self.bytes_per_second());
        self.consecutive_errors = 0;

        info!(output = %self.format, "Decoder initialized successfully");
        Ok(())
    }

    fn set_parameter(&mut self, format: &Format) -> Result<()> {
        // Stream parameters are fixed by the bitstream; only the bitrate hint
        // is informational.
        if let Some(bitrate) = format.get_long(keys::BITRATE) {
            self.format.put_long(keys::BITRATE, bitrate);
        }
        Ok(())
    }

    fn send_data(&mut self, input: &InputBuffer<'_>) -> Result<()> {
        if self.pending.eos_received() {
            if input.data.is_empty() && input.is_eos() {
                return Ok(());
            }
            return Err(CodecError::InvalidState(
                "input after end of stream".to_string(),
            ));
        }

        if !input.data.is_empty() {
            let decoder = self.decoder.as_mut().ok_or_else(|| {
                CodecError::InvalidState("decoder not initialized".to_string())
            })?;

            let ts = input.presentation_time_us.max(0) as u64;
            let packet = Packet::new_from_slice(0, ts, 0, input.data);

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    Ok((spec, SampleConverter::to_interleaved_f32(&decoded)))
                }
                Err(e) => Err(e),
            };

            match decoded {
                Ok((spec, samples)) => {
                    self.consecutive_errors = 0;

                    let channels = spec.channels.count() as i32;
                    let rate = spec.rate as i32;
                    if self.format.get_int(keys::CHANNEL_COUNT) != Some(channels)
                        || self.format.get_int(keys::SAMPLE_RATE) != Some(rate)
                    {
                        debug!(
                            channels,
                            rate, "Updating output format from decoded audio"
                        );
                        self.format
                            .put_int(keys::CHANNEL_COUNT, channels)
                            .put_int(keys::SAMPLE_RATE, rate);
                        let bytes_per_second = self.bytes_per_second();
                        self.pending.set_bytes_per_second(bytes_per_second);
                    }

                    let bytes = SampleConverter::encode(&samples, self.sample_format)?;
                    self.pending.push(bytes, input.presentation_time_us);
                }
                Err(SymphoniaError::DecodeError(err)) => self.skip_packet(&err)?,
                Err(SymphoniaError::IoError(err)) => self.skip_packet(&err)?,
                Err(e) => {
                    error!("Fatal decode error: {}", e);
                    return Err(CodecError::engine(ERR_DECODE, e.to_string()));
                }
            }
        }

        if input.is_eos() {
            self.pending.mark_eos(input.presentation_time_us);
        }
        Ok(())
    }

    fn receive_data(&mut self, output: &mut OutputBuffer<'_>) -> Result<ReceiveStatus> {
        Ok(self.pending.drain_into(output))
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.reset();
        }
        self.pending.clear();
        self.consecutive_errors = 0;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        *self = Self::new(self.mime, self.codec);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.decoder = None;
        self.pending.clear();
        Ok(())
    }

    fn output_format(&self) -> Format {
        self.format.clone()
    }

    fn input_buffer_size(&self) -> usize {
        DEFAULT_INPUT_BUFFER_SIZE
    }

    fn output_buffer_size(&self) -> usize {
        DEFAULT_OUTPUT_BUFFER_SIZE
    }
}
