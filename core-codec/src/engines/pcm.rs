//! # PCM Passthrough Engine
//!
//! Copies interleaved PCM from input slots to output slots unchanged. Inputs
//! larger than an output slot are split across several outputs.

use super::PendingOutput;
use crate::engine::{CodecEngine, InputBuffer, OutputBuffer, ReceiveStatus};
use crate::error::{CodecError, Result};
use crate::format::{keys, Format, SampleFormat};
use bytes::Bytes;
use tracing::{debug, trace};

/// Registered name of the passthrough engine.
pub const MIME: &str = "audio/raw";

const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Passthrough engine for `audio/raw`.
#[derive(Debug, Default)]
pub struct PcmEngine {
    format: Format,
    pending: PendingOutput,
    initialized: bool,
}

impl PcmEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn bytes_per_second(format: &Format) -> u64 {
        let channels = format.get_int(keys::CHANNEL_COUNT).unwrap_or(0).max(0) as u64;
        let rate = format.get_int(keys::SAMPLE_RATE).unwrap_or(0).max(0) as u64;
        let width = SampleFormat::from_format(format)
            .map(|f| f.bytes_per_sample())
            .unwrap_or(0) as u64;
        channels * rate * width
    }

    fn check(format: &Format) -> Result<()> {
        match format.get_int(keys::CHANNEL_COUNT) {
            Some(channels) if channels > 0 => {}
            _ => return Err(CodecError::ConfigureMismatchChannelCount),
        }
        match format.get_int(keys::SAMPLE_RATE) {
            Some(rate) if rate > 0 => {}
            _ => return Err(CodecError::MismatchSampleRate),
        }
        if SampleFormat::from_format(format).is_none() {
            return Err(CodecError::Unsupported(format!(
                "sample format {:?}",
                format.get(keys::AUDIO_SAMPLE_FORMAT)
            )));
        }
        Ok(())
    }
}

impl CodecEngine for PcmEngine {
    fn name(&self) -> &str {
        MIME
    }

    fn init(&mut self, format: &Format) -> Result<()> {
        Self::check(format)?;

        let mut own = format.clone();
        own.put_string(keys::MIME, MIME);
        if !own.contains_key(keys::AUDIO_SAMPLE_FORMAT) {
            own.put_string(keys::AUDIO_SAMPLE_FORMAT, SampleFormat::default().as_str());
        }

        self.pending = PendingOutput::new(Self::bytes_per_second(&own));
        self.format = own;
        self.initialized = true;
        debug!(format = %self.format, "PCM engine initialized");
        Ok(())
    }

    fn set_parameter(&mut self, format: &Format) -> Result<()> {
        let mut merged = self.format.clone();
        merged.merge(format);
        merged.put_string(keys::MIME, MIME);
        Self::check(&merged)?;

        self.pending
            .set_bytes_per_second(Self::bytes_per_second(&merged));
        self.format = merged;
        Ok(())
    }

    fn send_data(&mut self, input: &InputBuffer<'_>) -> Result<()> {
        if !self.initialized {
            return Err(CodecError::InvalidState("PCM engine not initialized".into()));
        }
        if self.pending.eos_received() {
            if input.data.is_empty() && input.is_eos() {
                return Ok(());
            }
            return Err(CodecError::InvalidState(
                "input after end of stream".to_string(),
            ));
        }

        trace!(
            bytes = input.data.len(),
            pts = input.presentation_time_us,
            "PCM input"
        );
        self.pending
            .push(Bytes::copy_from_slice(input.data), input.presentation_time_us);
        if input.is_eos() {
            self.pending.mark_eos(input.presentation_time_us);
        }
        Ok(())
    }

    fn receive_data(&mut self, output: &mut OutputBuffer<'_>) -> Result<ReceiveStatus> {
        Ok(self.pending.drain_into(output))
    }

    fn flush(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        *self = Self::new();
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.pending.clear();
        self.initialized = false;
        Ok(())
    }

    fn output_format(&self) -> Format {
        self.format.clone()
    }

    fn input_buffer_size(&self) -> usize {
        self.format
            .get_int(keys::MAX_INPUT_SIZE)
            .filter(|size| *size > 0)
            .map(|size| size as usize)
            .unwrap_or(DEFAULT_BUFFER_SIZE)
    }

    fn output_buffer_size(&self) -> usize {
        DEFAULT_BUFFER_SIZE
    }
}
