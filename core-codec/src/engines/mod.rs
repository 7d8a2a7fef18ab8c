//! # Built-in Codec Engines
//!
//! Engines compiled into this crate and registered by
//! [`EngineRegistry::with_builtin`](crate::engine::EngineRegistry::with_builtin).
//!
//! ## Engines
//!
//! - [`PcmEngine`] (`audio/raw`): passthrough for interleaved PCM
//! - [`SymphoniaEngine`] (`audio/mpeg`, `audio/flac`, `audio/vorbis`,
//!   `audio/mp4a-latm`, `audio/alac`): software decoders, behind the
//!   `software-decoders` feature

pub mod pcm;
#[cfg(feature = "software-decoders")]
pub mod sample_converter;
#[cfg(feature = "software-decoders")]
pub mod symphonia;

pub use pcm::PcmEngine;
#[cfg(feature = "software-decoders")]
pub use self::symphonia::SymphoniaEngine;

use crate::buffer::BufferFlag;
use crate::engine::{CodecEngine, EngineRegistry, OutputBuffer, ReceiveStatus};
use bytes::Bytes;
use std::collections::VecDeque;

/// Register every engine compiled into this crate.
pub fn register_builtin(registry: &EngineRegistry) {
    registry.register(pcm::MIME, || Box::new(PcmEngine::new()) as Box<dyn CodecEngine>);

    #[cfg(feature = "software-decoders")]
    for &(mime, codec) in self::symphonia::SUPPORTED {
        registry.register(mime, move || {
            Box::new(SymphoniaEngine::new(mime, codec)) as Box<dyn CodecEngine>
        });
    }
}

// ============================================================================
// Pending Output Queue
// ============================================================================

/// Bytes produced by an engine that have not reached an output slot yet.
///
/// Chunks larger than a slot are split; the remainder keeps its place at the
/// front of the queue with a timestamp advanced by the bytes already emitted.
#[derive(Debug, Default)]
pub(crate) struct PendingOutput {
    chunks: VecDeque<(Bytes, i64)>,
    bytes_per_second: u64,
    eos_received: bool,
    eos_emitted: bool,
    last_pts: i64,
}

impl PendingOutput {
    pub(crate) fn new(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second,
            ..Default::default()
        }
    }

    pub(crate) fn set_bytes_per_second(&mut self, bytes_per_second: u64) {
        self.bytes_per_second = bytes_per_second;
    }

    pub(crate) fn push(&mut self, data: Bytes, presentation_time_us: i64) {
        self.last_pts = presentation_time_us;
        if !data.is_empty() {
            self.chunks.push_back((data, presentation_time_us));
        }
    }

    pub(crate) fn mark_eos(&mut self, presentation_time_us: i64) {
        self.eos_received = true;
        self.last_pts = self.last_pts.max(presentation_time_us);
    }

    pub(crate) fn eos_received(&self) -> bool {
        self.eos_received
    }

    pub(crate) fn pending_bytes(&self) -> usize {
        self.chunks.iter().map(|(data, _)| data.len()).sum()
    }

    /// Move the next unit into `output`.
    ///
    /// Once every chunk is out and end of stream was marked, one empty
    /// terminal unit is produced; after that the queue reports
    /// [`ReceiveStatus::NotEnoughData`] until cleared.
    pub(crate) fn drain_into(&mut self, output: &mut OutputBuffer<'_>) -> ReceiveStatus {
        if let Some((mut data, pts)) = self.chunks.pop_front() {
            let written = output.fill(&data, pts);
            if written == 0 {
                self.chunks.push_front((data, pts));
                return ReceiveStatus::NotEnoughData;
            }
            if written < data.len() {
                let rest = data.split_off(written);
                self.chunks.push_front((rest, pts + self.duration_us(written)));
            }
            return ReceiveStatus::Filled;
        }

        if self.eos_received && !self.eos_emitted {
            self.eos_emitted = true;
            output.set_filled(0, self.last_pts);
            output.set_flag(BufferFlag::EOS);
            return ReceiveStatus::EndOfStream;
        }

        ReceiveStatus::NotEnoughData
    }

    pub(crate) fn clear(&mut self) {
        self.chunks.clear();
        self.eos_received = false;
        self.eos_emitted = false;
        self.last_pts = 0;
    }

    fn duration_us(&self, bytes: usize) -> i64 {
        if self.bytes_per_second == 0 {
            return 0;
        }
        (bytes as u64 * 1_000_000 / self.bytes_per_second) as i64
    }
}
