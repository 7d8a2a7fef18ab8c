//! # Codec Engine Contract
//!
//! The engine performs the actual media transform. The adapter and worker only
//! ever see it through [`CodecEngine`], so adding a codec never touches the
//! lifecycle core.
//!
//! ## Threading Model
//!
//! An engine is wrapped in a mutex and shared by the two worker pipelines: the
//! input pipeline calls [`CodecEngine::send_data`], the output pipeline calls
//! [`CodecEngine::receive_data`]. Engines therefore only need to be `Send`.
//!
//! ## Selecting an Engine
//!
//! ```rust
//! use core_codec::engine::EngineRegistry;
//!
//! let registry = EngineRegistry::with_builtin();
//! let engine = registry.create("audio/raw").expect("pcm engine is built in");
//! assert_eq!(engine.name(), "audio/raw");
//! ```

use crate::buffer::BufferFlag;
use crate::error::{CodecError, Result};
use crate::format::Format;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Input handed to an engine: the valid region of a client-filled slot.
#[derive(Debug, Clone, Copy)]
pub struct InputBuffer<'a> {
    pub data: &'a [u8],
    pub presentation_time_us: i64,
    pub flag: BufferFlag,
}

impl<'a> InputBuffer<'a> {
    pub fn new(data: &'a [u8], presentation_time_us: i64, flag: BufferFlag) -> Self {
        Self {
            data,
            presentation_time_us,
            flag,
        }
    }

    /// Empty input carrying only the end-of-stream marker.
    pub fn eos(presentation_time_us: i64) -> InputBuffer<'static> {
        InputBuffer {
            data: &[],
            presentation_time_us,
            flag: BufferFlag::EOS,
        }
    }

    pub fn is_eos(&self) -> bool {
        self.flag.contains(BufferFlag::EOS)
    }
}

/// Output slot lent to an engine.
///
/// The engine writes into `data` and reports how much it wrote through
/// [`OutputBuffer::set_filled`].
#[derive(Debug)]
pub struct OutputBuffer<'a> {
    data: &'a mut [u8],
    size: usize,
    presentation_time_us: i64,
    flag: BufferFlag,
}

impl<'a> OutputBuffer<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self {
            data,
            size: 0,
            presentation_time_us: 0,
            flag: BufferFlag::NONE,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    /// Copy `bytes` to the start of the buffer and record the result.
    ///
    /// Returns the number of bytes copied, which is capped at the capacity.
    pub fn fill(&mut self, bytes: &[u8], presentation_time_us: i64) -> usize {
        let n = bytes.len().min(self.data.len());
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.size = n;
        self.presentation_time_us = presentation_time_us;
        n
    }

    pub fn set_filled(&mut self, size: usize, presentation_time_us: i64) {
        self.size = size.min(self.data.len());
        self.presentation_time_us = presentation_time_us;
    }

    pub fn set_flag(&mut self, flag: BufferFlag) {
        self.flag = flag;
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn presentation_time_us(&self) -> i64 {
        self.presentation_time_us
    }

    pub fn flag(&self) -> BufferFlag {
        self.flag
    }
}

/// Outcome of asking an engine for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// The output buffer holds a unit of data.
    Filled,
    /// The output buffer holds the terminal unit (possibly empty).
    EndOfStream,
    /// Nothing to emit until more input is sent. The buffer is untouched.
    NotEnoughData,
}

/// Contract implemented by every codec engine.
pub trait CodecEngine: Send {
    /// Registered name (MIME type) of the engine.
    fn name(&self) -> &str;

    /// Prepare the engine for `format`. Called once per configure.
    fn init(&mut self, format: &Format) -> Result<()>;

    /// Apply run-time parameters.
    fn set_parameter(&mut self, format: &Format) -> Result<()>;

    /// Accept one unit of input.
    fn send_data(&mut self, input: &InputBuffer<'_>) -> Result<()>;

    /// Produce one unit of output into `output`.
    fn receive_data(&mut self, output: &mut OutputBuffer<'_>) -> Result<ReceiveStatus>;

    /// Drop all pending input and output, keeping the configuration.
    fn flush(&mut self) -> Result<()>;

    /// Return to the freshly-constructed state.
    fn reset(&mut self) -> Result<()>;

    /// Free engine resources. No other call follows.
    fn release(&mut self) -> Result<()>;

    /// Current output format.
    fn output_format(&self) -> Format;

    /// Minimum capacity of an input slot in bytes.
    fn input_buffer_size(&self) -> usize;

    /// Minimum capacity of an output slot in bytes.
    fn output_buffer_size(&self) -> usize;

    /// Whether the first output unit is in-band codec configuration.
    fn emits_codec_data(&self) -> bool {
        false
    }
}

/// Engine constructor stored in an [`EngineRegistry`].
pub type EngineConstructor = Arc<dyn Fn() -> Box<dyn CodecEngine> + Send + Sync>;

/// Maps codec names (MIME types) to engine constructors.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    constructors: Arc<RwLock<BTreeMap<String, EngineConstructor>>>,
}

impl EngineRegistry {
    /// Registry without any engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the engines compiled into this crate.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        crate::engines::register_builtin(&registry);
        registry
    }

    /// Register `constructor` under `name`, replacing any previous entry.
    pub fn register<F>(&self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn CodecEngine> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(engine = %name, "Registering codec engine");
        self.constructors
            .write()
            .insert(name, Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.read().contains_key(name)
    }

    /// Names of all registered engines, sorted.
    pub fn names(&self) -> Vec<String> {
        self.constructors.read().keys().cloned().collect()
    }

    /// Construct the engine registered under `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn CodecEngine>> {
        let constructor = self
            .constructors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CodecError::Unsupported(name.to_string()))?;
        Ok(constructor())
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.names())
            .finish()
    }
}
