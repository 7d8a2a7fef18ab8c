//! # Audio Codec Core
//!
//! Buffer lifecycle core of an audio codec service: the client-facing
//! adapter, the two-thread worker that moves buffers, and the engine contract
//! the actual transforms plug into.
//!
//! ## Overview
//!
//! This crate handles:
//! - A guarded lifecycle state machine ([`CodecAdapter`])
//! - Fixed-size input and output buffer pools with per-slot ownership tags
//! - Producer/consumer pipelines with independent locks ([`worker`])
//! - Engines selected by MIME type through an [`EngineRegistry`]
//! - Built-in PCM passthrough and, with `software-decoders`, Symphonia decoders
//!
//! ## Buffer Flow
//!
//! ```text
//!            on_input_buffer_available          send_data
//! client <-------------------------------- worker ---------> engine
//!        ------ queue_input_buffer ------->
//!
//!            on_output_buffer_available        receive_data
//! client <-------------------------------- worker <--------- engine
//!        ------ release_output_buffer ---->
//! ```

pub mod adapter;
pub mod buffer;
pub mod callback;
pub mod config;
pub mod engine;
pub mod engines;
pub mod error;
pub mod format;
pub mod state;
pub mod worker;

pub use adapter::CodecAdapter;
pub use buffer::{BufferFlag, BufferInfo, BufferPool, SharedMemory, SlotStatus};
pub use callback::CodecCallback;
pub use config::CodecConfig;
pub use engine::{CodecEngine, EngineRegistry, InputBuffer, OutputBuffer, ReceiveStatus};
pub use error::{CodecError, ErrorCode, ErrorType, Result};
pub use format::{keys, Format, FormatValue, SampleFormat};
pub use state::CodecState;
pub use worker::CodecWorker;
