//! # Codec Configuration
//!
//! Pool sizing and worker-thread settings for a codec adapter.

use crate::error::{CodecError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Codec worker configuration.
///
/// Controls how many buffers each pool holds, the minimum slot capacity, and
/// how the two pipeline threads are named and joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Number of input slots.
    ///
    /// Default: 8.
    #[serde(default = "default_input_buffer_count")]
    pub input_buffer_count: usize,

    /// Number of output slots.
    ///
    /// Default: 8.
    #[serde(default = "default_output_buffer_count")]
    pub output_buffer_count: usize,

    /// Floor applied to the engine-reported input slot capacity, in bytes.
    ///
    /// Default: 4 KB.
    #[serde(default = "default_min_buffer_size")]
    pub min_input_buffer_size: usize,

    /// Floor applied to the engine-reported output slot capacity, in bytes.
    ///
    /// Default: 4 KB.
    #[serde(default = "default_min_buffer_size")]
    pub min_output_buffer_size: usize,

    /// Name of the input pipeline thread.
    #[serde(default = "default_input_thread_name")]
    pub input_thread_name: String,

    /// Name of the output pipeline thread.
    #[serde(default = "default_output_thread_name")]
    pub output_thread_name: String,

    /// Longest time `stop`/`flush`/`release` wait for a pipeline thread to exit.
    ///
    /// When it expires the thread is detached with a warning; the pools it
    /// still references stay alive until it exits. `None` waits forever.
    ///
    /// Default: 5 seconds.
    #[serde(default = "default_join_timeout")]
    pub join_timeout: Option<Duration>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            input_buffer_count: default_input_buffer_count(),
            output_buffer_count: default_output_buffer_count(),
            min_input_buffer_size: default_min_buffer_size(),
            min_output_buffer_size: default_min_buffer_size(),
            input_thread_name: default_input_thread_name(),
            output_thread_name: default_output_thread_name(),
            join_timeout: default_join_timeout(),
        }
    }
}

impl CodecConfig {
    /// Fewer, smaller buffers for interactive use.
    pub fn low_latency() -> Self {
        Self {
            input_buffer_count: 2,
            output_buffer_count: 2,
            min_input_buffer_size: 1024,
            min_output_buffer_size: 1024,
            ..Default::default()
        }
    }

    /// More, larger buffers for offline transcoding.
    pub fn high_throughput() -> Self {
        Self {
            input_buffer_count: 16,
            output_buffer_count: 16,
            min_input_buffer_size: 64 * 1024,
            min_output_buffer_size: 64 * 1024,
            ..Default::default()
        }
    }

    pub fn with_buffer_counts(mut self, input: usize, output: usize) -> Self {
        self.input_buffer_count = input;
        self.output_buffer_count = output;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.input_buffer_count == 0 {
            return Err(CodecError::InvalidVal(
                "input_buffer_count must be > 0".to_string(),
            ));
        }

        if self.output_buffer_count == 0 {
            return Err(CodecError::InvalidVal(
                "output_buffer_count must be > 0".to_string(),
            ));
        }

        if self.min_input_buffer_size == 0 || self.min_output_buffer_size == 0 {
            return Err(CodecError::InvalidVal(
                "minimum buffer sizes must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Input slot capacity for an engine that asks for `engine_size` bytes.
    pub fn input_capacity(&self, engine_size: usize) -> usize {
        engine_size.max(self.min_input_buffer_size)
    }

    /// Output slot capacity for an engine that asks for `engine_size` bytes.
    pub fn output_capacity(&self, engine_size: usize) -> usize {
        engine_size.max(self.min_output_buffer_size)
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_input_buffer_count() -> usize {
    8
}

fn default_output_buffer_count() -> usize {
    8
}

fn default_min_buffer_size() -> usize {
    4096
}

fn default_input_thread_name() -> String {
    "codec-input".to_string()
}

fn default_output_thread_name() -> String {
    "codec-output".to_string()
}

fn default_join_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}
