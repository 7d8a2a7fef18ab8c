//! # Codec Lifecycle State
//!
//! The state is stored in an atomic so callback and worker threads can read it
//! without taking the adapter's lifecycle lock. Only the thread executing a
//! public lifecycle call writes it.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a codec adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CodecState {
    Released = 0,
    Initializing = 1,
    Initialized = 2,
    Starting = 3,
    Running = 4,
    Flushing = 5,
    Flushed = 6,
    Stopping = 7,
    Resuming = 8,
    Releasing = 9,
}

impl CodecState {
    /// All states, in declaration order.
    pub const ALL: [CodecState; 10] = [
        CodecState::Released,
        CodecState::Initializing,
        CodecState::Initialized,
        CodecState::Starting,
        CodecState::Running,
        CodecState::Flushing,
        CodecState::Flushed,
        CodecState::Stopping,
        CodecState::Resuming,
        CodecState::Releasing,
    ];

    fn from_u8(value: u8) -> Self {
        match value {
            0 => CodecState::Released,
            1 => CodecState::Initializing,
            2 => CodecState::Initialized,
            3 => CodecState::Starting,
            4 => CodecState::Running,
            5 => CodecState::Flushing,
            6 => CodecState::Flushed,
            7 => CodecState::Stopping,
            8 => CodecState::Resuming,
            _ => CodecState::Releasing,
        }
    }

    /// Returns `true` for the states a lifecycle call leaves the codec in.
    pub fn is_resting(&self) -> bool {
        matches!(
            self,
            CodecState::Released
                | CodecState::Initialized
                | CodecState::Running
                | CodecState::Flushed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CodecState::Released => "RELEASED",
            CodecState::Initializing => "INITIALIZING",
            CodecState::Initialized => "INITIALIZED",
            CodecState::Starting => "STARTING",
            CodecState::Running => "RUNNING",
            CodecState::Flushing => "FLUSHING",
            CodecState::Flushed => "FLUSHED",
            CodecState::Stopping => "STOPPING",
            CodecState::Resuming => "RESUMING",
            CodecState::Releasing => "RELEASING",
        }
    }
}

impl fmt::Display for CodecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic cell holding a [`CodecState`].
#[derive(Debug)]
pub struct AtomicCodecState {
    inner: AtomicU8,
}

impl AtomicCodecState {
    pub fn new(state: CodecState) -> Self {
        Self {
            inner: AtomicU8::new(state as u8),
        }
    }

    pub fn load(&self) -> CodecState {
        CodecState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn store(&self, state: CodecState) {
        self.inner.store(state as u8, Ordering::Release);
    }
}

impl Default for AtomicCodecState {
    fn default() -> Self {
        Self::new(CodecState::Released)
    }
}
