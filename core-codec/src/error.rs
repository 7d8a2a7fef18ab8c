//! # Codec Error Types
//!
//! Error taxonomy surfaced at the codec service boundary.
//!
//! Synchronous calls return a [`CodecError`]; failures that happen on a worker
//! thread are reported through
//! [`CodecCallback::on_error`](crate::callback::CodecCallback::on_error) as an
//! ([`ErrorType`], [`ErrorCode`]) pair instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Numeric service error codes.
///
/// The discriminants are part of the wire contract with clients and must not be
/// renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    /// Success. Never carried by a [`CodecError`].
    Ok = 0,
    /// Allocation of a buffer or engine failed.
    NoMemory = 1,
    /// Invalid argument (index, size, offset, parameter value).
    InvalidVal = 3,
    /// Unexpected condition, including ownership violations on buffer slots.
    Unknown = 6,
    /// Operation is not allowed in the current codec state.
    InvalidState = 8,
    /// No engine is available for the requested codec.
    Unsupported = 9,
    /// Mandatory channel count is missing or invalid in the configure format.
    ConfigureMismatchChannelCount = 21,
    /// Mandatory sample rate is missing or invalid in the configure format.
    MismatchSampleRate = 23,
    /// First code of the range reserved for engine-specific errors.
    ExtendStart = 0x10000,
}

impl ErrorCode {
    /// Raw integer value of the code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Ok => "AVCS_ERR_OK",
            ErrorCode::NoMemory => "AVCS_ERR_NO_MEMORY",
            ErrorCode::InvalidVal => "AVCS_ERR_INVALID_VAL",
            ErrorCode::Unknown => "AVCS_ERR_UNKNOWN",
            ErrorCode::InvalidState => "AVCS_ERR_INVALID_STATE",
            ErrorCode::Unsupported => "AVCS_ERR_UNSUPPORT",
            ErrorCode::ConfigureMismatchChannelCount => {
                "AVCS_ERR_CONFIGURE_MISMATCH_CHANNEL_COUNT"
            }
            ErrorCode::MismatchSampleRate => "AVCS_ERR_MISMATCH_SAMPLE_RATE",
            ErrorCode::ExtendStart => "AVCS_ERR_EXTEND_START",
        };
        write!(f, "{}({})", name, self.as_i32())
    }
}

/// Category reported alongside an error code in asynchronous notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    /// Error raised by the codec service itself.
    Internal,
    /// Error raised by an engine/plugin; the code lies in the extension range.
    Extension,
}

/// Errors returned by codec operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    // ========================================================================
    // Usage Errors
    // ========================================================================
    /// Operation is not allowed in the current state.
    #[error("Operation not allowed in state {0}")]
    InvalidState(String),

    /// An argument failed validation.
    #[error("Invalid value: {0}")]
    InvalidVal(String),

    /// A buffer slot was not in the state the operation requires.
    #[error("Unexpected buffer state: {0}")]
    Unknown(String),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// The configure format lacks a usable channel count.
    #[error("Configure format has no valid channel count")]
    ConfigureMismatchChannelCount,

    /// The configure format lacks a usable sample rate.
    #[error("Configure format has no valid sample rate")]
    MismatchSampleRate,

    /// No engine is registered under the requested name.
    #[error("Unsupported codec: {0}")]
    Unsupported(String),

    // ========================================================================
    // Resource / Engine Errors
    // ========================================================================
    /// Memory for buffers or engine state could not be obtained.
    #[error("Out of memory: {0}")]
    NoMemory(String),

    /// Engine-specific failure. `code` is relative to [`ErrorCode::ExtendStart`].
    #[error("Engine error {code}: {message}")]
    Engine { code: i32, message: String },

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CodecError {
    /// Shorthand for an engine failure with an extension code.
    pub fn engine(code: i32, message: impl Into<String>) -> Self {
        CodecError::Engine {
            code,
            message: message.into(),
        }
    }

    /// Service error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            CodecError::InvalidState(_) => ErrorCode::InvalidState,
            CodecError::InvalidVal(_) => ErrorCode::InvalidVal,
            CodecError::Unknown(_) | CodecError::Internal(_) => ErrorCode::Unknown,
            CodecError::ConfigureMismatchChannelCount => ErrorCode::ConfigureMismatchChannelCount,
            CodecError::MismatchSampleRate => ErrorCode::MismatchSampleRate,
            CodecError::Unsupported(_) => ErrorCode::Unsupported,
            CodecError::NoMemory(_) => ErrorCode::NoMemory,
            CodecError::Engine { .. } => ErrorCode::ExtendStart,
        }
    }

    /// Raw integer reported to clients. Engine errors are offset into the
    /// extension range.
    pub fn raw_code(&self) -> i32 {
        match self {
            CodecError::Engine { code, .. } => {
                ErrorCode::ExtendStart.as_i32().saturating_add(*code)
            }
            other => other.code().as_i32(),
        }
    }

    /// Category used when this error is reported asynchronously.
    pub fn error_type(&self) -> ErrorType {
        match self {
            CodecError::Engine { .. } => ErrorType::Extension,
            _ => ErrorType::Internal,
        }
    }
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
