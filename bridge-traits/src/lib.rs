//! # Host Bridge Traits
//!
//! Contracts the host platform implements for the codec core.
//!
//! ## Overview
//!
//! The core never talks to platform services directly. Whatever it needs from
//! the host is expressed as a trait here and injected at startup.
//!
//! ## Traits
//!
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should convert platform-specific errors to `BridgeError`
//! and keep messages actionable.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`: they are called from codec
//! pipeline threads as well as from the client's threads.

pub mod error;
pub mod logging;

pub use error::BridgeError;
pub use logging::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
