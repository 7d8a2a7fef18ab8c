//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the codec service:
//! - Logging and tracing infrastructure
//! - Host log forwarding through `bridge_traits::LoggerSink`
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the codec crates depend on. It
//! establishes the logging conventions used by the adapter and by the codec
//! pipeline threads.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::{init_logging, init_test_logging, LogFormat, LoggingConfig};
