//! Workspace facade crate.
//!
//! Re-exports the codec core so host applications can depend on
//! `avcodec-workspace` and pick features here instead of wiring each
//! workspace crate individually.
//!
//! ## Features
//!
//! - `software-decoders` (default): Symphonia-backed decoding engines
//! - `runtime` (default): logging setup and host log forwarding

pub use core_codec::*;

#[cfg(feature = "runtime")]
pub use core_runtime as runtime;
