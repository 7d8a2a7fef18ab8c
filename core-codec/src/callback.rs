//! # Client Callback
//!
//! Asynchronous notification sink registered with
//! [`CodecAdapter::set_callback`](crate::adapter::CodecAdapter::set_callback).
//!
//! Every method is invoked from a worker thread (or, for `on_error` raised by
//! a rejected `flush`, from the caller's thread). Implementations must not call
//! back into the adapter's lifecycle methods (`stop`, `flush`, `reset`,
//! `release`) from inside a notification: those join the very thread that is
//! delivering it. `queue_input_buffer` and `release_output_buffer` are safe.

use crate::buffer::{BufferFlag, BufferInfo, SharedMemory};
use crate::error::ErrorType;
use crate::format::Format;
use std::sync::Arc;

pub trait CodecCallback: Send + Sync {
    /// A failure happened where no caller could receive a return code.
    ///
    /// `error_code` is an [`ErrorCode`](crate::error::ErrorCode) value for
    /// [`ErrorType::Internal`] and lies in the extension range for
    /// [`ErrorType::Extension`].
    fn on_error(&self, error_type: ErrorType, error_code: i32);

    /// The engine's output format changed; applies to the next output buffer.
    fn on_output_format_changed(&self, format: &Format);

    /// Input slot `index` is owned by the client and may be filled.
    fn on_input_buffer_available(&self, index: u32, buffer: Arc<SharedMemory>);

    /// Output slot `index` holds data and is owned by the client until
    /// released.
    fn on_output_buffer_available(
        &self,
        index: u32,
        info: BufferInfo,
        flag: BufferFlag,
        buffer: Arc<SharedMemory>,
    );
}
