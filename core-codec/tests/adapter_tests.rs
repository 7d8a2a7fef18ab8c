//! Lifecycle tests for `CodecAdapter`.

mod common;

use common::*;
use core_codec::{
    keys, BufferFlag, BufferInfo, CodecAdapter, CodecCallback, CodecError, CodecState, ErrorCode,
    ErrorType, Format, SharedMemory,
};
use mockall::mock;
use mockall::predicate::eq;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

mock! {
    Callback {}

    impl CodecCallback for Callback {
        fn on_error(&self, error_type: ErrorType, error_code: i32);
        fn on_output_format_changed(&self, format: &Format);
        fn on_input_buffer_available(&self, index: u32, buffer: Arc<SharedMemory>);
        fn on_output_buffer_available(
            &self,
            index: u32,
            info: BufferInfo,
            flag: BufferFlag,
            buffer: Arc<SharedMemory>,
        );
    }
}

fn pcm_adapter(callback: &Arc<RecordingCallback>) -> CodecAdapter {
    init_logging();
    let codec = CodecAdapter::new("audio/raw");
    codec.set_callback(callback.clone()).unwrap();
    codec
}

fn stereo() -> Format {
    Format::audio(2, 44100)
}

/// Drive a fresh fake-engine adapter into `target`.
fn adapter_in(target: CodecState, control: &Control) -> (CodecAdapter, Arc<RecordingCallback>) {
    init_logging();
    let callback = RecordingCallback::new();
    let codec = CodecAdapter::with_config(FAKE_MIME, fake_registry(control), test_config(2, 2));
    codec.set_callback(callback.clone()).unwrap();
    if target == CodecState::Released {
        return (codec, callback);
    }
    codec.configure(&stereo()).unwrap();
    if target == CodecState::Initialized {
        return (codec, callback);
    }
    codec.start().unwrap();
    if target == CodecState::Running {
        return (codec, callback);
    }
    codec.flush().unwrap();
    assert_eq!(target, CodecState::Flushed);
    (codec, callback)
}

fn assert_invalid_state(result: core_codec::Result<()>, operation: &str, state: CodecState) {
    match result {
        Err(CodecError::InvalidState(_)) => {}
        other => panic!("{} in {} returned {:?}", operation, state, other),
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_configure_without_sample_rate() {
    init_logging();
    let codec = CodecAdapter::new("audio/raw");
    let mut format = Format::new();
    format.put_int(keys::CHANNEL_COUNT, 2);

    let err = codec.configure(&format).unwrap_err();
    assert_eq!(err, CodecError::MismatchSampleRate);
    assert_eq!(err.raw_code(), ErrorCode::MismatchSampleRate.as_i32());
    assert_eq!(codec.state(), CodecState::Released);
}

#[test]
fn test_queue_granted_slot_leaves_client() {
    let callback = RecordingCallback::new();
    let codec = pcm_adapter(&callback);
    codec.configure(&stereo()).unwrap();
    codec.start().unwrap();
    assert!(callback.wait_granted(1));

    let payload = vec![0x5a; 100];
    assert!(submit(&codec, &callback, 0, &payload, 0, BufferFlag::NONE).is_ok());

    // Slot 0 comes back to the client only after the engine consumed it
    assert!(callback.wait_for(|events| {
        events
            .iter()
            .filter(|e| matches!(e, Event::InputAvailable(0)))
            .count()
            == 2
    }));
    assert!(callback.wait_outputs(1));
    let (_, info, _, data) = callback.outputs().remove(0);
    assert_eq!(info.size, 100);
    assert_eq!(data, payload);

    codec.release().unwrap();
}

#[test]
fn test_double_queue_rejected() {
    let control = Control::default();
    let (codec, callback) = adapter_in(CodecState::Running, &control);
    assert!(callback.wait_granted(1));

    // Hold the engine so the first submission stays in transfer
    let held = control.lock();
    submit(&codec, &callback, 0, &[1, 2, 3], 0, BufferFlag::NONE).unwrap();
    let err = codec
        .queue_input_buffer(0, BufferInfo::new(0, 3, 0), BufferFlag::NONE)
        .unwrap_err();
    drop(held);

    assert!(matches!(err, CodecError::Unknown(ref msg) if msg.contains("already QueueInputBuffer")));
    assert_eq!(err.raw_code(), ErrorCode::Unknown.as_i32());
    codec.release().unwrap();
}

#[test]
fn test_stop_when_initialized_is_noop() {
    let control = Control::default();
    let (codec, _callback) = adapter_in(CodecState::Initialized, &control);

    assert!(codec.stop().is_ok());
    assert_eq!(codec.state(), CodecState::Initialized);
    assert_eq!(codec.session_id(), None);
    assert_eq!(control.lock().flushes, 0);
}

#[test]
fn test_flush_when_not_running_reports_error() {
    init_logging();
    let mut callback = MockCallback::new();
    callback
        .expect_on_error()
        .with(eq(ErrorType::Internal), eq(ErrorCode::InvalidState.as_i32()))
        .times(1)
        .return_const(());

    let codec = CodecAdapter::new("audio/raw");
    codec.set_callback(Arc::new(callback)).unwrap();
    codec.configure(&stereo()).unwrap();

    assert!(matches!(codec.flush(), Err(CodecError::InvalidState(_))));
    assert_eq!(codec.state(), CodecState::Initialized);

    // Dropping the callback verifies the expectation
    codec.release().unwrap();
}

/// Releases the codec from inside `on_error`.
#[derive(Default)]
struct ReleaseOnError {
    codec: Mutex<Weak<CodecAdapter>>,
    released: Mutex<Option<core_codec::Result<()>>>,
}

impl CodecCallback for ReleaseOnError {
    fn on_error(&self, _error_type: ErrorType, _error_code: i32) {
        let codec = self.codec.lock().upgrade();
        if let Some(codec) = codec {
            *self.released.lock() = Some(codec.release());
        }
    }

    fn on_output_format_changed(&self, _format: &Format) {}

    fn on_input_buffer_available(&self, _index: u32, _buffer: Arc<SharedMemory>) {}

    fn on_output_buffer_available(
        &self,
        _index: u32,
        _info: BufferInfo,
        _flag: BufferFlag,
        _buffer: Arc<SharedMemory>,
    ) {
    }
}

#[test]
fn test_release_from_on_error() {
    init_logging();
    let control = Control::default();
    let codec = Arc::new(CodecAdapter::with_config(
        FAKE_MIME,
        fake_registry(&control),
        test_config(2, 2),
    ));
    let callback = Arc::new(ReleaseOnError::default());
    *callback.codec.lock() = Arc::downgrade(&codec);
    codec.set_callback(callback.clone()).unwrap();
    codec.configure(&stereo()).unwrap();

    let flushing = {
        let codec = codec.clone();
        thread::spawn(move || codec.flush())
    };
    let deadline = Instant::now() + WAIT;
    while !flushing.is_finished() {
        assert!(Instant::now() < deadline, "flush did not return");
        thread::sleep(Duration::from_millis(5));
    }

    assert!(matches!(
        flushing.join().unwrap(),
        Err(CodecError::InvalidState(_))
    ));
    assert!(matches!(*callback.released.lock(), Some(Ok(()))));
    assert_eq!(codec.state(), CodecState::Released);
    assert_eq!(control.lock().releases, 1);
}

// ============================================================================
// State Guards
// ============================================================================

#[test]
fn test_operations_rejected_outside_allowed_states() {
    let reachable = [
        CodecState::Released,
        CodecState::Initialized,
        CodecState::Running,
        CodecState::Flushed,
    ];

    for state in reachable {
        let control = Control::default();
        let (codec, callback) = adapter_in(state, &control);
        let check = |name: &str, result: core_codec::Result<()>| {
            assert_invalid_state(result, name, state);
            assert_eq!(codec.state(), state, "{} changed state {}", name, state);
        };

        if !matches!(
            state,
            CodecState::Released | CodecState::Initialized | CodecState::Initializing
        ) {
            check("set_callback", codec.set_callback(callback.clone()));
        }
        if state != CodecState::Released {
            check("configure", codec.configure(&stereo()));
        }
        if !matches!(state, CodecState::Initialized | CodecState::Flushed) {
            check("start", codec.start());
        }
        if state != CodecState::Running {
            check("flush", codec.flush());
            check(
                "queue_input_buffer",
                codec.queue_input_buffer(0, BufferInfo::new(0, 1, 0), BufferFlag::NONE),
            );
            check("release_output_buffer", codec.release_output_buffer(0));
            check("notify_eos", codec.notify_eos());
        }
        if state == CodecState::Released {
            check("set_parameter", codec.set_parameter(&Format::new()));
        }

        codec.release().unwrap();
    }
}

#[test]
fn test_configure_failures_end_released() {
    init_logging();

    // Missing channel count wins over missing sample rate
    let codec = CodecAdapter::new("audio/raw");
    assert_eq!(
        codec.configure(&Format::new()),
        Err(CodecError::ConfigureMismatchChannelCount)
    );
    assert_eq!(codec.state(), CodecState::Released);

    // Engine init failure
    let control = Control::default();
    control.lock().fail_init = true;
    let codec = CodecAdapter::with_registry(FAKE_MIME, fake_registry(&control));
    let err = codec.configure(&stereo()).unwrap_err();
    assert!(matches!(err, CodecError::Engine { code: 1, .. }));
    assert_eq!(codec.state(), CodecState::Released);
    assert_eq!(control.lock().releases, 1);
    assert!(codec.get_output_format().is_err());

    // Engine rejects the sample format
    let codec = CodecAdapter::new("audio/raw");
    let mut format = stereo();
    format.put_string(keys::AUDIO_SAMPLE_FORMAT, "s12be");
    assert!(matches!(
        codec.configure(&format),
        Err(CodecError::Unsupported(_))
    ));
    assert_eq!(codec.state(), CodecState::Released);

    // The same instance can be configured again after fixing the format
    format.put_string(keys::AUDIO_SAMPLE_FORMAT, "f32le");
    assert!(codec.configure(&format).is_ok());
    assert_eq!(codec.state(), CodecState::Initialized);
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn test_release_is_complete_and_idempotent() {
    let control = Control::default();
    let (codec, callback) = adapter_in(CodecState::Running, &control);
    assert!(callback.wait_granted(2));
    assert!(codec.is_worker_running());

    assert!(codec.release().is_ok());
    assert_eq!(codec.state(), CodecState::Released);
    assert!(!codec.is_worker_running());
    assert_eq!(codec.session_id(), None);
    assert_eq!(codec.pool_ids(), None);
    assert_eq!(control.lock().releases, 1);

    assert!(codec.release().is_ok());
    assert_eq!(codec.state(), CodecState::Released);
    assert_eq!(control.lock().releases, 1);

    // The callback was dropped with everything else
    assert!(matches!(codec.start(), Err(CodecError::InvalidState(_))));
    codec.configure(&stereo()).unwrap();
    assert!(matches!(codec.start(), Err(CodecError::InvalidState(_))));
}

#[test]
fn test_release_with_outstanding_output() {
    let control = Control::default();
    let (codec, callback) = adapter_in(CodecState::Running, &control);
    assert!(callback.wait_granted(2));

    submit(&codec, &callback, 0, &[9; 16], 0, BufferFlag::NONE).unwrap();
    assert!(callback.wait_outputs(1));

    // Output slot 0 is still held by the client
    assert!(codec.release().is_ok());
    assert!(!codec.is_worker_running());
    assert!(matches!(
        codec.release_output_buffer(0),
        Err(CodecError::InvalidState(_))
    ));
}

#[test]
fn test_reset_keeps_callback() {
    let control = Control::default();
    let (codec, callback) = adapter_in(CodecState::Running, &control);
    assert!(callback.wait_granted(2));

    assert!(codec.reset().is_ok());
    assert_eq!(codec.state(), CodecState::Released);
    assert!(!codec.is_worker_running());
    {
        let control = control.lock();
        assert_eq!(control.resets, 1);
        assert_eq!(control.releases, 1);
    }
    assert!(codec.reset().is_ok());
    // Nothing left to reset the second time
    assert_eq!(control.lock().resets, 1);

    codec.configure(&stereo()).unwrap();
    callback.clear();
    codec.start().unwrap();
    assert!(callback.wait_granted(2));
    codec.release().unwrap();
}

#[test]
fn test_stop_then_start_creates_new_worker() {
    let control = Control::default();
    let (codec, callback) = adapter_in(CodecState::Running, &control);
    assert!(callback.wait_granted(2));
    let session = codec.session_id().unwrap();
    let pools = codec.pool_ids().unwrap();

    codec.stop().unwrap();
    assert_eq!(codec.state(), CodecState::Initialized);
    assert_eq!(codec.session_id(), None);
    assert_eq!(control.lock().flushes, 1);
    // Engine survives stop
    assert!(codec.get_output_format().is_ok());

    codec.start().unwrap();
    assert_ne!(codec.session_id(), Some(session));
    let new_pools = codec.pool_ids().unwrap();
    assert_ne!(new_pools.0, pools.0);
    assert_ne!(new_pools.1, pools.1);
    codec.release().unwrap();
}

#[test]
fn test_stop_from_flushed() {
    let control = Control::default();
    let (codec, _callback) = adapter_in(CodecState::Flushed, &control);
    assert!(codec.stop().is_ok());
    assert_eq!(codec.state(), CodecState::Initialized);
    assert!(!codec.is_worker_running());
}

// ============================================================================
// Flush / Resume
// ============================================================================

#[test]
fn test_flush_resume_keeps_worker_and_pools() {
    let control = Control::default();
    let (codec, callback) = adapter_in(CodecState::Running, &control);
    assert!(callback.wait_granted(2));
    let session = codec.session_id();
    let pools = codec.pool_ids();

    codec.flush().unwrap();
    assert_eq!(codec.state(), CodecState::Flushed);
    assert!(!codec.is_worker_running());
    assert_eq!(codec.session_id(), session);

    codec.start().unwrap();
    assert_eq!(codec.state(), CodecState::Running);
    assert!(codec.is_worker_running());
    assert_eq!(codec.session_id(), session);
    assert_eq!(codec.pool_ids(), pools);

    // Every input slot is granted again after the resume
    assert!(callback.wait_granted(4));
    codec.release().unwrap();
}

#[test]
fn test_flush_survives_engine_flush_failure() {
    let control = Control::default();
    let (codec, callback) = adapter_in(CodecState::Running, &control);
    assert!(callback.wait_granted(2));
    control.lock().fail_flush = true;

    assert!(codec.flush().is_ok());
    assert_eq!(codec.state(), CodecState::Flushed);
    assert_eq!(control.lock().flushes, 1);
    assert!(callback.errors().is_empty());
    codec.release().unwrap();
}

#[test]
fn test_set_parameter_reaches_engine() {
    let control = Control::default();
    let (codec, _callback) = adapter_in(CodecState::Running, &control);

    let mut update = Format::new();
    update.put_int(keys::BITRATE, 128_000);
    codec.set_parameter(&update).unwrap();
    assert_eq!(
        codec.get_output_format().unwrap().get_int(keys::BITRATE),
        Some(128_000)
    );
    codec.release().unwrap();
}
