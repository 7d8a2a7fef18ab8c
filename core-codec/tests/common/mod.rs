//! Shared fixtures for the codec integration tests.

#![allow(dead_code)]

use core_codec::{
    keys, BufferFlag, BufferInfo, CodecAdapter, CodecCallback, CodecConfig, CodecEngine,
    CodecError, EngineRegistry, ErrorType, Format, InputBuffer, OutputBuffer, ReceiveStatus,
    Result, SharedMemory,
};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const FAKE_MIME: &str = "audio/x-fake";
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    core_runtime::init_test_logging();
}

// ============================================================================
// Recording Callback
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Error(ErrorType, i32),
    FormatChanged(Format),
    InputAvailable(u32),
    OutputAvailable {
        index: u32,
        info: BufferInfo,
        flag: BufferFlag,
        data: Vec<u8>,
    },
}

/// Callback that records every notification in arrival order.
#[derive(Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<Event>>,
    changed: Condvar,
    inputs: Mutex<HashMap<u32, Arc<SharedMemory>>>,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
        self.changed.notify_all();
    }

    /// Wait until `pred` holds for the recorded events.
    pub fn wait_for(&self, pred: impl Fn(&[Event]) -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        let mut events = self.events.lock();
        while !pred(&events) {
            if self.changed.wait_until(&mut events, deadline).timed_out() {
                return pred(&events);
            }
        }
        true
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn granted(&self) -> Vec<u32> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::InputAvailable(index) => Some(*index),
                _ => None,
            })
            .collect()
    }

    pub fn outputs(&self) -> Vec<(u32, BufferInfo, BufferFlag, Vec<u8>)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::OutputAvailable {
                    index,
                    info,
                    flag,
                    data,
                } => Some((*index, *info, *flag, data.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(ErrorType, i32)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Error(kind, code) => Some((*kind, *code)),
                _ => None,
            })
            .collect()
    }

    pub fn wait_granted(&self, count: usize) -> bool {
        self.wait_for(|events| count_inputs(events) >= count)
    }

    pub fn wait_outputs(&self, count: usize) -> bool {
        self.wait_for(|events| count_outputs(events) >= count)
    }

    /// Payload of the most recent grant of input slot `index`.
    pub fn input_buffer(&self, index: u32) -> Arc<SharedMemory> {
        self.inputs
            .lock()
            .get(&index)
            .cloned()
            .unwrap_or_else(|| panic!("input slot {} was never granted", index))
    }
}

pub fn count_inputs(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, Event::InputAvailable(_)))
        .count()
}

pub fn count_outputs(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, Event::OutputAvailable { .. }))
        .count()
}

impl CodecCallback for RecordingCallback {
    fn on_error(&self, error_type: ErrorType, error_code: i32) {
        self.push(Event::Error(error_type, error_code));
    }

    fn on_output_format_changed(&self, format: &Format) {
        self.push(Event::FormatChanged(format.clone()));
    }

    fn on_input_buffer_available(&self, index: u32, buffer: Arc<SharedMemory>) {
        self.inputs.lock().insert(index, buffer);
        self.push(Event::InputAvailable(index));
    }

    fn on_output_buffer_available(
        &self,
        index: u32,
        info: BufferInfo,
        flag: BufferFlag,
        buffer: Arc<SharedMemory>,
    ) {
        let data = buffer
            .read(info.offset as usize, info.size as usize)
            .map(|bytes| bytes.to_vec())
            .unwrap_or_default();
        self.push(Event::OutputAvailable {
            index,
            info,
            flag,
            data,
        });
    }
}

// ============================================================================
// Fake Engine
// ============================================================================

/// Knobs and observations shared between a test and its [`FakeEngine`].
#[derive(Debug, Default)]
pub struct FakeControl {
    /// Every accepted input, in arrival order: (payload, pts, flag).
    pub sent: Vec<(Vec<u8>, i64, BufferFlag)>,
    /// Reject the input carrying this timestamp with an engine error.
    pub fail_on_pts: Option<i64>,
    /// Make `flush` fail.
    pub fail_flush: bool,
    /// Make `init` fail.
    pub fail_init: bool,
    /// Report the first output as codec configuration data.
    pub codec_data: bool,
    /// Switch the output sample rate after this many inputs.
    pub change_rate_after: Option<(usize, i32)>,
    pub flushes: usize,
    pub resets: usize,
    pub releases: usize,
}

pub type Control = Arc<Mutex<FakeControl>>;

/// Engine that echoes each input as one output unit, reversing nothing.
pub struct FakeEngine {
    control: Control,
    format: Format,
    pending: VecDeque<(Vec<u8>, i64)>,
    eos: Option<i64>,
}

pub const FAKE_ERROR: i32 = 7;

impl FakeEngine {
    pub fn new(control: Control) -> Self {
        Self {
            control,
            format: Format::new(),
            pending: VecDeque::new(),
            eos: None,
        }
    }
}

impl CodecEngine for FakeEngine {
    fn name(&self) -> &str {
        FAKE_MIME
    }

    fn init(&mut self, format: &Format) -> Result<()> {
        if self.control.lock().fail_init {
            return Err(CodecError::engine(1, "init refused"));
        }
        self.format = format.clone();
        self.format.put_string(keys::MIME, "audio/raw");
        Ok(())
    }

    fn set_parameter(&mut self, format: &Format) -> Result<()> {
        self.format.merge(format);
        Ok(())
    }

    fn send_data(&mut self, input: &InputBuffer<'_>) -> Result<()> {
        let mut control = self.control.lock();
        if control.fail_on_pts == Some(input.presentation_time_us) && !input.is_eos() {
            return Err(CodecError::engine(FAKE_ERROR, "corrupt frame"));
        }
        control
            .sent
            .push((input.data.to_vec(), input.presentation_time_us, input.flag));
        if let Some((after, rate)) = control.change_rate_after {
            if control.sent.len() > after {
                self.format.put_int(keys::SAMPLE_RATE, rate);
            }
        }
        if !input.data.is_empty() {
            self.pending
                .push_back((input.data.to_vec(), input.presentation_time_us));
        }
        if input.is_eos() {
            self.eos = Some(input.presentation_time_us);
        }
        Ok(())
    }

    fn receive_data(&mut self, output: &mut OutputBuffer<'_>) -> Result<ReceiveStatus> {
        if let Some((data, pts)) = self.pending.pop_front() {
            output.fill(&data, pts);
            return Ok(ReceiveStatus::Filled);
        }
        match self.eos.take() {
            Some(pts) => {
                output.set_filled(0, pts);
                Ok(ReceiveStatus::EndOfStream)
            }
            None => Ok(ReceiveStatus::NotEnoughData),
        }
    }

    fn flush(&mut self) -> Result<()> {
        let mut control = self.control.lock();
        control.flushes += 1;
        self.pending.clear();
        self.eos = None;
        if control.fail_flush {
            return Err(CodecError::engine(2, "flush refused"));
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.control.lock().resets += 1;
        self.pending.clear();
        self.eos = None;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.control.lock().releases += 1;
        self.pending.clear();
        Ok(())
    }

    fn output_format(&self) -> Format {
        self.format.clone()
    }

    fn input_buffer_size(&self) -> usize {
        256
    }

    fn output_buffer_size(&self) -> usize {
        256
    }

    fn emits_codec_data(&self) -> bool {
        self.control.lock().codec_data
    }
}

/// Registry holding only the fake engine, wired to `control`.
pub fn fake_registry(control: &Control) -> EngineRegistry {
    let registry = EngineRegistry::new();
    let control = control.clone();
    registry.register(FAKE_MIME, move || {
        Box::new(FakeEngine::new(control.clone())) as Box<dyn CodecEngine>
    });
    registry
}

pub fn test_config(input: usize, output: usize) -> CodecConfig {
    CodecConfig::default()
        .with_buffer_counts(input, output)
        .with_join_timeout(Some(Duration::from_secs(2)))
}

/// Fake-engine adapter with the callback set, configured for stereo 44.1 kHz.
pub fn fake_adapter(
    control: &Control,
    callback: &Arc<RecordingCallback>,
    input: usize,
    output: usize,
) -> CodecAdapter {
    let codec = CodecAdapter::with_config(FAKE_MIME, fake_registry(control), test_config(input, output));
    codec.set_callback(callback.clone()).unwrap();
    codec.configure(&Format::audio(2, 44100)).unwrap();
    codec
}

/// Write `data` into granted input slot `index` and queue it.
pub fn submit(
    codec: &CodecAdapter,
    callback: &RecordingCallback,
    index: u32,
    data: &[u8],
    pts: i64,
    flag: BufferFlag,
) -> Result<()> {
    callback.input_buffer(index).write(0, data)?;
    codec.queue_input_buffer(index, BufferInfo::new(pts, data.len() as i32, 0), flag)
}
