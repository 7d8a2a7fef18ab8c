//! # Codec Worker
//!
//! Moves buffers between the client and the codec engine on two dedicated
//! threads.
//!
//! ## Overview
//!
//! - **Input pipeline**: grants free input slots to the client, then feeds
//!   client-filled slots to the engine in the order they were queued
//! - **Output pipeline**: pulls produced units from the engine into free output
//!   slots and hands them to the client
//!
//! Each pipeline owns one mutex and one condition variable. A pipeline thread
//! sleeps on its own condvar and never holds its mutex while calling the engine
//! or the client callback. When both are needed the input mutex is taken
//! first.
//!
//! The input pipeline stops feeding client slots while the engine holds as
//! many undrained inputs as there are output slots, so a client that keeps its
//! output buffers stalls the input side instead of growing engine memory.
//!
//! ## Lifecycle
//!
//! ```text
//! new -> start -> (pause -> discard_pending -> start)* -> release
//! ```
//!
//! `pause` stops and joins both threads but keeps the pools; `release` also
//! reclaims every slot. Joins are bounded by
//! [`CodecConfig::join_timeout`](crate::config::CodecConfig::join_timeout).

use crate::buffer::{BufferFlag, BufferInfo, BufferPool, SlotStatus};
use crate::callback::CodecCallback;
use crate::config::CodecConfig;
use crate::engine::{CodecEngine, InputBuffer, OutputBuffer, ReceiveStatus};
use crate::error::{CodecError, Result};
use crate::format::Format;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, trace, warn};

/// Engine handle shared by the adapter and both pipelines.
pub type SharedEngine = Arc<Mutex<Box<dyn CodecEngine>>>;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Pipeline State
// ============================================================================

/// Work item for the input pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputJob {
    /// Client-filled slot to send to the engine.
    Slot(u32),
    /// End-of-stream marker queued behind earlier slots.
    Eos,
}

enum InputStep {
    Feed(u32),
    Eos(i64),
    Grant(u32),
}

#[derive(Debug, Default)]
struct InputQueues {
    /// Filled slots and markers, in client order.
    ready: VecDeque<InputJob>,
    /// Free slots waiting to be granted to the client.
    available: VecDeque<u32>,
    /// Timestamp of the last input sent, reused for a bare end-of-stream.
    last_pts: i64,
}

/// Work accounting between the two pipelines.
///
/// `sent` counts successful `send_data` calls. The output pipeline snapshots
/// it before asking the engine for output and records the snapshot in
/// `drained` once the engine has nothing more to give. Work is pending while
/// the two differ.
#[derive(Debug, Default)]
struct OutputProgress {
    sent: u64,
    drained: u64,
}

impl OutputProgress {
    fn has_work(&self) -> bool {
        self.sent != self.drained
    }

    fn in_flight(&self) -> u64 {
        self.sent.saturating_sub(self.drained)
    }
}

struct Shared {
    name: String,
    session_id: u64,
    engine: SharedEngine,
    callback: Arc<dyn CodecCallback>,
    input_pool: BufferPool,
    output_pool: BufferPool,
    input: Mutex<InputQueues>,
    input_cond: Condvar,
    output: Mutex<OutputProgress>,
    output_cond: Condvar,
    first_output: AtomicBool,
    last_format: Mutex<Option<Format>>,
}

impl Shared {
    fn wake_input(&self) {
        let _guard = self.input.lock();
        self.input_cond.notify_all();
    }

    fn wake_output(&self) {
        let _guard = self.output.lock();
        self.output_cond.notify_all();
    }

    /// Whether the head of `input.ready` may go to the engine now.
    ///
    /// Client slots wait while the engine holds as many unread inputs as
    /// there are output slots. End of stream is never held back.
    fn can_feed(&self, input: &InputQueues) -> bool {
        match input.ready.front() {
            Some(InputJob::Slot(_)) => {
                self.output.lock().in_flight() < self.output_pool.len() as u64
            }
            Some(InputJob::Eos) => true,
            None => false,
        }
    }

    fn report(&self, err: &CodecError) {
        error!(codec = %self.name, error = %err, "Codec worker error");
        self.callback.on_error(err.error_type(), err.raw_code());
    }
}

// ============================================================================
// Pipeline Threads
// ============================================================================

/// Set when a pipeline thread exits, panicking or not.
#[derive(Default)]
struct ExitLatch {
    done: Mutex<bool>,
    cond: Condvar,
}

struct ExitGuard(Arc<ExitLatch>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        *self.0.done.lock() = true;
        self.0.cond.notify_all();
    }
}

struct PipelineThread {
    name: String,
    handle: JoinHandle<()>,
    exited: Arc<ExitLatch>,
}

impl PipelineThread {
    fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let exited = Arc::new(ExitLatch::default());
        let guard = ExitGuard(exited.clone());
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _guard = guard;
                body();
            })
            .map_err(|e| {
                CodecError::Internal(format!("failed to spawn thread {}: {}", name, e))
            })?;

        Ok(Self {
            name: name.to_string(),
            handle,
            exited,
        })
    }

    /// Join the thread, waiting at most `timeout` for it to exit.
    ///
    /// Returns `false` if the thread was detached or panicked.
    fn join(self, timeout: Option<Duration>) -> bool {
        if self.handle.thread().id() == thread::current().id() {
            error!(thread = %self.name, "Pipeline thread cannot join itself, detaching");
            return false;
        }

        if let Some(timeout) = timeout {
            let deadline = Instant::now() + timeout;
            let mut done = self.exited.done.lock();
            while !*done {
                if self.exited.cond.wait_until(&mut done, deadline).timed_out() {
                    break;
                }
            }
            if !*done {
                warn!(
                    thread = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Pipeline thread did not exit in time, detaching"
                );
                return false;
            }
        }

        match self.handle.join() {
            Ok(()) => true,
            Err(_) => {
                error!(thread = %self.name, "Pipeline thread panicked");
                false
            }
        }
    }
}

struct Pipelines {
    running: Arc<AtomicBool>,
    input: PipelineThread,
    output: PipelineThread,
}

// ============================================================================
// Worker
// ============================================================================

/// Buffer-moving worker behind a running codec.
///
/// Owns both buffer pools for its whole life; slots are only reclaimed, never
/// reallocated, across `pause`/`start` cycles.
pub struct CodecWorker {
    shared: Arc<Shared>,
    config: CodecConfig,
    pipelines: Mutex<Option<Pipelines>>,
}

impl CodecWorker {
    /// Build the pools for `engine` and prepare (but do not start) the
    /// pipelines.
    pub fn new(
        name: &str,
        engine: SharedEngine,
        callback: Arc<dyn CodecCallback>,
        config: &CodecConfig,
    ) -> Result<Self> {
        config.validate()?;

        let (input_size, output_size) = {
            let engine = engine.lock();
            (engine.input_buffer_size(), engine.output_buffer_size())
        };

        let input_pool = BufferPool::new(
            "input",
            config.input_buffer_count,
            config.input_capacity(input_size),
        )?;
        let output_pool = BufferPool::new(
            "output",
            config.output_buffer_count,
            config.output_capacity(output_size),
        )?;

        let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            codec = %name,
            session_id,
            input_slots = input_pool.len(),
            input_capacity = input_pool.capacity(),
            output_slots = output_pool.len(),
            output_capacity = output_pool.capacity(),
            "Codec worker created"
        );

        let available = (0..input_pool.len() as u32).collect();
        let shared = Arc::new(Shared {
            name: name.to_string(),
            session_id,
            engine,
            callback,
            input_pool,
            output_pool,
            input: Mutex::new(InputQueues {
                available,
                ..Default::default()
            }),
            input_cond: Condvar::new(),
            output: Mutex::new(OutputProgress::default()),
            output_cond: Condvar::new(),
            first_output: AtomicBool::new(true),
            last_format: Mutex::new(None),
        });

        Ok(Self {
            shared,
            config: config.clone(),
            pipelines: Mutex::new(None),
        })
    }

    /// Identity of this worker; stays the same across pause and resume.
    pub fn session_id(&self) -> u64 {
        self.shared.session_id
    }

    pub fn is_running(&self) -> bool {
        self.pipelines
            .lock()
            .as_ref()
            .map(|p| p.running.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn input_pool(&self) -> &BufferPool {
        &self.shared.input_pool
    }

    pub fn output_pool(&self) -> &BufferPool {
        &self.shared.output_pool
    }

    /// Spawn both pipeline threads.
    pub fn start(&self) -> Result<()> {
        let mut pipelines = self.pipelines.lock();
        if pipelines.is_some() {
            return Err(CodecError::InvalidState(
                "codec worker already started".to_string(),
            ));
        }

        let running = Arc::new(AtomicBool::new(true));

        let input = {
            let shared = self.shared.clone();
            let flag = running.clone();
            PipelineThread::spawn(&self.config.input_thread_name, move || {
                input_loop(&shared, &flag)
            })?
        };

        let output = {
            let shared = self.shared.clone();
            let flag = running.clone();
            match PipelineThread::spawn(&self.config.output_thread_name, move || {
                output_loop(&shared, &flag)
            }) {
                Ok(thread) => thread,
                Err(e) => {
                    running.store(false, Ordering::Release);
                    self.shared.wake_input();
                    input.join(self.config.join_timeout);
                    return Err(e);
                }
            }
        };

        info!(
            codec = %self.shared.name,
            session_id = self.shared.session_id,
            "Codec worker started"
        );
        *pipelines = Some(Pipelines {
            running,
            input,
            output,
        });
        Ok(())
    }

    /// Stop and join both pipeline threads. Pools and queues are kept.
    ///
    /// Returns `false` if a thread had to be detached.
    pub fn pause(&self) -> bool {
        let Some(pipelines) = self.pipelines.lock().take() else {
            return true;
        };

        pipelines.running.store(false, Ordering::Release);
        self.shared.wake_input();
        self.shared.wake_output();

        let timeout = self.config.join_timeout;
        let input_joined = pipelines.input.join(timeout);
        let output_joined = pipelines.output.join(timeout);

        debug!(
            codec = %self.shared.name,
            session_id = self.shared.session_id,
            "Codec worker paused"
        );
        input_joined && output_joined
    }

    /// Drop all queued work and return every slot to the pools.
    ///
    /// Only valid while paused. All input slots become grantable again.
    pub fn discard_pending(&self) -> Result<()> {
        if self.pipelines.lock().is_some() {
            return Err(CodecError::InvalidState(
                "cannot discard work while the worker is running".to_string(),
            ));
        }

        // Under the input lock so a concurrent queue_input cannot leave a
        // reclaimed slot in the ready queue
        let input_reclaimed = {
            let mut input = self.shared.input.lock();
            let reclaimed = self.shared.input_pool.reclaim_all();
            input.ready.clear();
            input.available = (0..self.shared.input_pool.len() as u32).collect();
            reclaimed
        };
        let output_reclaimed = self.shared.output_pool.reclaim_all();
        {
            let mut output = self.shared.output.lock();
            output.drained = output.sent;
        }

        debug!(
            codec = %self.shared.name,
            input_reclaimed,
            output_reclaimed,
            "Discarded pending buffers"
        );
        Ok(())
    }

    /// Stop the pipelines and reclaim every slot.
    ///
    /// Idempotent. The engine itself is left to its owner.
    pub fn release(&self) {
        let had_threads = self.pipelines.lock().is_some();
        if !self.pause() {
            warn!(codec = %self.shared.name, "Codec worker released with detached threads");
        }

        {
            let mut input = self.shared.input.lock();
            self.shared.input_pool.reclaim_all();
            input.ready.clear();
            input.available.clear();
        }
        self.shared.output_pool.reclaim_all();

        if had_threads {
            info!(
                codec = %self.shared.name,
                session_id = self.shared.session_id,
                "Codec worker released"
            );
        }
    }

    /// Hand a client-filled input slot to the input pipeline.
    pub fn queue_input(&self, index: u32, info: BufferInfo, flag: BufferFlag) -> Result<()> {
        let mut input = self.shared.input.lock();
        self.shared.input_pool.queue_from_client(index, info, flag)?;
        input.ready.push_back(InputJob::Slot(index));
        self.shared.input_cond.notify_all();
        drop(input);

        trace!(index, size = info.size, pts = info.presentation_time_us, "Input queued");
        Ok(())
    }

    /// Queue an end-of-stream marker behind every slot already queued.
    pub fn queue_eos(&self) {
        let mut input = self.shared.input.lock();
        input.ready.push_back(InputJob::Eos);
        self.shared.input_cond.notify_all();
    }

    /// Return an output slot from the client to the pool.
    pub fn release_output(&self, index: u32) -> Result<()> {
        self.shared
            .output_pool
            .release(index, SlotStatus::OwnedByClient)?;
        trace!(index, "Output released");
        self.shared.wake_output();
        Ok(())
    }
}

impl Drop for CodecWorker {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Input Pipeline
// ============================================================================

fn input_loop(shared: &Shared, running: &AtomicBool) {
    let span = info_span!("codec_input", codec = %shared.name, session_id = shared.session_id);
    let _enter = span.enter();
    debug!("Input pipeline started");

    loop {
        let step = {
            let mut input = shared.input.lock();
            while running.load(Ordering::Acquire)
                && !shared.can_feed(&input)
                && input.available.is_empty()
            {
                shared.input_cond.wait(&mut input);
            }
            if !running.load(Ordering::Acquire) {
                break;
            }

            // Queued input goes to the engine before more slots are granted
            let next_job = if shared.can_feed(&input) {
                input.ready.pop_front()
            } else {
                None
            };
            match next_job {
                Some(InputJob::Slot(index)) => InputStep::Feed(index),
                Some(InputJob::Eos) => InputStep::Eos(input.last_pts),
                None => match input.available.pop_front() {
                    Some(index) => InputStep::Grant(index),
                    None => continue,
                },
            }
        };

        match step {
            InputStep::Feed(index) => feed_slot(shared, index),
            InputStep::Eos(last_pts) => feed_eos(shared, last_pts),
            InputStep::Grant(index) => grant_input(shared, index),
        }
    }

    debug!("Input pipeline stopped");
}

fn grant_input(shared: &Shared, index: u32) {
    let pool = &shared.input_pool;
    if let Err(e) = pool.transition(index, SlotStatus::Free, SlotStatus::OwnedByClient) {
        shared.report(&e);
        return;
    }
    match pool.slot(index) {
        Ok(slot) => {
            trace!(index, "Input buffer available");
            shared
                .callback
                .on_input_buffer_available(index, slot.payload().clone());
        }
        Err(e) => shared.report(&e),
    }
}

fn feed_slot(shared: &Shared, index: u32) {
    let pool = &shared.input_pool;
    if let Err(e) = pool.transition(index, SlotStatus::OwnedByWorker, SlotStatus::OwnedByEngine) {
        shared.report(&e);
        return;
    }

    let result = pool.slot(index).and_then(|slot| {
        let (info, flag) = slot.attributes();
        let range = info.range();
        slot.payload().with_data(|data| {
            let region = data.get(range).ok_or_else(|| {
                CodecError::InvalidVal(format!("input slot {} region out of bounds", index))
            })?;
            shared
                .engine
                .lock()
                .send_data(&InputBuffer::new(region, info.presentation_time_us, flag))
        })?;
        Ok(info.presentation_time_us)
    });

    match result {
        Ok(pts) => {
            trace!(index, pts, "Input sent to engine");
            shared.input.lock().last_pts = pts;
            mark_sent(shared);
        }
        Err(e) => shared.report(&e),
    }

    // The slot goes back to the client whether or not the engine took it.
    match pool.release(index, SlotStatus::OwnedByEngine) {
        Ok(()) => {
            let mut input = shared.input.lock();
            input.available.push_back(index);
        }
        Err(e) => shared.report(&e),
    }
}

fn feed_eos(shared: &Shared, last_pts: i64) {
    let result = shared.engine.lock().send_data(&InputBuffer::eos(last_pts));
    match result {
        Ok(()) => {
            debug!(pts = last_pts, "End of stream sent to engine");
            mark_sent(shared);
        }
        Err(e) => shared.report(&e),
    }
}

fn mark_sent(shared: &Shared) {
    let mut output = shared.output.lock();
    output.sent += 1;
    shared.output_cond.notify_all();
}

// ============================================================================
// Output Pipeline
// ============================================================================

fn output_loop(shared: &Shared, running: &AtomicBool) {
    let span = info_span!("codec_output", codec = %shared.name, session_id = shared.session_id);
    let _enter = span.enter();
    debug!("Output pipeline started");

    loop {
        let snapshot = {
            let mut output = shared.output.lock();
            while running.load(Ordering::Acquire)
                && !(output.has_work() && shared.output_pool.has_free())
            {
                shared.output_cond.wait(&mut output);
            }
            if !running.load(Ordering::Acquire) {
                break;
            }
            output.sent
        };

        let Some(index) = shared.output_pool.acquire_free() else {
            continue;
        };

        if !drain_one(shared, index) {
            {
                let mut output = shared.output.lock();
                output.drained = output.drained.max(snapshot);
            }
            // Input held back for lack of output room may go now
            shared.wake_input();
        }
    }

    debug!("Output pipeline stopped");
}

/// Ask the engine for one unit in slot `index`.
///
/// Returns `true` if the engine may have more to give.
fn drain_one(shared: &Shared, index: u32) -> bool {
    let pool = &shared.output_pool;
    let slot = match pool.slot(index) {
        Ok(slot) => slot,
        Err(e) => {
            shared.report(&e);
            return false;
        }
    };

    let received = slot.payload().with_data_mut(|data| {
        let mut buffer = OutputBuffer::new(data);
        let status = shared.engine.lock().receive_data(&mut buffer)?;
        Ok::<_, CodecError>((
            status,
            buffer.size(),
            buffer.presentation_time_us(),
            buffer.flag(),
        ))
    });

    let (status, size, pts, mut flag) = match received {
        Ok((ReceiveStatus::NotEnoughData, ..)) => {
            return_to_pool(shared, index);
            return false;
        }
        Ok(produced) => produced,
        Err(e) => {
            return_to_pool(shared, index);
            shared.report(&e);
            return false;
        }
    };

    if let Err(e) = pool.transition(index, SlotStatus::OwnedByEngine, SlotStatus::OwnedByWorker) {
        shared.report(&e);
        return false;
    }

    if status == ReceiveStatus::EndOfStream {
        flag.insert(BufferFlag::EOS);
    }
    if shared.first_output.swap(false, Ordering::AcqRel) && shared.engine.lock().emits_codec_data()
    {
        flag.insert(BufferFlag::CODEC_DATA);
    }

    let info = BufferInfo::new(pts, size as i32, 0);
    if let Err(e) = pool.set_attributes(index, info, flag) {
        shared.report(&e);
        return false;
    }

    announce_format_change(shared);

    if let Err(e) = pool.transition(index, SlotStatus::OwnedByWorker, SlotStatus::OwnedByClient) {
        shared.report(&e);
        return false;
    }
    trace!(index, size, pts, flag = flag.bits(), "Output buffer available");
    shared
        .callback
        .on_output_buffer_available(index, info, flag, slot.payload().clone());

    if status == ReceiveStatus::EndOfStream {
        debug!(pts, "End of stream delivered");
        return false;
    }
    true
}

fn return_to_pool(shared: &Shared, index: u32) {
    if let Err(e) = shared.output_pool.release(index, SlotStatus::OwnedByEngine) {
        shared.report(&e);
    }
}

fn announce_format_change(shared: &Shared) {
    let current = shared.engine.lock().output_format();
    let mut last = shared.last_format.lock();
    if last.as_ref() != Some(&current) {
        debug!(format = %current, "Output format changed");
        shared.callback.on_output_format_changed(&current);
        *last = Some(current);
    }
}
