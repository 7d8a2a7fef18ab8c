//! # Codec Adapter
//!
//! Client-facing lifecycle of one codec instance.
//!
//! ## Overview
//!
//! The adapter guards every lifecycle call with a state allow-list, owns the
//! codec engine between `configure` and `release`, and creates one
//! [`CodecWorker`] per running period.
//!
//! ```text
//! RELEASED --configure--> INITIALIZING --> INITIALIZED
//! INITIALIZED --start--> STARTING --> RUNNING
//! FLUSHED --start--> RESUMING --> RUNNING          (worker reused)
//! RUNNING/FLUSHED --stop--> STOPPING --> INITIALIZED
//! RUNNING --flush--> FLUSHING --> FLUSHED
//! any --reset--> RELEASED
//! any --release--> RELEASING --> RELEASED
//! ```
//!
//! ## Threading
//!
//! Lifecycle calls are serialized by one mutex. The data path
//! (`queue_input_buffer`, `release_output_buffer`, `notify_eos`) does not take
//! it, so a callback may queue buffers while another thread is stopping the
//! codec; such calls fail fast with [`CodecError::InvalidState`] once the state
//! has left `RUNNING`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use core_codec::{CodecAdapter, Format};
//! # fn callback() -> std::sync::Arc<dyn core_codec::CodecCallback> { unimplemented!() }
//!
//! let codec = CodecAdapter::new("audio/raw");
//! codec.set_callback(callback())?;
//! codec.configure(&Format::audio(2, 44100))?;
//! codec.start()?;
//! // ... buffers flow through the callback ...
//! codec.stop()?;
//! codec.release()?;
//! # Ok::<(), core_codec::CodecError>(())
//! ```

use crate::buffer::{BufferFlag, BufferInfo};
use crate::callback::CodecCallback;
use crate::config::CodecConfig;
use crate::engine::{CodecEngine, EngineRegistry};
use crate::error::{CodecError, ErrorCode, ErrorType, Result};
use crate::format::{keys, Format};
use crate::state::{AtomicCodecState, CodecState};
use crate::worker::{CodecWorker, SharedEngine};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, trace, warn};

/// One codec instance and its lifecycle.
pub struct CodecAdapter {
    name: String,
    registry: EngineRegistry,
    config: CodecConfig,
    state: AtomicCodecState,
    lifecycle: Mutex<()>,
    callback: RwLock<Option<Arc<dyn CodecCallback>>>,
    engine: RwLock<Option<SharedEngine>>,
    worker: RwLock<Option<Arc<CodecWorker>>>,
}

impl CodecAdapter {
    /// Adapter for codec `name` using the built-in engines.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_registry(name, EngineRegistry::with_builtin())
    }

    pub fn with_registry(name: impl Into<String>, registry: EngineRegistry) -> Self {
        Self::with_config(name, registry, CodecConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        registry: EngineRegistry,
        config: CodecConfig,
    ) -> Self {
        Self {
            name: name.into(),
            registry,
            config,
            state: AtomicCodecState::default(),
            lifecycle: Mutex::new(()),
            callback: RwLock::new(None),
            engine: RwLock::new(None),
            worker: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CodecState {
        self.state.load()
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Identity of the current worker, if any.
    ///
    /// Unchanged across `flush` and the resume `start`; a new value after
    /// `stop` and `start`.
    pub fn session_id(&self) -> Option<u64> {
        self.worker.read().as_ref().map(|w| w.session_id())
    }

    /// Identities of the current worker's input and output pools.
    pub fn pool_ids(&self) -> Option<(u64, u64)> {
        self.worker
            .read()
            .as_ref()
            .map(|w| (w.input_pool().id(), w.output_pool().id()))
    }

    /// Returns `true` while the worker's pipeline threads are running.
    pub fn is_worker_running(&self) -> bool {
        self.worker
            .read()
            .as_ref()
            .map(|w| w.is_running())
            .unwrap_or(false)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Register the client callback.
    ///
    /// The callback cannot be replaced while a worker exists.
    #[instrument(skip(self, callback), fields(codec = %self.name))]
    pub fn set_callback(&self, callback: Arc<dyn CodecCallback>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        self.check_state(
            "set_callback",
            &[
                CodecState::Released,
                CodecState::Initialized,
                CodecState::Initializing,
            ],
        )?;
        if self.worker.read().is_some() {
            warn!("Callback is attached to a worker and cannot change");
            return Err(CodecError::InvalidState(
                "callback cannot change while a worker exists".to_string(),
            ));
        }

        *self.callback.write() = Some(callback);
        debug!("Callback set");
        Ok(())
    }

    /// Create and initialize the engine for `format`.
    ///
    /// Any failure leaves the adapter in `RELEASED`.
    #[instrument(skip(self, format), fields(codec = %self.name, format = %format))]
    pub fn configure(&self, format: &Format) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        self.check_state("configure", &[CodecState::Released])?;

        match format.get_int(keys::CHANNEL_COUNT) {
            Some(channels) if channels > 0 => {}
            other => {
                warn!(channel_count = ?other, "Missing or invalid channel count");
                return Err(CodecError::ConfigureMismatchChannelCount);
            }
        }
        match format.get_int(keys::SAMPLE_RATE) {
            Some(rate) if rate > 0 => {}
            other => {
                warn!(sample_rate = ?other, "Missing or invalid sample rate");
                return Err(CodecError::MismatchSampleRate);
            }
        }

        self.transition(CodecState::Initializing);
        match self.do_init(format) {
            Ok(engine) => {
                *self.engine.write() = Some(Arc::new(Mutex::new(engine)));
                self.transition(CodecState::Initialized);
                info!("Codec configured");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Configure failed");
                self.transition(CodecState::Released);
                Err(e)
            }
        }
    }

    fn do_init(&self, format: &Format) -> Result<Box<dyn CodecEngine>> {
        self.config.validate()?;

        let mut engine = self.registry.create(&self.name)?;
        if let Err(e) = engine.init(format) {
            if let Err(release_err) = engine.release() {
                warn!(error = %release_err, "Engine release after failed init also failed");
            }
            return Err(e);
        }
        Ok(engine)
    }

    /// Start processing, or resume after `flush`.
    #[instrument(skip(self), fields(codec = %self.name))]
    pub fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        let state =
            self.check_state("start", &[CodecState::Initialized, CodecState::Flushed])?;

        let callback = self.callback.read().clone().ok_or_else(|| {
            warn!("Start without a callback");
            CodecError::InvalidState("no callback set".to_string())
        })?;
        let engine = self.engine.read().clone().ok_or_else(|| {
            error!("Start without an engine");
            CodecError::InvalidState("codec not configured".to_string())
        })?;

        if state == CodecState::Flushed {
            self.do_resume()
        } else {
            self.do_start(engine, callback)
        }
    }

    fn do_start(&self, engine: SharedEngine, callback: Arc<dyn CodecCallback>) -> Result<()> {
        self.transition(CodecState::Starting);

        let worker = match CodecWorker::new(&self.name, engine, callback, &self.config) {
            Ok(worker) => Arc::new(worker),
            Err(e) => {
                error!(error = %e, "Failed to create codec worker");
                self.transition(CodecState::Initialized);
                return Err(e);
            }
        };

        // Published before the threads run so buffers granted right away can be queued
        *self.worker.write() = Some(worker.clone());
        self.transition(CodecState::Running);

        if let Err(e) = worker.start() {
            error!(error = %e, "Failed to start codec worker");
            self.worker.write().take();
            worker.release();
            self.transition(CodecState::Initialized);
            return Err(e);
        }

        info!(session_id = worker.session_id(), "Codec started");
        Ok(())
    }

    fn do_resume(&self) -> Result<()> {
        self.transition(CodecState::Resuming);

        let Some(worker) = self.current_worker() else {
            error!("Flushed codec has no worker to resume");
            self.transition(CodecState::Flushed);
            return Err(CodecError::InvalidState("no worker to resume".to_string()));
        };

        self.transition(CodecState::Running);
        if let Err(e) = worker.start() {
            error!(error = %e, "Failed to resume codec worker");
            self.transition(CodecState::Flushed);
            return Err(e);
        }

        info!(session_id = worker.session_id(), "Codec resumed");
        Ok(())
    }

    /// Stop processing and drop the worker. The engine stays configured.
    ///
    /// A no-op outside `RUNNING` and `FLUSHED`.
    #[instrument(skip(self), fields(codec = %self.name))]
    pub fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        let state = self.state.load();
        if !matches!(state, CodecState::Running | CodecState::Flushed) {
            debug!(state = %state, "Stop is a no-op");
            return Ok(());
        }

        self.transition(CodecState::Stopping);
        self.release_worker();
        self.with_engine("flush", |engine| engine.flush());
        self.transition(CodecState::Initialized);
        info!("Codec stopped");
        Ok(())
    }

    /// Discard all pending work and pause the pipelines.
    ///
    /// Outside `RUNNING` the call fails and the error is also reported through
    /// [`CodecCallback::on_error`].
    #[instrument(skip(self), fields(codec = %self.name))]
    pub fn flush(&self) -> Result<()> {
        let lifecycle = self.lifecycle.lock();
        let state = self.state.load();
        if state != CodecState::Running {
            warn!(state = %state, "Flush rejected");
            let callback = self.callback.read().clone();
            // The client may call back into the adapter from on_error
            drop(lifecycle);
            if let Some(callback) = callback {
                callback.on_error(ErrorType::Internal, ErrorCode::InvalidState.as_i32());
            }
            return Err(CodecError::InvalidState(format!(
                "flush not allowed in state {}",
                state
            )));
        }

        self.transition(CodecState::Flushing);
        if let Some(worker) = self.current_worker() {
            if !worker.pause() {
                warn!("Flush detached a pipeline thread");
            }
            self.with_engine("flush", |engine| engine.flush());
            if let Err(e) = worker.discard_pending() {
                error!(error = %e, "Failed to discard pending buffers");
            }
        }
        self.transition(CodecState::Flushed);
        info!("Codec flushed");
        Ok(())
    }

    /// Reset the engine, then tear down the worker and the engine. Always
    /// succeeds.
    #[instrument(skip(self), fields(codec = %self.name))]
    pub fn reset(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        if self.state.load() != CodecState::Released {
            self.transition(CodecState::Releasing);
        }
        self.release_worker();
        self.with_engine("reset", |engine| engine.reset());
        self.teardown();
        self.transition(CodecState::Released);
        info!("Codec reset");
        Ok(())
    }

    /// Tear down everything and forget the callback. Idempotent.
    #[instrument(skip(self), fields(codec = %self.name))]
    pub fn release(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        if self.state.load() == CodecState::Released
            && self.engine.read().is_none()
            && self.worker.read().is_none()
        {
            self.callback.write().take();
            debug!("Release is a no-op");
            return Ok(());
        }

        self.transition(CodecState::Releasing);
        self.teardown();
        self.callback.write().take();
        self.transition(CodecState::Released);
        info!("Codec released");
        Ok(())
    }

    // ========================================================================
    // Data Path
    // ========================================================================

    /// Hand a filled input slot to the codec.
    pub fn queue_input_buffer(&self, index: u32, info: BufferInfo, flag: BufferFlag) -> Result<()> {
        let worker = self.running_worker("queue_input_buffer")?;
        worker.queue_input(index, info, flag).map_err(|e| {
            warn!(codec = %self.name, index, error = %e, "Input buffer rejected");
            e
        })
    }

    /// Give an output slot back to the codec.
    pub fn release_output_buffer(&self, index: u32) -> Result<()> {
        let worker = self.running_worker("release_output_buffer")?;
        worker.release_output(index).map_err(|e| {
            warn!(codec = %self.name, index, error = %e, "Output buffer release rejected");
            e
        })
    }

    /// Signal that no more input follows.
    ///
    /// Everything already queued is still processed; the last output buffer
    /// carries [`BufferFlag::EOS`].
    #[instrument(skip(self), fields(codec = %self.name))]
    pub fn notify_eos(&self) -> Result<()> {
        let worker = self.running_worker("notify_eos")?;
        worker.queue_eos();
        debug!("End of stream queued");
        Ok(())
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    /// Forward run-time parameters to the engine.
    #[instrument(skip(self, format), fields(codec = %self.name, format = %format))]
    pub fn set_parameter(&self, format: &Format) -> Result<()> {
        self.check_state(
            "set_parameter",
            &[
                CodecState::Initialized,
                CodecState::Running,
                CodecState::Flushed,
            ],
        )?;
        let engine = self.current_engine()?;
        let mut guard = engine.lock();
        guard.set_parameter(format)
    }

    /// Current output format of the engine.
    pub fn get_output_format(&self) -> Result<Format> {
        let engine = self.current_engine()?;
        let guard = engine.lock();
        Ok(guard.output_format())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn check_state(&self, operation: &str, allowed: &[CodecState]) -> Result<CodecState> {
        let state = self.state.load();
        if allowed.contains(&state) {
            return Ok(state);
        }
        warn!(codec = %self.name, operation, state = %state, "Operation not allowed in current state");
        Err(CodecError::InvalidState(format!(
            "{} not allowed in state {}",
            operation, state
        )))
    }

    fn transition(&self, to: CodecState) {
        let from = self.state.load();
        self.state.store(to);
        debug!(codec = %self.name, from = %from, to = %to, "State transition");
    }

    fn current_worker(&self) -> Option<Arc<CodecWorker>> {
        self.worker.read().clone()
    }

    fn running_worker(&self, operation: &str) -> Result<Arc<CodecWorker>> {
        self.check_state(operation, &[CodecState::Running])?;
        self.current_worker().ok_or_else(|| {
            CodecError::InvalidState(format!("{}: codec has no worker", operation))
        })
    }

    fn current_engine(&self) -> Result<SharedEngine> {
        self.engine
            .read()
            .clone()
            .ok_or_else(|| CodecError::InvalidState("codec not configured".to_string()))
    }

    /// Lock the engine, giving up after the join timeout if a detached pipeline
    /// thread still holds it.
    fn lock_engine<'a>(
        &self,
        engine: &'a SharedEngine,
    ) -> Option<MutexGuard<'a, Box<dyn CodecEngine>>> {
        match self.config.join_timeout {
            Some(timeout) => engine.try_lock_for(timeout),
            None => Some(engine.lock()),
        }
    }

    /// Run a best-effort engine operation, logging its failure.
    fn with_engine<F>(&self, operation: &str, f: F)
    where
        F: FnOnce(&mut dyn CodecEngine) -> Result<()>,
    {
        let Some(engine) = self.engine.read().clone() else {
            return;
        };
        let Some(mut guard) = self.lock_engine(&engine) else {
            warn!(codec = %self.name, operation, "Engine is busy, skipping");
            return;
        };
        if let Err(e) = f(&mut **guard) {
            error!(codec = %self.name, operation, error = %e, "Engine operation failed");
        }
    }

    fn release_worker(&self) {
        let worker = self.worker.write().take();
        if let Some(worker) = worker {
            trace!(session_id = worker.session_id(), "Releasing worker");
            worker.release();
        }
    }

    /// Worker first, then input and output pools with it, then the engine.
    fn teardown(&self) {
        self.release_worker();
        self.with_engine("release", |engine| engine.release());
        self.engine.write().take();
    }
}

impl fmt::Debug for CodecAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecAdapter")
            .field("name", &self.name)
            .field("state", &self.state.load())
            .field("session_id", &self.session_id())
            .finish_non_exhaustive()
    }
}

impl Drop for CodecAdapter {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            error!(codec = %self.name, error = %e, "Release on drop failed");
        }
    }
}
