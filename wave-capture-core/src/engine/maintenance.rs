//! The buffer maintenance loop.
//!
//! One dedicated thread per running engine. It is the only code that
//! submits buffers to the device and the only code that drains completions:
//!
//! ```text
//! loop while running:
//!   wait until outstanding < depth, or a completion is queued, or stopped
//!   submit buffers until outstanding == depth
//!   drain queued completions: reclaim → copy → on_data_ready → recycle
//! then, once stopped:
//!   keep draining until outstanding == 0
//! ```
//!
//! A buffer only leaves `outstanding` once the device has handed it back,
//! so the device never holds more than `queue_depth` buffers.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use super::device_handle::DeviceHandle;
use crate::buffers::buffer::{BufferState, CaptureBuffer};
use crate::buffers::completion::{CompletionChannel, CompletionRecord};
use crate::buffers::pool::BufferPool;
use crate::models::capture_models::DataChunk;
use crate::models::config::CaptureConfig;
use crate::models::error::{CaptureError, SubmitError};
use crate::models::state::EngineState;
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::capture_device::CaptureDevice;

/// What the loop hands back to the engine when it exits.
pub(crate) struct LoopExit {
    pub pool: BufferPool,
    pub failure: Option<CaptureError>,
}

pub(crate) struct MaintenanceLoop<D: CaptureDevice> {
    channel: Arc<CompletionChannel>,
    device: Arc<Mutex<DeviceHandle<D>>>,
    pool: BufferPool,
    config: CaptureConfig,
    delegate: Option<Arc<dyn CaptureDelegate>>,
    engine_state: Arc<Mutex<EngineState>>,
    sequence: u64,
    /// Reported complete, but the device refused to hand the buffer back.
    /// Still counted in `outstanding`.
    unreclaimed: Vec<CompletionRecord>,
}

impl<D: CaptureDevice> MaintenanceLoop<D> {
    pub fn new(
        channel: Arc<CompletionChannel>,
        device: Arc<Mutex<DeviceHandle<D>>>,
        pool: BufferPool,
        config: CaptureConfig,
        delegate: Option<Arc<dyn CaptureDelegate>>,
        engine_state: Arc<Mutex<EngineState>>,
    ) -> Self {
        Self {
            channel,
            device,
            pool,
            config,
            delegate,
            engine_state,
            sequence: 0,
            unreclaimed: Vec::new(),
        }
    }

    pub fn run(mut self) -> LoopExit {
        log::debug!(
            "Maintenance loop started (depth {}, {} bytes per buffer)",
            self.config.queue_depth,
            self.pool.buffer_capacity()
        );

        let failure = match panic::catch_unwind(AssertUnwindSafe(|| self.stream())) {
            Ok(streamed) => streamed.err(),
            Err(payload) => Some(CaptureError::EngineFailed(format!(
                "maintenance loop panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        let device_returns_buffers = match &failure {
            None => true,
            Some(error) => self.fail(error),
        };
        if device_returns_buffers {
            self.final_drain();
        }
        self.publish();

        log::debug!(
            "Maintenance loop exited ({} chunks delivered)",
            self.sequence
        );
        LoopExit {
            pool: self.pool,
            failure,
        }
    }

    fn stream(&mut self) -> Result<(), CaptureError> {
        while self.wait_for_work() {
            self.replenish()?;
            self.drain()?;
        }
        Ok(())
    }

    /// Block until there is room at the device, a completion to drain, or
    /// `running` was cleared. Returns `running`.
    fn wait_for_work(&self) -> bool {
        let depth = self.config.queue_depth;
        let poll = self.config.wait_poll();
        let mut state = self.channel.lock();
        while state.running && state.outstanding >= depth && state.completions.is_empty() {
            self.channel.wait_for(&mut state, poll);
        }
        state.running
    }

    /// Top the device back up to the configured depth.
    ///
    /// `running` is checked with the device lock held, so no buffer can be
    /// submitted after `stop` has reset the device.
    fn replenish(&mut self) -> Result<(), CaptureError> {
        let depth = self.config.queue_depth;
        let mut device = self.device.lock();
        loop {
            {
                let state = self.channel.lock();
                if !state.running || state.outstanding >= depth {
                    break;
                }
            }

            let buffer = self.pool.acquire();
            if let Err(SubmitError { error, buffer }) = device.submit(buffer) {
                if let Err(e) = self.pool.unsubmit(buffer) {
                    log::error!("Failed to return refused buffer to the pool: {}", e);
                }
                return Err(error);
            }

            let mut state = self.channel.lock();
            state.outstanding += 1;
            state.stats.buffers_submitted += 1;
            state.stats.peak_outstanding = state.stats.peak_outstanding.max(state.outstanding);
        }
        drop(device);
        self.publish();
        Ok(())
    }

    /// Drain queued completions. Stops at the first device error, leaving
    /// the rest queued.
    fn drain(&mut self) -> Result<(), CaptureError> {
        let mut result = Ok(());
        while let Some((record, running)) = self.next_completion() {
            let notify = running || self.config.notify_during_drain;
            result = self.process(record, notify);
            if result.is_err() {
                break;
            }
        }
        self.publish();
        result
    }

    /// Pop the oldest completion along with the `running` flag it was
    /// queued under.
    fn next_completion(&self) -> Option<(CompletionRecord, bool)> {
        let mut state = self.channel.lock();
        let record = state.completions.pop_front()?;
        Some((record, state.running))
    }

    /// Drain one completion.
    ///
    /// Errors confined to this buffer are reported and swallowed. An error
    /// from the device while taking the buffer back is returned; the buffer
    /// stays outstanding until a later attempt succeeds.
    fn process(&mut self, record: CompletionRecord, notify: bool) -> Result<(), CaptureError> {
        let id = record.buffer_id;
        if self.pool.state(id) != Some(BufferState::Submitted) {
            log::warn!("Ignoring completion for buffer {}: not submitted", id);
            self.reject(&CaptureError::InvalidBuffer(format!(
                "completion for buffer {} which is not at the device",
                id
            )));
            return Ok(());
        }

        let reclaimed = self.device.lock().reclaim(id);
        let buffer = match reclaimed {
            Ok(buffer) => buffer,
            Err(error @ CaptureError::InvalidBuffer(_)) => {
                // Still in flight at the device; its real completion follows.
                log::warn!("Ignoring early completion for buffer {}: {}", id, error);
                self.reject(&error);
                return Ok(());
            }
            Err(error) => {
                log::error!("Device did not return buffer {}: {}", id, error);
                self.unreclaimed.push(record);
                return Err(error);
            }
        };

        if let Err(error) = self.pool.complete(id) {
            log::error!("Buffer {} returned out of order: {}", id, error);
        }
        {
            let mut state = self.channel.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
            state.stats.completions_drained += 1;
        }

        if let Err(error) = self.deliver(&record, &buffer, notify) {
            log::error!("Dropping completion for buffer {}: {}", id, error);
            self.reject(&error);
        }

        if let Err(error) = self.pool.recycle(buffer) {
            log::error!("Failed to recycle buffer {}: {}", id, error);
        }
        Ok(())
    }

    fn deliver(
        &mut self,
        record: &CompletionRecord,
        buffer: &CaptureBuffer,
        notify: bool,
    ) -> Result<(), CaptureError> {
        let bytes = buffer.recorded(record.bytes_recorded)?;
        if bytes.is_empty() {
            self.channel.lock().stats.empty_completions += 1;
            if !self.config.deliver_empty_chunks {
                return Ok(());
            }
        }
        if !notify || self.delegate.is_none() {
            return Ok(());
        }

        let chunk = DataChunk {
            sequence: self.sequence,
            buffer_id: buffer.id(),
            data: bytes.to_vec(),
        };
        self.sequence += 1;
        self.call_delegate("on_data_ready", |delegate| delegate.on_data_ready(chunk))?;
        self.channel.lock().stats.chunks_delivered += 1;
        Ok(())
    }

    /// After `running` is cleared: wait for every buffer the device still
    /// holds, draining each as it comes back.
    fn final_drain(&mut self) {
        let poll = self.config.drain_poll();
        loop {
            self.retry_unreclaimed();
            {
                let mut state = self.channel.lock();
                while state.completions.is_empty()
                    && state.outstanding > self.unreclaimed.len()
                    && !state.abandoned
                {
                    let timed_out = self.channel.wait_for(&mut state, poll);
                    if timed_out && state.completions.is_empty() {
                        log::warn!(
                            "Still waiting for {} buffers from the device",
                            state.outstanding
                        );
                    }
                }
                if state.completions.is_empty() {
                    break;
                }
            }
            if let Err(error) = self.drain() {
                if !self.engine_state.lock().is_failed() {
                    self.enter_failed(&error);
                }
            }
        }

        if !self.unreclaimed.is_empty() {
            log::warn!(
                "Device kept {} buffers after stop; they are released at close",
                self.unreclaimed.len()
            );
        }
    }

    /// Ask the device again for buffers it refused to return earlier.
    fn retry_unreclaimed(&mut self) {
        let notify = self.config.notify_during_drain;
        for record in std::mem::take(&mut self.unreclaimed) {
            if let Err(error) = self.process(record, notify) {
                log::warn!("Buffer {} still held by the device: {}", record.buffer_id, error);
            }
        }
    }

    /// Enter the failed state. Returns whether the device accepted the
    /// reset, i.e. whether its buffers will come back.
    fn fail(&mut self, error: &CaptureError) -> bool {
        log::error!("Maintenance loop failed: {}", error);
        self.channel.disarm();
        self.enter_failed(error);

        let reset = self.device.lock().reset();
        match reset {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to reset device after fatal error: {}", e);
                self.channel.abandon();
                false
            }
        }
    }

    fn enter_failed(&self, error: &CaptureError) {
        let failed = EngineState::Failed(error.clone());
        *self.engine_state.lock() = failed.clone();
        if let Err(panicked) =
            self.call_delegate("on_state_changed", |delegate| delegate.on_state_changed(&failed))
        {
            log::error!("{}", panicked);
        }
        self.report(error);
    }

    fn reject(&self, error: &CaptureError) {
        self.channel.lock().stats.rejected_completions += 1;
        self.report(error);
    }

    fn report(&self, error: &CaptureError) {
        if let Err(panicked) = self.call_delegate("on_error", |delegate| delegate.on_error(error)) {
            log::error!("{}", panicked);
        }
    }

    /// Run a delegate hook, turning a panic into an error so one bad
    /// callback cannot take the loop down.
    fn call_delegate(
        &self,
        hook: &str,
        call: impl FnOnce(&dyn CaptureDelegate),
    ) -> Result<(), CaptureError> {
        let Some(delegate) = self.delegate.as_deref() else {
            return Ok(());
        };
        panic::catch_unwind(AssertUnwindSafe(|| call(delegate))).map_err(|payload| {
            CaptureError::DelegatePanicked(format!("{}: {}", hook, panic_message(payload.as_ref())))
        })
    }

    fn publish(&self) {
        let mut state = self.channel.lock();
        state.stats.buffers_allocated = self.pool.allocated();
        state.stats.buffers_released = self.pool.released();
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
