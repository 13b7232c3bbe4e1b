use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use super::device_handle::DeviceHandle;
use super::maintenance::{panic_message, LoopExit, MaintenanceLoop};
use crate::buffers::completion::{CompletionChannel, CompletionSender};
use crate::buffers::pool::BufferPool;
use crate::models::capture_models::EngineStats;
use crate::models::config::CaptureConfig;
use crate::models::device_models::{DeviceSelector, InputDeviceCaps};
use crate::models::error::CaptureError;
use crate::models::state::EngineState;
use crate::models::wave_format::WaveFormat;
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::capture_device::CaptureBackend;

/// Streaming capture engine.
///
/// Owns one device handle and, while started, one maintenance thread that
/// keeps `queue_depth` buffers submitted to the device and delivers each
/// completed buffer to the delegate:
/// ```text
/// [device callback] → [completion channel] → [maintenance loop] → on_data_ready
///        ▲                                          │
///        └──────────────── submit ◀── [buffer pool] ◀┘
/// ```
///
/// Lifecycle methods take `&mut self`, so start/stop/close are serialized;
/// device calls are additionally serialized with the maintenance loop
/// through the handle's lock.
pub struct CaptureEngine<B: CaptureBackend> {
    backend: B,
    config: CaptureConfig,
    channel: Arc<CompletionChannel>,
    handle: Option<Arc<Mutex<DeviceHandle<B::Device>>>>,
    // Held here whenever the maintenance loop is not running.
    pool: Option<BufferPool>,
    state: Arc<Mutex<EngineState>>,
    delegate: Option<Arc<dyn CaptureDelegate>>,
    maintenance_handle: Option<thread::JoinHandle<LoopExit>>,
}

impl<B: CaptureBackend> CaptureEngine<B> {
    pub fn new(backend: B) -> Self {
        let config = CaptureConfig::default();
        Self {
            backend,
            pool: Some(BufferPool::new(0, config.queue_depth)),
            config,
            channel: CompletionChannel::new(),
            handle: None,
            state: Arc::new(Mutex::new(EngineState::Closed)),
            delegate: None,
            maintenance_handle: None,
        }
    }

    pub fn with_config(backend: B, config: CaptureConfig) -> Result<Self, CaptureError> {
        let mut engine = Self::new(backend);
        engine.configure(config)?;
        Ok(engine)
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn CaptureDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn state(&self) -> EngineState {
        self.state.lock().clone()
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn stats(&self) -> EngineStats {
        self.channel.stats()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.maintenance_handle.is_some()
    }

    /// Format of the open device.
    pub fn format(&self) -> Option<WaveFormat> {
        self.handle.as_ref().map(|h| *h.lock().format())
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn devices(&self) -> Result<Vec<InputDeviceCaps>, CaptureError> {
        self.backend.devices()
    }

    pub fn supports_format(
        &self,
        selector: DeviceSelector,
        format: &WaveFormat,
    ) -> Result<bool, CaptureError> {
        self.check_selector(selector)?;
        if format.validate().is_err() {
            return Ok(false);
        }
        self.backend.supports_format(selector, format)
    }

    /// Apply a new configuration. Validated before anything else happens;
    /// rejected while capture is running.
    pub fn configure(&mut self, config: CaptureConfig) -> Result<(), CaptureError> {
        config.validate()?;
        if self.is_running() {
            return Err(CaptureError::AlreadyStarted);
        }

        let capacity = match self.format() {
            Some(format) => config.buffer_bytes(&format)?,
            None => 0,
        };
        if let Some(pool) = self.pool.as_mut() {
            let dropped = pool.resize(capacity, config.queue_depth);
            if dropped > 0 {
                log::debug!("Released {} pooled buffers after reconfiguration", dropped);
            }
        }
        self.config = config;
        self.publish_pool();
        Ok(())
    }

    /// Open a device for capture.
    pub fn open(&mut self, selector: DeviceSelector, format: WaveFormat) -> Result<(), CaptureError> {
        if self.handle.is_some() {
            return Err(CaptureError::AlreadyOpen);
        }
        self.check_selector(selector)?;
        format.validate()?;
        let capacity = self.config.buffer_bytes(&format)?;
        if !self.backend.supports_format(selector, &format)? {
            return Err(CaptureError::UnsupportedFormat);
        }

        let sender = CompletionSender::new(Arc::clone(&self.channel));
        let device = self.backend.open(selector, &format, sender)?;
        self.handle = Some(Arc::new(Mutex::new(DeviceHandle::new(
            device, selector, format,
        ))));

        let depth = self.config.queue_depth;
        self.pool
            .get_or_insert_with(|| BufferPool::new(capacity, depth))
            .resize(capacity, depth);

        log::info!(
            "Opened input device {} ({} Hz, {} bit, {} ch)",
            selector,
            format.samples_per_second,
            format.bits_per_sample,
            format.channels
        );
        self.set_state(EngineState::Open);
        Ok(())
    }

    /// Start capture.
    ///
    /// Spawns the maintenance loop, then asks the device to start. Returns
    /// once the device has accepted the request.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if let Some(error) = self.state.lock().failure() {
            return Err(CaptureError::EngineFailed(error.to_string()));
        }
        if self.is_running() {
            return Err(CaptureError::AlreadyStarted);
        }
        let handle = self.handle.clone().ok_or(CaptureError::NotOpen)?;
        let selector = {
            let device = handle.lock();
            if !device.is_valid() {
                return Err(CaptureError::InvalidHandle);
            }
            device.selector()
        };

        let depth = self.config.queue_depth;
        let pool = match self.pool.take() {
            Some(pool) => pool,
            None => {
                let capacity = match self.format() {
                    Some(format) => self.config.buffer_bytes(&format)?,
                    None => 0,
                };
                BufferPool::new(capacity, depth)
            }
        };

        self.channel.arm(depth);
        self.set_state(EngineState::Capturing);

        let maintenance = MaintenanceLoop::new(
            Arc::clone(&self.channel),
            Arc::clone(&handle),
            pool,
            self.config.clone(),
            self.delegate.clone(),
            Arc::clone(&self.state),
        );
        let spawned = thread::Builder::new()
            .name(format!("wave-capture-maintain-{}", selector))
            .spawn(move || maintenance.run());
        match spawned {
            Ok(join_handle) => self.maintenance_handle = Some(join_handle),
            Err(e) => {
                self.channel.disarm();
                self.set_state(EngineState::Open);
                return Err(CaptureError::EngineFailed(format!(
                    "failed to spawn maintenance thread: {}",
                    e
                )));
            }
        }

        let started = handle.lock().start_capture();
        if let Err(error) = started {
            log::error!("Device {} refused to start: {}", selector, error);
            self.halt();
            if !self.state.lock().is_failed() {
                self.set_state(EngineState::Open);
            }
            return Err(error);
        }

        log::info!("Capture started on device {} (queue depth {})", selector, depth);
        Ok(())
    }

    /// Stop capture and wait until every buffer has come back from the
    /// device and been drained.
    ///
    /// A no-op when not started. Never fails for an engine that has already
    /// failed.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.is_running() {
            return Ok(());
        }
        let already_failed = self.state.lock().is_failed();
        if !already_failed {
            self.set_state(EngineState::Stopping);
        }

        let result = self.halt();

        let failed = self.state.lock().is_failed();
        if !failed {
            self.set_state(EngineState::Open);
        }
        log::info!("Capture stopped");

        match result {
            Err(error) if !already_failed => Err(error),
            _ => Ok(()),
        }
    }

    /// Close the device. Fails with `StillRunning` while capture is running,
    /// unless the engine has failed, in which case it is stopped first.
    pub fn close(&mut self) -> Result<(), CaptureError> {
        if self.is_running() {
            if !self.state.lock().is_failed() {
                return Err(CaptureError::StillRunning);
            }
            self.stop()?;
        }
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        let result = handle.lock().close();
        drop(handle);

        if let Some(pool) = self.pool.as_mut() {
            pool.release_free();
            let abandoned = pool.abandon_outstanding();
            if abandoned > 0 {
                log::warn!("Device closed while holding {} buffers", abandoned);
            }
        }
        self.publish_pool();

        log::info!("Capture device closed");
        self.set_state(EngineState::Closed);
        result
    }

    /// Clear `running`, reset the device and join the maintenance loop.
    fn halt(&mut self) -> Result<(), CaptureError> {
        self.channel.disarm();

        let mut result = Ok(());
        if let Some(handle) = &self.handle {
            if let Err(error) = handle.lock().reset() {
                log::error!("Failed to reset device: {}", error);
                // The device will not return its buffers; stop waiting for them.
                self.channel.abandon();
                result = Err(error);
            }
        }

        if let Some(join_handle) = self.maintenance_handle.take() {
            match join_handle.join() {
                Ok(exit) => {
                    self.pool = Some(exit.pool);
                    if let Some(error) = exit.failure {
                        log::debug!("Maintenance loop had failed: {}", error);
                    }
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log::error!("Maintenance thread panicked: {}", message);
                    let failed = EngineState::Failed(CaptureError::EngineFailed(format!(
                        "maintenance thread panicked: {}",
                        message
                    )));
                    self.set_state(failed);
                }
            }
        }

        if let Err(error) = &result {
            if !self.state.lock().is_failed() {
                self.set_state(EngineState::Failed(error.clone()));
            }
        }
        result
    }

    fn check_selector(&self, selector: DeviceSelector) -> Result<(), CaptureError> {
        let devices = self.backend.devices()?;
        match selector {
            DeviceSelector::Mapper if devices.is_empty() => Err(CaptureError::DeviceUnavailable),
            DeviceSelector::Id(id) if id as usize >= devices.len() => {
                Err(CaptureError::DeviceUnavailable)
            }
            _ => Ok(()),
        }
    }

    fn publish_pool(&self) {
        if let Some(pool) = &self.pool {
            let mut state = self.channel.lock();
            state.stats.buffers_allocated = pool.allocated();
            state.stats.buffers_released = pool.released();
        }
    }

    fn set_state(&self, new_state: EngineState) {
        {
            let mut s = self.state.lock();
            *s = new_state.clone();
        }
        if let Some(ref delegate) = self.delegate {
            delegate.on_state_changed(&new_state);
        }
    }
}

impl<B: CaptureBackend> Drop for CaptureEngine<B> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Failed to stop capture on drop: {}", e);
        }
        if let Err(e) = self.close() {
            log::warn!("Failed to close device on drop: {}", e);
        }
    }
}
