use crate::buffers::buffer::{BufferId, CaptureBuffer};
use crate::models::device_models::DeviceSelector;
use crate::models::error::{CaptureError, SubmitError};
use crate::models::wave_format::WaveFormat;
use crate::traits::capture_device::CaptureDevice;

/// Exclusive capability over an open device.
///
/// Valid from `open` until `close`. Every operation on a closed handle fails
/// with `InvalidHandle` without touching the device. Dropping a valid
/// handle closes the device.
pub struct DeviceHandle<D: CaptureDevice> {
    device: Option<D>,
    selector: DeviceSelector,
    format: WaveFormat,
}

impl<D: CaptureDevice> DeviceHandle<D> {
    pub fn new(device: D, selector: DeviceSelector, format: WaveFormat) -> Self {
        Self {
            device: Some(device),
            selector,
            format,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.device.is_some()
    }

    pub fn selector(&self) -> DeviceSelector {
        self.selector
    }

    pub fn format(&self) -> &WaveFormat {
        &self.format
    }

    pub fn start_capture(&mut self) -> Result<(), CaptureError> {
        self.device()?.start()
    }

    /// Pause without returning buffers. The engine uses `reset` instead.
    pub fn stop_capture(&mut self) -> Result<(), CaptureError> {
        self.device()?.stop()
    }

    pub fn reset(&mut self) -> Result<(), CaptureError> {
        self.device()?.reset()
    }

    pub fn submit(&mut self, buffer: CaptureBuffer) -> Result<(), SubmitError> {
        match self.device.as_mut() {
            Some(device) => device.submit(buffer),
            None => Err(SubmitError::new(CaptureError::InvalidHandle, buffer)),
        }
    }

    pub fn reclaim(&mut self, id: BufferId) -> Result<CaptureBuffer, CaptureError> {
        self.device()?.reclaim(id)
    }

    /// Close the device and invalidate the handle. The handle is invalid
    /// afterwards even if the device reported an error while closing.
    pub fn close(&mut self) -> Result<(), CaptureError> {
        let mut device = self.device.take().ok_or(CaptureError::InvalidHandle)?;
        device.close()
    }

    fn device(&mut self) -> Result<&mut D, CaptureError> {
        self.device.as_mut().ok_or(CaptureError::InvalidHandle)
    }
}

impl<D: CaptureDevice> Drop for DeviceHandle<D> {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.close() {
                log::warn!("Failed to close device {} on drop: {}", self.selector, e);
            }
        }
    }
}
