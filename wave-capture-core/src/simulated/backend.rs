use std::sync::Arc;

use super::device::{SimShared, SimulatedController, SimulatedDevice};
use crate::buffers::completion::CompletionSender;
use crate::models::device_models::{describe_manufacturer, DeviceSelector, InputDeviceCaps};
use crate::models::error::CaptureError;
use crate::models::wave_format::WaveFormat;
use crate::traits::capture_device::CaptureBackend;

type FormatFilter = Box<dyn Fn(&WaveFormat) -> bool + Send + Sync>;

/// Backend with in-memory devices, for running the engine without
/// hardware.
///
/// ```
/// use wave_capture_core::{CaptureEngine, DeviceSelector, SimulatedBackend, WaveFormat};
///
/// let backend = SimulatedBackend::new(1);
/// let controller = backend.controller(DeviceSelector::Id(0)).unwrap();
/// let mut engine = CaptureEngine::new(backend);
/// engine.open(DeviceSelector::Id(0), WaveFormat::PCM_16KHZ_16BIT_MONO).unwrap();
/// assert!(controller.is_open());
/// ```
pub struct SimulatedBackend {
    devices: Vec<InputDeviceCaps>,
    shared: Vec<Arc<SimShared>>,
    accepts: FormatFilter,
}

impl SimulatedBackend {
    /// `count` generic stereo devices accepting any well-formed format.
    pub fn new(count: u32) -> Self {
        let devices = (0..count)
            .map(|id| InputDeviceCaps {
                device_id: DeviceSelector::Id(id),
                name: format!("Simulated Input {}", id),
                manufacturer: describe_manufacturer(1),
                product_id: 0,
                driver_version: 0x0100,
                channels: 2,
            })
            .collect();
        Self::with_devices(devices)
    }

    pub fn with_devices(devices: Vec<InputDeviceCaps>) -> Self {
        let shared = devices.iter().map(|_| Arc::new(SimShared::default())).collect();
        Self {
            devices,
            shared,
            accepts: Box::new(|_| true),
        }
    }

    /// Only accept formats matching `filter`.
    pub fn accepting(mut self, filter: impl Fn(&WaveFormat) -> bool + Send + Sync + 'static) -> Self {
        self.accepts = Box::new(filter);
        self
    }

    /// The driver side of the device `selector` refers to.
    pub fn controller(&self, selector: DeviceSelector) -> Option<SimulatedController> {
        let index = self.resolve(selector).ok()?;
        Some(SimulatedController::new(Arc::clone(&self.shared[index])))
    }

    fn resolve(&self, selector: DeviceSelector) -> Result<usize, CaptureError> {
        let index = match selector {
            DeviceSelector::Mapper => 0,
            DeviceSelector::Id(id) => id as usize,
        };
        if index < self.devices.len() {
            Ok(index)
        } else {
            Err(CaptureError::DeviceUnavailable)
        }
    }
}

impl CaptureBackend for SimulatedBackend {
    type Device = SimulatedDevice;

    fn devices(&self) -> Result<Vec<InputDeviceCaps>, CaptureError> {
        Ok(self.devices.clone())
    }

    fn supports_format(
        &self,
        selector: DeviceSelector,
        format: &WaveFormat,
    ) -> Result<bool, CaptureError> {
        let index = self.resolve(selector)?;
        Ok(format.channels <= self.devices[index].channels && (self.accepts)(format))
    }

    fn open(
        &self,
        selector: DeviceSelector,
        format: &WaveFormat,
        completions: CompletionSender,
    ) -> Result<SimulatedDevice, CaptureError> {
        if !self.supports_format(selector, format)? {
            return Err(CaptureError::UnsupportedFormat);
        }
        let index = self.resolve(selector)?;
        let shared = Arc::clone(&self.shared[index]);
        shared.attach(completions)?;
        Ok(SimulatedDevice::new(shared))
    }
}
