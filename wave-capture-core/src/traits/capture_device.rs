use crate::buffers::buffer::{BufferId, CaptureBuffer};
use crate::buffers::completion::CompletionSender;
use crate::models::device_models::{DeviceSelector, InputDeviceCaps};
use crate::models::error::{CaptureError, SubmitError};
use crate::models::wave_format::WaveFormat;

/// An open hardware input stream.
///
/// Implemented by:
/// - `SimulatedDevice` (all platforms, tests)
/// - `WaveInDevice` (Windows)
///
/// The engine serializes every call; implementations never see two calls
/// at once. Buffers passed to `submit` belong to the device until it
/// reports them through its `CompletionSender` and the engine takes them
/// back with `reclaim`.
pub trait CaptureDevice: Send {
    /// Begin filling submitted buffers.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Pause capture. Submitted buffers stay queued.
    ///
    /// The engine never pauses; it halts with `reset` so that every buffer
    /// comes back. This is for code driving a `DeviceHandle` directly.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Stop capture and report every submitted buffer as complete, with
    /// whatever bytes it holds (possibly zero).
    fn reset(&mut self) -> Result<(), CaptureError>;

    /// Queue an empty buffer for filling. On failure the buffer is handed back.
    fn submit(&mut self, buffer: CaptureBuffer) -> Result<(), SubmitError>;

    /// Take back a buffer the device has reported complete.
    ///
    /// `InvalidBuffer` means the device holds no completed buffer `id`. Any
    /// other error means the device still owns the buffer and may be asked
    /// again.
    fn reclaim(&mut self, id: BufferId) -> Result<CaptureBuffer, CaptureError>;

    /// Release the device. Buffers still held are dropped after the device
    /// has stopped writing into them.
    fn close(&mut self) -> Result<(), CaptureError>;
}

/// Opens devices for a capture engine and answers capability queries.
pub trait CaptureBackend: Send {
    type Device: CaptureDevice + 'static;

    /// Available input devices.
    fn devices(&self) -> Result<Vec<InputDeviceCaps>, CaptureError>;

    /// Whether `selector` can capture in `format`, without opening it.
    fn supports_format(
        &self,
        selector: DeviceSelector,
        format: &WaveFormat,
    ) -> Result<bool, CaptureError>;

    /// Open `selector` in `format`. The device reports completed buffers
    /// through `completions`.
    fn open(
        &self,
        selector: DeviceSelector,
        format: &WaveFormat,
        completions: CompletionSender,
    ) -> Result<Self::Device, CaptureError>;
}
