//! # wave-capture-windows
//!
//! Windows winmm (waveIn) backend for wave-capture.
//!
//! Provides:
//! - `WaveInBackend`: device enumeration, format queries and `waveInOpen`
//! - `WaveInDevice`: an open device; buffers are submitted as prepared
//!   `WAVEHDR`s and completed through a `CALLBACK_FUNCTION` callback
//! - `mm_result`: `MMRESULT` checking and mapping to `CaptureError`
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use wave_capture_core::{CaptureEngine, DeviceSelector, WaveFormat};
//! use wave_capture_windows::WaveInBackend;
//!
//! let mut engine = CaptureEngine::new(WaveInBackend::new());
//! engine.set_delegate(Arc::new(MyDelegate));
//! engine.open(DeviceSelector::Mapper, WaveFormat::PCM_44KHZ_16BIT_STEREO)?;
//! engine.start()?;
//! ```

pub mod caps;
pub mod mm_result;
#[cfg(target_os = "windows")]
pub mod wave_in;

pub use mm_result::MmError;
#[cfg(target_os = "windows")]
pub use wave_in::{WaveInBackend, WaveInDevice};
