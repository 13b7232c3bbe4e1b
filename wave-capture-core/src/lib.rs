//! # wave-capture-core
//!
//! Platform-agnostic streaming capture engine.
//!
//! Keeps a fixed number of buffers submitted to an input device, moves
//! completed buffers from the device callback to a dedicated maintenance
//! thread, and delivers each one to the application as an owned
//! `DataChunk`. Platform backends (Windows waveIn) implement the
//! `CaptureBackend`/`CaptureDevice` traits and plug into `CaptureEngine`.
//!
//! ## Architecture
//!
//! ```text
//! wave-capture-core (this crate)
//! ├── traits/     ← CaptureBackend, CaptureDevice, CaptureDelegate
//! ├── models/     ← CaptureError, CaptureConfig, EngineState, WaveFormat, device caps
//! ├── buffers/    ← CaptureBuffer, BufferPool, completion channel
//! ├── engine/     ← CaptureEngine, DeviceHandle, maintenance loop
//! └── simulated/  ← SimulatedBackend for running without hardware
//! ```

pub mod buffers;
pub mod engine;
pub mod models;
pub mod simulated;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use buffers::buffer::{BufferId, BufferState, CaptureBuffer};
pub use buffers::completion::{CompletionRecord, CompletionSender};
pub use buffers::pool::BufferPool;
pub use engine::capture_engine::CaptureEngine;
pub use engine::device_handle::DeviceHandle;
pub use models::capture_models::{DataChunk, EngineStats};
pub use models::config::CaptureConfig;
pub use models::device_models::{describe_manufacturer, manufacturer_name, DeviceSelector, InputDeviceCaps};
pub use models::error::{CaptureError, SubmitError};
pub use models::state::EngineState;
pub use models::wave_format::{WaveFormat, WaveFormatTag};
pub use simulated::backend::SimulatedBackend;
pub use simulated::device::{SimulatedController, SimulatedDevice};
pub use traits::capture_delegate::CaptureDelegate;
pub use traits::capture_device::{CaptureBackend, CaptureDevice};
