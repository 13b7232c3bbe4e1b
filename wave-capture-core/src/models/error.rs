use std::fmt;

use thiserror::Error;

use crate::buffers::buffer::CaptureBuffer;

/// Errors that can occur during capture operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("device not available")]
    DeviceUnavailable,

    #[error("format not supported by device")]
    UnsupportedFormat,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("device is already open")]
    AlreadyOpen,

    #[error("capture has already been started")]
    AlreadyStarted,

    #[error("device is not open")]
    NotOpen,

    #[error("capture is still running")]
    StillRunning,

    #[error("device I/O error: {0}")]
    DeviceIo(String),

    #[error("device handle is no longer valid")]
    InvalidHandle,

    #[error("invalid buffer: {0}")]
    InvalidBuffer(String),

    #[error("buffer overrun: {recorded} bytes recorded into a {capacity}-byte buffer")]
    BufferOverrun { recorded: usize, capacity: usize },

    #[error("engine failed: {0}")]
    EngineFailed(String),

    #[error("delegate panicked in {0}")]
    DelegatePanicked(String),
}

/// Error returned when a device refuses a buffer. It wraps the device error
/// and hands the buffer back so it can be returned to the pool.
#[derive(Error)]
#[error("{}", self.error)]
pub struct SubmitError {
    pub error: CaptureError,
    pub buffer: CaptureBuffer,
}

impl SubmitError {
    pub fn new(error: CaptureError, buffer: CaptureBuffer) -> Self {
        Self { error, buffer }
    }
}

impl fmt::Debug for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.error, f)
    }
}
