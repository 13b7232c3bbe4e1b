//! `MMRESULT` handling for the winmm wave input API.
//!
//! Kept free of the `windows` crate so the mapping is testable on any host.

use wave_capture_core::CaptureError;

pub const MMSYSERR_NOERROR: u32 = 0;
pub const MMSYSERR_ERROR: u32 = 1;
pub const MMSYSERR_BADDEVICEID: u32 = 2;
pub const MMSYSERR_ALLOCATED: u32 = 4;
pub const MMSYSERR_INVALHANDLE: u32 = 5;
pub const MMSYSERR_NODRIVER: u32 = 6;
pub const MMSYSERR_NOMEM: u32 = 7;
pub const MMSYSERR_INVALPARAM: u32 = 11;
pub const WAVERR_BADFORMAT: u32 = 32;
pub const WAVERR_STILLPLAYING: u32 = 33;
pub const WAVERR_UNPREPARED: u32 = 34;

/// A failed winmm call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed: MMRESULT {code}")]
pub struct MmError {
    pub operation: &'static str,
    pub code: u32,
}

impl MmError {
    /// Short name of the error code, when it is one winmm documents for
    /// wave input.
    pub fn code_name(&self) -> Option<&'static str> {
        let name = match self.code {
            MMSYSERR_ERROR => "MMSYSERR_ERROR",
            MMSYSERR_BADDEVICEID => "MMSYSERR_BADDEVICEID",
            MMSYSERR_ALLOCATED => "MMSYSERR_ALLOCATED",
            MMSYSERR_INVALHANDLE => "MMSYSERR_INVALHANDLE",
            MMSYSERR_NODRIVER => "MMSYSERR_NODRIVER",
            MMSYSERR_NOMEM => "MMSYSERR_NOMEM",
            MMSYSERR_INVALPARAM => "MMSYSERR_INVALPARAM",
            WAVERR_BADFORMAT => "WAVERR_BADFORMAT",
            WAVERR_STILLPLAYING => "WAVERR_STILLPLAYING",
            WAVERR_UNPREPARED => "WAVERR_UNPREPARED",
            _ => return None,
        };
        Some(name)
    }
}

/// Turn an `MMRESULT` into a `Result`.
pub fn check(operation: &'static str, code: u32) -> Result<(), MmError> {
    if code == MMSYSERR_NOERROR {
        Ok(())
    } else {
        Err(MmError { operation, code })
    }
}

impl From<MmError> for CaptureError {
    fn from(error: MmError) -> Self {
        match error.code {
            MMSYSERR_BADDEVICEID | MMSYSERR_NODRIVER => CaptureError::DeviceUnavailable,
            WAVERR_BADFORMAT => CaptureError::UnsupportedFormat,
            MMSYSERR_INVALHANDLE => CaptureError::InvalidHandle,
            _ => CaptureError::DeviceIo(error.to_string()),
        }
    }
}
