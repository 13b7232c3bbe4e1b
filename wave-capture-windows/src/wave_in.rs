//! winmm wave input backend.
//!
//! Opens a device with a `CALLBACK_FUNCTION` callback. The callback only
//! forwards `WIM_DATA` completions to the engine's `CompletionSender`; every
//! other winmm call happens on the engine's threads with the device lock
//! held, never from inside the callback.

use std::collections::HashMap;
use std::mem::size_of;

use windows::core::PSTR;
use windows::Win32::Media::Audio::*;

use wave_capture_core::{
    BufferId, CaptureBackend, CaptureBuffer, CaptureDevice, CaptureError, CompletionSender,
    DeviceSelector, InputDeviceCaps, SubmitError, WaveFormat,
};

use crate::caps::{raw_device_id, RawInputCaps};
use crate::mm_result::{check, MmError, MMSYSERR_NOERROR, WAVERR_BADFORMAT};

const HEADER_SIZE: u32 = size_of::<WAVEHDR>() as u32;

/// Enumerates and opens winmm wave input devices.
#[derive(Debug, Default)]
pub struct WaveInBackend;

impl WaveInBackend {
    pub fn new() -> Self {
        Self
    }

    /// Capabilities of one device by index.
    pub fn device_caps(&self, device_id: u32) -> Result<InputDeviceCaps, CaptureError> {
        // SAFETY: WAVEINCAPSW is plain data; all-zero is a valid value.
        let mut caps: WAVEINCAPSW = unsafe { std::mem::zeroed() };
        let code = unsafe {
            waveInGetDevCapsW(
                device_id as usize,
                &mut caps,
                size_of::<WAVEINCAPSW>() as u32,
            )
        };
        check("waveInGetDevCaps", code)?;

        let name = caps.szPname;
        Ok(RawInputCaps {
            manufacturer_id: caps.wMid,
            product_id: caps.wPid,
            driver_version: caps.vDriverVersion,
            name: &name,
            channels: caps.wChannels,
        }
        .into_caps(device_id))
    }
}

impl CaptureBackend for WaveInBackend {
    type Device = WaveInDevice;

    fn devices(&self) -> Result<Vec<InputDeviceCaps>, CaptureError> {
        let count = unsafe { waveInGetNumDevs() };
        (0..count).map(|id| self.device_caps(id)).collect()
    }

    fn supports_format(
        &self,
        selector: DeviceSelector,
        format: &WaveFormat,
    ) -> Result<bool, CaptureError> {
        let wfx = wave_format_ex(format);
        let code = unsafe {
            waveInOpen(
                None,
                raw_device_id(selector),
                &wfx,
                None,
                None,
                WAVE_FORMAT_QUERY,
            )
        };
        match code {
            MMSYSERR_NOERROR => Ok(true),
            WAVERR_BADFORMAT => Ok(false),
            code => Err(MmError {
                operation: "waveInOpen(query)",
                code,
            }
            .into()),
        }
    }

    fn open(
        &self,
        selector: DeviceSelector,
        format: &WaveFormat,
        completions: CompletionSender,
    ) -> Result<WaveInDevice, CaptureError> {
        let wfx = wave_format_ex(format);
        let context = Box::into_raw(Box::new(CallbackContext { sink: completions }));
        let mut handle = HWAVEIN::default();

        let code = unsafe {
            waveInOpen(
                Some(&mut handle),
                raw_device_id(selector),
                &wfx,
                Some(wave_in_proc as *const () as usize),
                Some(context as usize),
                CALLBACK_FUNCTION,
            )
        };
        if let Err(e) = check("waveInOpen", code) {
            // SAFETY: the device was not opened, so the callback never saw
            // the context.
            drop(unsafe { Box::from_raw(context) });
            return Err(e.into());
        }

        log::debug!("waveInOpen succeeded for device {}", selector);
        Ok(WaveInDevice {
            handle,
            context,
            in_flight: HashMap::new(),
            closed: false,
        })
    }
}

struct CallbackContext {
    sink: CompletionSender,
}

/// A buffer the driver currently holds. Boxed so the header address stays
/// fixed while the driver writes into it.
struct InFlight {
    header: WAVEHDR,
    buffer: CaptureBuffer,
}

/// An open wave input device.
pub struct WaveInDevice {
    handle: HWAVEIN,
    context: *mut CallbackContext,
    in_flight: HashMap<BufferId, Box<InFlight>>,
    closed: bool,
}

// SAFETY: the handle and header pointers are only used behind the engine's
// device lock. The callback context is only read by the driver callback and
// freed after waveInClose.
unsafe impl Send for WaveInDevice {}

impl WaveInDevice {
    /// Put an entry back after the driver refused to let go of it.
    fn keep(&mut self, id: BufferId, entry: Box<InFlight>) {
        self.in_flight.insert(id, entry);
    }
}

impl CaptureDevice for WaveInDevice {
    fn start(&mut self) -> Result<(), CaptureError> {
        check("waveInStart", unsafe { waveInStart(self.handle) })?;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        check("waveInStop", unsafe { waveInStop(self.handle) })?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), CaptureError> {
        check("waveInReset", unsafe { waveInReset(self.handle) })?;
        Ok(())
    }

    fn submit(&mut self, mut buffer: CaptureBuffer) -> Result<(), SubmitError> {
        let id = buffer.id();
        let Ok(length) = u32::try_from(buffer.capacity()) else {
            let error = CaptureError::InvalidBuffer(format!(
                "buffer {} is too large for the driver ({} bytes)",
                id,
                buffer.capacity()
            ));
            return Err(SubmitError::new(error, buffer));
        };
        // SAFETY: WAVEHDR is plain data; all-zero is a valid value.
        let mut header: WAVEHDR = unsafe { std::mem::zeroed() };
        header.lpData = PSTR(buffer.as_mut_ptr());
        header.dwBufferLength = length;
        header.dwUser = id.raw() as usize;

        // The buffer's storage is heap-allocated, so moving it into the box
        // leaves `lpData` valid.
        let mut entry = Box::new(InFlight { header, buffer });
        let header: *mut WAVEHDR = &mut entry.header;

        unsafe {
            if let Err(e) = check("waveInPrepareHeader", waveInPrepareHeader(self.handle, header, HEADER_SIZE)) {
                return Err(SubmitError::new(e.into(), entry.buffer));
            }
            if let Err(e) = check("waveInAddBuffer", waveInAddBuffer(self.handle, header, HEADER_SIZE)) {
                waveInUnprepareHeader(self.handle, header, HEADER_SIZE);
                return Err(SubmitError::new(e.into(), entry.buffer));
            }
        }

        self.in_flight.insert(id, entry);
        Ok(())
    }

    fn reclaim(&mut self, id: BufferId) -> Result<CaptureBuffer, CaptureError> {
        let mut entry = self
            .in_flight
            .remove(&id)
            .ok_or_else(|| CaptureError::InvalidBuffer(format!("buffer {} is not at the device", id)))?;

        let code = unsafe { waveInUnprepareHeader(self.handle, &mut entry.header, HEADER_SIZE) };
        if let Err(e) = check("waveInUnprepareHeader", code) {
            self.keep(id, entry);
            return Err(e.into());
        }
        Ok(entry.buffer)
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = check("waveInReset", unsafe { waveInReset(self.handle) }) {
            log::warn!("{}", e);
        }
        for (id, mut entry) in self.in_flight.drain() {
            let code = unsafe { waveInUnprepareHeader(self.handle, &mut entry.header, HEADER_SIZE) };
            if let Err(e) = check("waveInUnprepareHeader", code) {
                // The driver may still write into it.
                log::error!("Leaking buffer {}: {}", id, e);
                std::mem::forget(entry);
            }
        }

        let closed = check("waveInClose", unsafe { waveInClose(self.handle) });
        match closed {
            Ok(()) => {
                // SAFETY: the device is closed, so the callback can no
                // longer run.
                drop(unsafe { Box::from_raw(self.context) });
                Ok(())
            }
            Err(e) => {
                log::error!("Leaking callback context: {}", e);
                Err(e.into())
            }
        }
    }
}

impl Drop for WaveInDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close wave input device on drop: {}", e);
        }
    }
}

fn wave_format_ex(format: &WaveFormat) -> WAVEFORMATEX {
    WAVEFORMATEX {
        wFormatTag: format.format_tag.code(),
        nChannels: format.channels,
        nSamplesPerSec: format.samples_per_second,
        nAvgBytesPerSec: format.average_bytes_per_second(),
        nBlockAlign: format.block_align(),
        wBitsPerSample: format.bits_per_sample,
        cbSize: 0,
    }
}

/// Runs on a driver thread. Must not block beyond the queue lock, log, or
/// call any waveIn function.
unsafe extern "system" fn wave_in_proc(
    _hwi: HWAVEIN,
    msg: u32,
    instance: usize,
    param1: usize,
    _param2: usize,
) {
    if msg != WIM_DATA || instance == 0 || param1 == 0 {
        return;
    }
    let context = &*(instance as *const CallbackContext);
    let header = &*(param1 as *const WAVEHDR);
    context.sink.complete(
        BufferId::from_raw(header.dwUser as u32),
        header.dwBytesRecorded as usize,
    );
}
