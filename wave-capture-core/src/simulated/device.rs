//! A capture device driven by test code instead of hardware.
//!
//! The `SimulatedController` plays the role of the driver: whatever thread
//! calls `complete_next` acts as the OS callback context.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::buffers::buffer::{BufferId, CaptureBuffer};
use crate::buffers::completion::CompletionSender;
use crate::models::error::{CaptureError, SubmitError};
use crate::traits::capture_device::CaptureDevice;

struct InFlight {
    buffer: CaptureBuffer,
    filled: usize,
}

#[derive(Default)]
struct SimState {
    sink: Option<CompletionSender>,
    open: bool,
    started: bool,
    in_flight: VecDeque<InFlight>,
    done: HashMap<BufferId, CaptureBuffer>,
    max_in_flight: usize,
    submitted_total: u64,
    completed_total: u64,
    resets: u64,
    fail_next_submit: Option<CaptureError>,
    fail_next_start: Option<CaptureError>,
    fail_next_reset: Option<CaptureError>,
    fail_next_reclaim: Option<CaptureError>,
}

#[derive(Default)]
pub(crate) struct SimShared {
    state: Mutex<SimState>,
    changed: Condvar,
}

impl SimShared {
    pub fn attach(&self, sink: CompletionSender) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if state.open {
            return Err(CaptureError::DeviceIo("device is already allocated".into()));
        }
        state.open = true;
        state.started = false;
        state.sink = Some(sink);
        Ok(())
    }
}

/// Device half of a simulated input; owned by the engine.
pub struct SimulatedDevice {
    shared: Arc<SimShared>,
}

impl SimulatedDevice {
    pub(crate) fn new(shared: Arc<SimShared>) -> Self {
        Self { shared }
    }
}

impl CaptureDevice for SimulatedDevice {
    fn start(&mut self) -> Result<(), CaptureError> {
        let mut state = self.shared.state.lock();
        if let Some(error) = state.fail_next_start.take() {
            return Err(error);
        }
        state.started = true;
        self.shared.changed.notify_all();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.shared.state.lock().started = false;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), CaptureError> {
        let (sink, returned) = {
            let mut state = self.shared.state.lock();
            if let Some(error) = state.fail_next_reset.take() {
                return Err(error);
            }
            state.started = false;
            state.resets += 1;
            let mut returned = Vec::with_capacity(state.in_flight.len());
            while let Some(InFlight { buffer, filled }) = state.in_flight.pop_front() {
                returned.push((buffer.id(), filled));
                state.done.insert(buffer.id(), buffer);
            }
            state.completed_total += returned.len() as u64;
            (state.sink.clone(), returned)
        };
        self.shared.changed.notify_all();

        if let Some(sink) = sink {
            for (id, filled) in returned {
                sink.complete(id, filled);
            }
        }
        Ok(())
    }

    fn submit(&mut self, buffer: CaptureBuffer) -> Result<(), SubmitError> {
        let mut state = self.shared.state.lock();
        if !state.open {
            return Err(SubmitError::new(CaptureError::InvalidHandle, buffer));
        }
        if let Some(error) = state.fail_next_submit.take() {
            return Err(SubmitError::new(error, buffer));
        }
        state.in_flight.push_back(InFlight { buffer, filled: 0 });
        state.submitted_total += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight.len());
        self.shared.changed.notify_all();
        Ok(())
    }

    fn reclaim(&mut self, id: BufferId) -> Result<CaptureBuffer, CaptureError> {
        let mut state = self.shared.state.lock();
        if state.done.contains_key(&id) {
            if let Some(error) = state.fail_next_reclaim.take() {
                return Err(error);
            }
        }
        state
            .done
            .remove(&id)
            .ok_or_else(|| CaptureError::InvalidBuffer(format!("buffer {} is not complete", id)))
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        let mut state = self.shared.state.lock();
        state.open = false;
        state.started = false;
        state.sink = None;
        state.in_flight.clear();
        state.done.clear();
        self.shared.changed.notify_all();
        Ok(())
    }
}

/// Driver half of a simulated input; owned by the test.
#[derive(Clone)]
pub struct SimulatedController {
    shared: Arc<SimShared>,
}

impl SimulatedController {
    pub(crate) fn new(shared: Arc<SimShared>) -> Self {
        Self { shared }
    }

    /// Record `bytes` into the oldest submitted buffer without completing
    /// it. Bytes past the buffer's capacity are discarded. Returns false if
    /// nothing is submitted.
    pub fn record(&self, bytes: &[u8]) -> bool {
        let mut state = self.shared.state.lock();
        let Some(head) = state.in_flight.front_mut() else {
            return false;
        };
        let capacity = head.buffer.capacity();
        let start = head.filled.min(capacity);
        let end = (head.filled + bytes.len()).min(capacity);
        head.buffer.as_mut_slice()[start..end].copy_from_slice(&bytes[..end - start]);
        head.filled = end;
        true
    }

    /// Complete the oldest submitted buffer, reporting `bytes_recorded`.
    /// The buffer is filled with the completion's index (mod 256) so tests
    /// can check ordering. A count larger than the buffer simulates a
    /// misbehaving driver. Returns `None` unless started with a buffer
    /// in flight.
    pub fn complete_next(&self, bytes_recorded: usize) -> Option<BufferId> {
        let (sink, id) = {
            let mut state = self.shared.state.lock();
            if !state.started {
                return None;
            }
            let sink = state.sink.clone()?;
            let InFlight { mut buffer, .. } = state.in_flight.pop_front()?;
            let marker = (state.completed_total % 256) as u8;
            let fill = bytes_recorded.min(buffer.capacity());
            buffer.as_mut_slice()[..fill].fill(marker);
            let id = buffer.id();
            state.done.insert(id, buffer);
            state.completed_total += 1;
            (sink, id)
        };
        self.shared.changed.notify_all();
        sink.complete(id, bytes_recorded);
        Some(id)
    }

    /// Complete the oldest submitted buffer with whatever `record` put in it.
    pub fn complete_recorded(&self) -> Option<BufferId> {
        let (sink, id, filled) = {
            let mut state = self.shared.state.lock();
            if !state.started {
                return None;
            }
            let sink = state.sink.clone()?;
            let InFlight { buffer, filled } = state.in_flight.pop_front()?;
            let id = buffer.id();
            state.done.insert(id, buffer);
            state.completed_total += 1;
            (sink, id, filled)
        };
        self.shared.changed.notify_all();
        sink.complete(id, filled);
        Some(id)
    }

    /// Push a completion the device never produced, for any id.
    pub fn complete_spurious(&self, id: BufferId, bytes_recorded: usize) {
        let sink = self.shared.state.lock().sink.clone();
        if let Some(sink) = sink {
            sink.complete(id, bytes_recorded);
        }
    }

    /// Wait until at least `count` buffers are submitted and capture has
    /// started.
    pub fn wait_for_in_flight(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !(state.started && state.in_flight.len() >= count) {
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                return state.started && state.in_flight.len() >= count;
            }
        }
        true
    }

    pub fn fail_next_submit(&self, error: CaptureError) {
        self.shared.state.lock().fail_next_submit = Some(error);
    }

    pub fn fail_next_start(&self, error: CaptureError) {
        self.shared.state.lock().fail_next_start = Some(error);
    }

    pub fn fail_next_reset(&self, error: CaptureError) {
        self.shared.state.lock().fail_next_reset = Some(error);
    }

    /// Make the next hand-back of a completed buffer fail, as if the driver
    /// refused to release it.
    pub fn fail_next_reclaim(&self, error: CaptureError) {
        self.shared.state.lock().fail_next_reclaim = Some(error);
    }

    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight.len()
    }

    /// Most buffers the device ever held at once.
    pub fn max_in_flight(&self) -> usize {
        self.shared.state.lock().max_in_flight
    }

    pub fn submitted_total(&self) -> u64 {
        self.shared.state.lock().submitted_total
    }

    pub fn resets(&self) -> u64 {
        self.shared.state.lock().resets
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    pub fn is_started(&self) -> bool {
        self.shared.state.lock().started
    }
}
