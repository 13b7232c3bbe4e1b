//! Hand-off path from the device callback to the maintenance loop.
//!
//! The device callback runs on a thread we do not control and must not
//! block or call back into the device. All it does is push a
//! `CompletionRecord` under a short lock and wake the loop.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::buffer::BufferId;
use crate::models::capture_models::EngineStats;

/// One buffer reported full by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRecord {
    pub buffer_id: BufferId,
    pub bytes_recorded: usize,
}

/// State shared between the callback, the maintenance loop and the engine.
/// Every field is only touched under the one lock.
#[derive(Debug, Default)]
pub(crate) struct LoopState {
    pub completions: VecDeque<CompletionRecord>,
    /// Buffers submitted and not yet drained.
    pub outstanding: usize,
    pub running: bool,
    /// Set when the device will never return its buffers; ends the final drain.
    pub abandoned: bool,
    pub stats: EngineStats,
}

#[derive(Debug, Default)]
pub(crate) struct CompletionChannel {
    state: Mutex<LoopState>,
    wake: Condvar,
}

impl CompletionChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock()
    }

    pub fn wait_for(&self, guard: &mut MutexGuard<'_, LoopState>, timeout: std::time::Duration) -> bool {
        self.wake.wait_for(guard, timeout).timed_out()
    }

    pub fn notify(&self) {
        self.wake.notify_all();
    }

    /// Prepare for a new capture run. The queue is sized so the callback
    /// never reallocates while pushing.
    pub fn arm(&self, depth: usize) {
        let mut state = self.state.lock();
        state.completions.clear();
        state.completions.reserve(depth);
        state.outstanding = 0;
        state.running = true;
        state.abandoned = false;
    }

    /// Clear `running` and wake the loop.
    pub fn disarm(&self) {
        self.state.lock().running = false;
        self.wake.notify_all();
    }

    /// Give up waiting for buffers the device will never return.
    pub fn abandon(&self) {
        {
            let mut state = self.state.lock();
            state.running = false;
            state.abandoned = true;
        }
        self.wake.notify_all();
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state.lock();
        EngineStats {
            outstanding: state.outstanding,
            ..state.stats.clone()
        }
    }
}

/// The device's end of the completion channel.
///
/// Cheap to clone; safe to call from a driver callback.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    channel: Arc<CompletionChannel>,
}

impl CompletionSender {
    pub(crate) fn new(channel: Arc<CompletionChannel>) -> Self {
        Self { channel }
    }

    /// Report that `buffer_id` is full with `bytes_recorded` bytes
    /// (possibly zero, e.g. after a reset).
    pub fn complete(&self, buffer_id: BufferId, bytes_recorded: usize) {
        self.channel.lock().completions.push_back(CompletionRecord {
            buffer_id,
            bytes_recorded,
        });
        self.channel.notify();
    }
}
