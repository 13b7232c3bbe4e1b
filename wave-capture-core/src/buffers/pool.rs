use std::collections::HashMap;

use super::buffer::{BufferId, BufferState, CaptureBuffer};
use crate::models::error::CaptureError;

/// Arena tracking every buffer an engine owns, wherever it currently is.
///
/// Free buffers are stored here; submitted and completed buffers are only
/// tracked by id while the device or the maintenance loop holds them.
/// State transitions are the only mutation points, so a buffer can never be
/// handed out twice or recycled while the device still holds it.
#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    depth: usize,
    states: HashMap<BufferId, BufferState>,
    free: Vec<CaptureBuffer>,
    next_id: u32,
    allocated: u64,
    released: u64,
}

impl BufferPool {
    /// `capacity` is the byte size of each buffer, `depth` the number of
    /// free buffers worth keeping around.
    pub fn new(capacity: usize, depth: usize) -> Self {
        Self {
            capacity,
            depth,
            states: HashMap::with_capacity(depth),
            free: Vec::with_capacity(depth),
            next_id: 0,
            allocated: 0,
            released: 0,
        }
    }

    pub fn buffer_capacity(&self) -> usize {
        self.capacity
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Take a buffer for submission, reusing a free one when possible.
    /// The buffer is marked `Submitted`.
    pub fn acquire(&mut self) -> CaptureBuffer {
        let buffer = match self.free.pop() {
            Some(buffer) => buffer,
            None => {
                let id = BufferId::from_raw(self.next_id);
                self.next_id = self.next_id.wrapping_add(1);
                self.allocated += 1;
                CaptureBuffer::new(id, self.capacity)
            }
        };
        self.states.insert(buffer.id(), BufferState::Submitted);
        buffer
    }

    /// Take back a buffer the device refused.
    pub fn unsubmit(&mut self, buffer: CaptureBuffer) -> Result<(), CaptureError> {
        self.transition(buffer.id(), BufferState::Submitted, BufferState::Free)?;
        self.store_free(buffer);
        Ok(())
    }

    /// Record that the device reported `id` full.
    pub fn complete(&mut self, id: BufferId) -> Result<(), CaptureError> {
        self.transition(id, BufferState::Submitted, BufferState::Completed)
    }

    /// Return a drained buffer. It is released instead of pooled when the
    /// pool already holds `depth` free buffers.
    pub fn recycle(&mut self, buffer: CaptureBuffer) -> Result<(), CaptureError> {
        self.transition(buffer.id(), BufferState::Completed, BufferState::Free)?;
        self.store_free(buffer);
        Ok(())
    }

    /// Drop the record of a buffer whose memory was lost with the device.
    pub fn forget(&mut self, id: BufferId) {
        if self.states.remove(&id).is_some() {
            self.released += 1;
        }
    }

    pub fn state(&self, id: BufferId) -> Option<BufferState> {
        self.states.get(&id).copied()
    }

    pub fn count(&self, state: BufferState) -> usize {
        self.states.values().filter(|&&s| s == state).count()
    }

    /// Buffers alive in any state.
    pub fn live(&self) -> usize {
        self.states.len()
    }

    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    pub fn released(&self) -> u64 {
        self.released
    }

    /// Adopt a new buffer size and depth. Free buffers of the wrong size
    /// and free buffers beyond the new depth are released.
    pub fn resize(&mut self, capacity: usize, depth: usize) -> usize {
        let mut dropped = 0;
        if capacity != self.capacity {
            self.capacity = capacity;
            dropped += self.release_free();
        }
        self.depth = depth;
        while self.free.len() > depth {
            if let Some(buffer) = self.free.pop() {
                self.release(buffer.id());
                dropped += 1;
            }
        }
        dropped
    }

    /// Release every free buffer.
    pub fn release_free(&mut self) -> usize {
        let free = std::mem::take(&mut self.free);
        let count = free.len();
        for buffer in free {
            self.release(buffer.id());
        }
        count
    }

    /// Forget every buffer still marked as held by the device or the loop.
    /// Used at close, after the device has dropped whatever it still held.
    pub fn abandon_outstanding(&mut self) -> usize {
        let ids: Vec<BufferId> = self
            .states
            .iter()
            .filter(|(_, &state)| state != BufferState::Free)
            .map(|(&id, _)| id)
            .collect();
        for &id in &ids {
            self.forget(id);
        }
        ids.len()
    }

    fn store_free(&mut self, buffer: CaptureBuffer) {
        if buffer.capacity() != self.capacity || self.free.len() >= self.depth {
            self.release(buffer.id());
        } else {
            self.free.push(buffer);
        }
    }

    fn release(&mut self, id: BufferId) {
        self.states.remove(&id);
        self.released += 1;
    }

    fn transition(
        &mut self,
        id: BufferId,
        from: BufferState,
        to: BufferState,
    ) -> Result<(), CaptureError> {
        match self.states.get_mut(&id) {
            Some(state) if *state == from => {
                *state = to;
                Ok(())
            }
            Some(state) => Err(CaptureError::InvalidBuffer(format!(
                "buffer {} is {:?}, expected {:?}",
                id, state, from
            ))),
            None => Err(CaptureError::InvalidBuffer(format!("unknown buffer {}", id))),
        }
    }
}
