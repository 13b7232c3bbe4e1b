use std::fmt;

use crate::models::error::CaptureError;

/// Identity of a capture buffer, unique within one engine.
///
/// Devices echo it back in completions; backends that must round-trip it
/// through a native user-data field use `raw`/`from_raw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u32);

impl BufferId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ownership state of a buffer.
///
/// ```text
/// Free ──acquire──▶ Submitted ──complete──▶ Completed ──recycle──▶ Free
///   ▲                   │
///   └────unsubmit───────┘   (device refused the buffer)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// In the pool, owned by the engine.
    Free,
    /// Handed to the device; only the device may touch its memory.
    Submitted,
    /// Reported full by the device, waiting to be drained.
    Completed,
}

/// A fixed-size capture slot.
///
/// Whoever holds the value owns the memory: the pool while free, the device
/// while submitted, the maintenance loop while draining.
pub struct CaptureBuffer {
    id: BufferId,
    data: Box<[u8]>,
}

impl CaptureBuffer {
    pub(crate) fn new(id: BufferId, capacity: usize) -> Self {
        Self {
            id,
            data: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Writable view for the device filling the buffer.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Raw pointer for native drivers. The memory does not move while the
    /// buffer is alive, even if the `CaptureBuffer` value itself is moved.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }

    /// The first `recorded` bytes, or `BufferOverrun` if the device claims
    /// more than the buffer holds.
    pub fn recorded(&self, recorded: usize) -> Result<&[u8], CaptureError> {
        self.data
            .get(..recorded)
            .ok_or(CaptureError::BufferOverrun {
                recorded,
                capacity: self.data.len(),
            })
    }
}

impl fmt::Debug for CaptureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureBuffer")
            .field("id", &self.id)
            .field("capacity", &self.data.len())
            .finish()
    }
}
