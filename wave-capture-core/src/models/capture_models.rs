use crate::buffers::buffer::BufferId;

/// One completed buffer's worth of captured bytes, owned by the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    /// Position in the delivered stream since the last `start`.
    pub sequence: u64,
    /// The buffer the bytes were recorded into.
    pub buffer_id: BufferId,
    pub data: Vec<u8>,
}

impl DataChunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Counters for debugging buffer flow through an engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub buffers_allocated: u64,
    pub buffers_released: u64,
    pub buffers_submitted: u64,
    pub completions_drained: u64,
    pub chunks_delivered: u64,
    pub empty_completions: u64,
    pub rejected_completions: u64,
    /// Buffers at the device or waiting to be drained right now.
    pub outstanding: usize,
    pub peak_outstanding: usize,
}

impl EngineStats {
    /// Buffers currently alive (allocated and not yet released).
    pub fn live_buffers(&self) -> u64 {
        self.buffers_allocated.saturating_sub(self.buffers_released)
    }
}
