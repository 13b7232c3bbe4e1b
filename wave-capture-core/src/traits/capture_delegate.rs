use crate::models::capture_models::DataChunk;
use crate::models::error::CaptureError;
use crate::models::state::EngineState;

/// Event delegate for capture engine notifications.
///
/// `on_data_ready` and errors found while streaming are called from the
/// engine's maintenance thread, never from the device callback. Lifecycle
/// state changes are called from whichever thread drove the transition.
/// Implementations should hand data off quickly: the next completion is not
/// drained until `on_data_ready` returns.
pub trait CaptureDelegate: Send + Sync {
    /// Called once per completed buffer, in device completion order.
    fn on_data_ready(&self, chunk: DataChunk);

    /// Called when the engine state changes.
    fn on_state_changed(&self, _state: &EngineState) {}

    /// Called for fatal engine errors and for per-buffer errors that were
    /// skipped over.
    fn on_error(&self, _error: &CaptureError) {}
}
