use super::error::CaptureError;

/// Capture engine state machine.
///
/// State transitions:
/// ```text
/// closed → open → capturing → stopping → open → closed
///                     ↓
///                  failed → (stop) → (close) → closed
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Closed,
    Open,
    Capturing,
    Stopping,
    Failed(CaptureError),
}

impl EngineState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The fatal error, if the engine has failed.
    pub fn failure(&self) -> Option<&CaptureError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::Capturing => "capturing",
            Self::Stopping => "stopping",
            Self::Failed(_) => "failed",
        }
    }
}
