/// Engine state machine.
///
/// State transitions:
/// ```text
/// idle → capturing → idle
///   ↓        ↓
///      disposed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Capturing,
    Disposed,
}

impl EngineState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }
}
