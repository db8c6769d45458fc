use crate::debounce::DebounceError;
use crate::traits::RunError;

/// Failure of one engine invocation.
///
/// `Clone` so a debounced outcome can be delivered to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The engine exited with a non-zero status.
    #[error("Command failed: stderr: {stderr}, stdout: {stdout}, code: {code}")]
    Execution {
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// The trailing line was not a JSON document of the expected shape.
    #[error("Failed to parse engine response ({reason}): {line}")]
    Parse { line: String, reason: String },

    /// Valid response whose payload reports failure.
    #[error("engine rejected request: message: {message}, code: {code}")]
    Rejected { code: i64, message: String },

    #[error("failed to launch engine: {0}")]
    Launch(String),

    #[error("invocation abandoned before it settled")]
    Abandoned,
}

impl From<RunError> for EngineError {
    fn from(e: RunError) -> Self {
        EngineError::Launch(e.to_string())
    }
}

impl From<DebounceError> for EngineError {
    fn from(_: DebounceError) -> Self {
        EngineError::Abandoned
    }
}
