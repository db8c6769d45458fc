use crate::platform::TextEncoding;
use std::collections::HashMap;
use std::path::PathBuf;

/// Result type for process-runner operations.
pub type RunResult<T> = Result<T, RunError>;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("engine not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Process launch
// ---------------------------------------------------------------------------

/// Everything needed to launch the engine once.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Store contents captured at launch time.
    pub env: HashMap<String, String>,
    /// When false the child sees only `env`.
    pub inherit_env: bool,
    pub encoding: TextEncoding,
}

/// Decoded outcome of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

#[async_trait::async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run the invocation to completion. A non-zero exit code is NOT an
    /// error at this level.
    async fn run(&self, invocation: &Invocation) -> RunResult<ProcessOutput>;
}
