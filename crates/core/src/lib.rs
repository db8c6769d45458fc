//! Core crate – the lpac invocation layer behind every simdeck front-end.
//!
//! Launches the engine as a subprocess, coalesces bursts of calls per
//! operation, hands it a shared environment and parses its mixed
//! log-lines-plus-JSON output into typed results. It does NOT depend on any
//! front-end, so the CLI and the daemon share exactly the same behaviour.

pub mod client;
pub mod commands;
pub mod config;
pub mod context;
pub mod debounce;
pub mod env;
pub mod error;
pub mod logger;
pub mod platform;
pub mod protocol;
pub mod scenario;
pub mod selection;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use client::{ClientOptions, LpacClient};
pub use commands::CommandRegistry;
pub use config::EngineConfig;
pub use context::AppContext;
pub use error::EngineError;
pub use logger::{ConsoleLogger, LogEntry, Logger, Severity};
pub use types::{CommandResult, ErrorCode, ErrorInfo, Profile, Status};
