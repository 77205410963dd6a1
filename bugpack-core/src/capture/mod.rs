//! Capture collaborators: subprocess runner, environment snapshot,
//! traceback parsing.

pub mod environment;
pub mod runner;
pub mod traceback;

pub use environment::{DEFAULT_ENV_ALLOWLIST, EnvConfig, EnvSnapshot, collect_environment};
pub use runner::{CaptureConfig, CaptureResult, run_command};
pub use traceback::{ParsedTraceback, extract_syntax_error, extract_traceback};
