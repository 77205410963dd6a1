//! Rendering: JSON export and LLM-optimized markdown context.

pub mod json_export;

pub use json_export::{DEFAULT_MAX_TOKENS, to_json, to_llm_context};
