//! Secret redaction: pattern registry, tokenizer, path anonymizer, engine.

pub mod engine;
pub mod path_anonymizer;
pub mod patterns;
pub mod tokenizer;

pub use engine::{
    MIN_SECRET_LENGTH, PATTERN_TIMEOUT_MS, RedactionEngine, RedactionMatch, RedactionReport,
    create_redaction_engine,
};
pub use path_anonymizer::PathAnonymizer;
pub use patterns::{
    HIGH_PRIORITY_PATTERN_NAMES, MAX_PATTERN_LENGTH, Pattern, PatternConfig, PatternError,
    compile_pattern_safely, custom_pattern, default_patterns, pattern_by_name,
    patterns_by_priority, priority,
};
pub use tokenizer::{MAX_SECRET_LENGTH, Tokenizer};
