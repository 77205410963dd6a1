//! bugpack-core: safe-to-share crash bundles.
//!
//! Captures the output of a failing subprocess, scrubs every recognizable
//! secret in a correlation-preserving way, collates the scrubbed data and
//! environmental context into a tamper-evident `.bugbundle` container, and
//! reads that container back for human or machine consumption.
//!
//! The three core subsystems:
//!
//! - [`redact`] — multi-pattern secret scanner with a session-scoped
//!   tokenizer and an ordered path anonymizer.
//! - [`bundle`] — the compressed container format with a content-addressed
//!   integrity check and path-traversal defenses on both read and write.
//! - [`capture`] — subprocess runner, environment snapshot, and traceback
//!   parsing feeding the bundle schema.

pub mod bundle;
pub mod capture;
pub mod config;
pub mod redact;
pub mod render;

pub use bundle::{
    BUNDLE_VERSION, BugBundle, BundleError, BundleMetadata, CaptureOutput, Environment, Frame,
    GitInfo, PackageInfo, Traceback, add_attachment, create_bundle, get_attachment,
    list_attachments, read_bundle, validate_bundle, verify_integrity,
};
pub use config::{BugpackConfig, load_config};
pub use redact::{
    PatternConfig, RedactionEngine, RedactionReport, Tokenizer, create_redaction_engine,
};
