//! Structured error kinds for bundle operations.
//!
//! Every structural failure has its own kind so callers can distinguish
//! "missing" from "corrupt" from "schema-wrong" without string matching.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single field-level schema validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path to the offending field, e.g. `capture.exit_code`.
    pub path: String,
    pub reason: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(FieldError::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from bundle reading, writing, and attachment handling.
#[derive(Debug, Error)]
pub enum BundleError {
    /// Referenced bundle file does not exist.
    #[error("bundle not found: {0}")]
    NotFound(PathBuf),

    /// Archive cannot be opened or is missing required entries.
    #[error("bundle corrupt: {0}")]
    Corrupt(String),

    /// Manifest JSON is malformed.
    #[error("invalid JSON in manifest at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// Manifest parses but does not match the schema.
    #[error("schema validation failed: {}", join_fields(.0))]
    Schema(Vec<FieldError>),

    /// Checksum present but does not match the manifest bytes.
    #[error("checksum mismatch, bundle may be tampered")]
    Integrity,

    /// Manifest declares a version with no migration path.
    #[error("unsupported bundle version: {0}")]
    UnsupportedVersion(String),

    /// Computed bundle size exceeds the limit.
    #[error("bundle size ({size} bytes) exceeds limit ({limit} bytes)")]
    TooLarge { size: u64, limit: u64 },

    /// Named attachment absent.
    #[error("attachment not found: {0}")]
    AttachmentNotFound(String),

    /// Attachment rejected: extension, size, or count limit.
    #[error("invalid attachment: {0}")]
    AttachmentInvalid(String),

    /// Path traversal, absolute path, or otherwise suspicious entry name.
    #[error("security violation: {0}")]
    Security(String),

    /// Output path exists and overwrite was not requested.
    #[error("bundle already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bundle operations.
pub type Result<T> = std::result::Result<T, BundleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_aggregates_fields() {
        let err = BundleError::Schema(vec![
            FieldError {
                path: "metadata.version".to_string(),
                reason: "expected string".to_string(),
            },
            FieldError {
                path: "capture.exit_code".to_string(),
                reason: "expected integer".to_string(),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "schema validation failed: metadata.version: expected string; \
             capture.exit_code: expected integer"
        );
    }
}
