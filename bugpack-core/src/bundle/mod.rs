//! The `.bugbundle` container: schema, writer, reader, and error kinds.
//!
//! A bundle is a compressed ZIP archive with a fixed internal layout:
//!
//! ```text
//! manifest.json       canonical JSON of the BugBundle
//! checksum.sha256     "<hex-digest>  manifest.json\n"
//! stdout.txt          optional, duplicates capture.stdout
//! stderr.txt          optional
//! attachments/<name>  zero to MAX_ATTACHMENTS auxiliary files
//! ```

pub mod error;
pub mod reader;
pub mod schema;
pub mod writer;

pub use error::{BundleError, FieldError, Result};
pub use reader::{get_attachment, list_attachments, read_bundle, verify_integrity};
pub use schema::{
    BUNDLE_VERSION, BugBundle, BundleMetadata, CaptureOutput, Environment, Frame, GitInfo,
    PackageInfo, Traceback,
};
pub use writer::{
    MAX_ATTACHMENT_SIZE, MAX_ATTACHMENTS, MAX_BUNDLE_SIZE, ValidationResult, add_attachment,
    create_bundle, validate_bundle,
};

pub(crate) const MANIFEST_FILENAME: &str = "manifest.json";
pub(crate) const STDOUT_FILENAME: &str = "stdout.txt";
pub(crate) const STDERR_FILENAME: &str = "stderr.txt";
pub(crate) const CHECKSUM_FILENAME: &str = "checksum.sha256";
pub(crate) const ATTACHMENTS_DIR: &str = "attachments";
