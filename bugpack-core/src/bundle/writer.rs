//! Bundle writer: create `.bugbundle` files, add attachments, validate.
//!
//! Everything is validated before any byte touches disk, so a failed write
//! leaves no partial file in the common case.

use crate::bundle::error::{BundleError, Result};
use crate::bundle::schema::BugBundle;
use crate::bundle::{ATTACHMENTS_DIR, CHECKSUM_FILENAME, MANIFEST_FILENAME, STDERR_FILENAME, STDOUT_FILENAME};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Maximum total bundle payload size.
pub const MAX_BUNDLE_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum size of a single attachment.
pub const MAX_ATTACHMENT_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum number of attachments per bundle.
pub const MAX_ATTACHMENTS: usize = 20;

/// Attachment extensions accepted by [`add_attachment`].
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    ".txt", ".log", ".yaml", ".yml", ".json", ".toml", ".ini", ".cfg", ".md", ".rst",
];

/// Non-destructive bundle inspection verdict. Never an error.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn map_zip_err(e: zip::result::ZipError) -> BundleError {
    match e {
        zip::result::ZipError::Io(io) => BundleError::Io(io),
        other => BundleError::Corrupt(other.to_string()),
    }
}

/// Sanitize an attachment filename to prevent path traversal: basename
/// only, `..` collapsed, everything outside `[A-Za-z0-9._-]` replaced.
fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .replace("..", "_");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

fn ensure_unique_name(name: &str, existing: &HashSet<String>) -> String {
    if !existing.contains(name) {
        return name.to_string();
    }

    let (base, ext) = split_extension(name);
    let mut counter = 1;
    loop {
        let candidate = format!("{base}_{counter}{ext}");
        if !existing.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Create a `.bugbundle` file at `path`.
///
/// With `overwrite = false` an existing file is an error. The aggregate
/// size (manifest + checksum + stdout + stderr) is checked against
/// [`MAX_BUNDLE_SIZE`] before anything is written.
pub fn create_bundle(bundle: &BugBundle, path: &Path, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        return Err(BundleError::AlreadyExists(path.to_path_buf()));
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let manifest_bytes = bundle
        .to_canonical_json()
        .map_err(|e| BundleError::Corrupt(format!("manifest serialization failed: {e}")))?;

    let checksum = compute_checksum(&manifest_bytes);
    let checksum_content = format!("{checksum}  {MANIFEST_FILENAME}\n");

    let stdout_content = bundle.capture.stdout.as_str();
    let stderr_content = bundle.capture.stderr.as_str();

    let total_size = manifest_bytes.len() as u64
        + checksum_content.len() as u64
        + stdout_content.len() as u64
        + stderr_content.len() as u64;

    if total_size > MAX_BUNDLE_SIZE {
        return Err(BundleError::TooLarge {
            size: total_size,
            limit: MAX_BUNDLE_SIZE,
        });
    }

    // Write through a temp file in the target directory so a failed write
    // never leaves a partial bundle behind.
    let temp_path = path.with_file_name(format!(".{}.tmp", uuid::Uuid::new_v4()));
    let written = write_archive(
        &temp_path,
        &manifest_bytes,
        &checksum_content,
        stdout_content,
        stderr_content,
    );
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    fs::rename(&temp_path, path)?;

    debug!(path = %path.display(), size = total_size, "bundle written");
    Ok(())
}

fn write_archive(
    path: &Path,
    manifest_bytes: &[u8],
    checksum_content: &str,
    stdout_content: &str,
    stderr_content: &str,
) -> Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(MANIFEST_FILENAME, options).map_err(map_zip_err)?;
    zip.write_all(manifest_bytes)?;

    zip.start_file(CHECKSUM_FILENAME, options).map_err(map_zip_err)?;
    zip.write_all(checksum_content.as_bytes())?;

    if !stdout_content.is_empty() {
        zip.start_file(STDOUT_FILENAME, options).map_err(map_zip_err)?;
        zip.write_all(stdout_content.as_bytes())?;
    }

    if !stderr_content.is_empty() {
        zip.start_file(STDERR_FILENAME, options).map_err(map_zip_err)?;
        zip.write_all(stderr_content.as_bytes())?;
    }

    zip.finish().map_err(map_zip_err)?;
    Ok(())
}

/// Add a text attachment to an existing bundle.
///
/// Returns the final entry name, which may carry a `_1`, `_2`, ... suffix
/// when the sanitized name collides with an existing attachment.
pub fn add_attachment(bundle_path: &Path, name: &str, content: &str) -> Result<String> {
    if !bundle_path.exists() {
        return Err(BundleError::NotFound(bundle_path.to_path_buf()));
    }

    let safe_name = sanitize_filename(name);

    let (_, ext) = split_extension(&safe_name);
    let ext_lower = ext.to_lowercase();
    if !ALLOWED_EXTENSIONS.contains(&ext_lower.as_str()) {
        return Err(BundleError::AttachmentInvalid(format!(
            "extension '{ext_lower}' not allowed"
        )));
    }

    let content_bytes = content.as_bytes();
    if content_bytes.len() as u64 > MAX_ATTACHMENT_SIZE {
        return Err(BundleError::AttachmentInvalid(format!(
            "attachment size ({} bytes) exceeds limit ({MAX_ATTACHMENT_SIZE} bytes)",
            content_bytes.len()
        )));
    }

    let existing = existing_attachments(bundle_path)?;
    if existing.len() >= MAX_ATTACHMENTS {
        return Err(BundleError::AttachmentInvalid(format!(
            "maximum attachments ({MAX_ATTACHMENTS}) reached"
        )));
    }

    let final_name = ensure_unique_name(&safe_name, &existing);

    let file = OpenOptions::new().read(true).write(true).open(bundle_path)?;
    let mut zip = ZipWriter::new_append(file).map_err(map_zip_err)?;
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(format!("{ATTACHMENTS_DIR}/{final_name}"), options)
        .map_err(map_zip_err)?;
    zip.write_all(content_bytes)?;
    zip.finish().map_err(map_zip_err)?;

    Ok(final_name)
}

fn existing_attachments(bundle_path: &Path) -> Result<HashSet<String>> {
    let file = File::open(bundle_path)?;
    let archive = ZipArchive::new(file).map_err(map_zip_err)?;
    let prefix = format!("{ATTACHMENTS_DIR}/");
    Ok(archive
        .file_names()
        .filter_map(|n| n.strip_prefix(&prefix))
        .filter(|n| !n.is_empty())
        .map(String::from)
        .collect())
}

/// Inspect a bundle without failing: returns a structured verdict with
/// errors (invalid) and warnings (suspicious but readable).
pub fn validate_bundle(path: &Path) -> ValidationResult {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    if !path.exists() {
        return ValidationResult {
            valid: false,
            errors: vec![format!("bundle not found: {}", path.display())],
            warnings,
        };
    }

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            return ValidationResult {
                valid: false,
                errors: vec![format!("error reading bundle: {e}")],
                warnings,
            };
        }
    };

    let mut archive = match ZipArchive::new(file) {
        Ok(archive) => archive,
        Err(e) => {
            return ValidationResult {
                valid: false,
                errors: vec![format!("invalid archive: {e}")],
                warnings,
            };
        }
    };

    let names: Vec<String> = archive.file_names().map(String::from).collect();

    if !names.iter().any(|n| n == MANIFEST_FILENAME) {
        errors.push(format!("missing {MANIFEST_FILENAME}"));
    }

    if !names.iter().any(|n| n == CHECKSUM_FILENAME) {
        warnings.push(format!("missing {CHECKSUM_FILENAME}"));
    }

    let manifest_bytes = read_entry(&mut archive, MANIFEST_FILENAME);

    if let (Some(manifest), Some(checksum)) =
        (&manifest_bytes, read_entry(&mut archive, CHECKSUM_FILENAME))
    {
        let expected = compute_checksum(manifest);
        let checksum_text = String::from_utf8_lossy(&checksum);
        if !checksum_text.contains(&expected) {
            errors.push("checksum mismatch - bundle may be corrupted".to_string());
        }
    }

    if let Some(manifest) = &manifest_bytes
        && serde_json::from_slice::<serde_json::Value>(manifest).is_err()
    {
        errors.push("invalid JSON in manifest".to_string());
    }

    for name in &names {
        if name.contains("..") || name.starts_with('/') {
            errors.push(format!("suspicious path in bundle: {name}"));
        }
    }

    let prefix = format!("{ATTACHMENTS_DIR}/");
    let attachment_count = names.iter().filter(|n| n.starts_with(&prefix)).count();
    if attachment_count > MAX_ATTACHMENTS {
        warnings.push(format!(
            "too many attachments: {attachment_count} > {MAX_ATTACHMENTS}"
        ));
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Option<Vec<u8>> {
    use std::io::Read;
    let mut entry = archive.by_name(name).ok()?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf).ok()?;
    Some(buf)
}
