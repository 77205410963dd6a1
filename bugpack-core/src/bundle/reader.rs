//! Bundle reader: parse `.bugbundle` files with traversal defenses.
//!
//! Reading follows a fixed state machine:
//! OPEN -> ENUMERATE -> security-check all names -> READ manifest ->
//! PARSE json -> MIGRATE -> VALIDATE -> RETURN. Each transition has exactly
//! one failure kind, and the security check takes precedence over every
//! other read-time failure.

use crate::bundle::error::{BundleError, FieldError, Result};
use crate::bundle::schema::{BUNDLE_VERSION, BugBundle, validate_manifest};
use crate::bundle::{ATTACHMENTS_DIR, CHECKSUM_FILENAME, MANIFEST_FILENAME};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

type MigrationFn = fn(Value) -> Value;

/// Registered schema migrations, keyed by the manifest's declared version.
static VERSION_MIGRATIONS: LazyLock<HashMap<&'static str, MigrationFn>> = LazyLock::new(|| {
    let mut table: HashMap<&'static str, MigrationFn> = HashMap::new();
    table.insert("1.0", |value| value);
    table
});

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

/// Reject entry names that traverse out of the archive.
fn check_path_safety(name: &str) -> Result<()> {
    if name.contains("..") {
        return Err(BundleError::Security(format!(
            "path traversal detected: {name}"
        )));
    }
    if name.starts_with('/') || name.starts_with('\\') {
        return Err(BundleError::Security(format!(
            "absolute path detected: {name}"
        )));
    }
    Ok(())
}

/// Decode `%XX` escapes so encoded traversal cannot slip past the checks.
fn percent_decode(name: &str) -> String {
    fn hex_digit(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2]))
        {
            out.push(hi * 16 + lo);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn open_archive(path: &Path) -> Result<zip::ZipArchive<File>> {
    if !path.exists() {
        return Err(BundleError::NotFound(path.to_path_buf()));
    }
    let file = File::open(path)?;
    zip::ZipArchive::new(file).map_err(map_zip_err)
}

fn read_entry(archive: &mut zip::ZipArchive<File>, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive.by_name(name).map_err(map_zip_err)?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Apply the registered migration for `version`, or fail if there is none.
fn migrate_bundle(data: Value, version: &str) -> Result<Value> {
    match VERSION_MIGRATIONS.get(version) {
        Some(migrate) => Ok(migrate(data)),
        None => Err(BundleError::UnsupportedVersion(version.to_string())),
    }
}

/// Read and parse a `.bugbundle` file into a [`BugBundle`].
pub fn read_bundle(path: &Path) -> Result<BugBundle> {
    let mut archive = open_archive(path)?;

    let names: Vec<String> = archive.file_names().map(String::from).collect();
    for name in &names {
        check_path_safety(name)?;
    }

    if !names.iter().any(|n| n == MANIFEST_FILENAME) {
        return Err(BundleError::Corrupt(format!(
            "bundle missing {MANIFEST_FILENAME}"
        )));
    }

    let manifest_bytes = read_entry(&mut archive, MANIFEST_FILENAME)?;

    let data: Value = serde_json::from_slice(&manifest_bytes).map_err(|e| BundleError::Parse {
        line: e.line(),
        reason: e.to_string(),
    })?;

    let version = data
        .get("metadata")
        .and_then(|m| m.get("version"))
        .and_then(Value::as_str)
        .unwrap_or(BUNDLE_VERSION)
        .to_string();
    let data = migrate_bundle(data, &version)?;

    let field_errors = validate_manifest(&data);
    if !field_errors.is_empty() {
        return Err(BundleError::Schema(field_errors));
    }

    let bundle = BugBundle::from_value(data).map_err(|e| {
        BundleError::Schema(vec![FieldError {
            path: "manifest".to_string(),
            reason: e.to_string(),
        }])
    })?;

    debug!(path = %path.display(), version = %version, "bundle read");
    Ok(bundle)
}

/// List attachment names in a bundle, sorted.
pub fn list_attachments(path: &Path) -> Result<Vec<String>> {
    let archive = open_archive(path)?;
    let prefix = format!("{ATTACHMENTS_DIR}/");
    let mut attachments: Vec<String> = archive
        .file_names()
        .filter_map(|n| n.strip_prefix(&prefix))
        .filter(|n| !n.is_empty())
        .map(String::from)
        .collect();
    attachments.sort();
    Ok(attachments)
}

/// Read one attachment as UTF-8 text.
///
/// The requested name is checked for traversal, including URL-encoded
/// forms; requests for absent attachments fail with
/// [`BundleError::AttachmentNotFound`], distinct from archive corruption.
pub fn get_attachment(path: &Path, name: &str) -> Result<String> {
    check_path_safety(name)?;
    check_path_safety(&percent_decode(name))?;

    let mut archive = open_archive(path)?;

    let attachment_path = format!("{ATTACHMENTS_DIR}/{name}");
    if !archive.file_names().any(|n| n == attachment_path) {
        return Err(BundleError::AttachmentNotFound(name.to_string()));
    }

    let content = read_entry(&mut archive, &attachment_path)?;
    String::from_utf8(content).map_err(|e| BundleError::Parse {
        line: 0,
        reason: format!("attachment is not valid UTF-8: {e}"),
    })
}

/// Verify bundle integrity using the embedded checksum.
///
/// Returns `true` when the manifest is present and either the checksum file
/// contains the SHA-256 of the current manifest bytes, or the checksum file
/// is absent (legacy bundles are integrity-ok). Archive corruption is the
/// answer `false`, never an error.
pub fn verify_integrity(path: &Path) -> Result<bool> {
    let mut archive = match open_archive(path) {
        Ok(archive) => archive,
        Err(BundleError::NotFound(p)) => return Err(BundleError::NotFound(p)),
        Err(_) => return Ok(false),
    };

    let names: Vec<String> = archive.file_names().map(String::from).collect();
    if !names.iter().any(|n| n == MANIFEST_FILENAME) {
        return Ok(false);
    }
    if !names.iter().any(|n| n == CHECKSUM_FILENAME) {
        return Ok(true);
    }

    let Ok(manifest_bytes) = read_entry(&mut archive, MANIFEST_FILENAME) else {
        return Ok(false);
    };
    let Ok(checksum_bytes) = read_entry(&mut archive, CHECKSUM_FILENAME) else {
        return Ok(false);
    };

    let expected = compute_checksum(&manifest_bytes);
    // Substring match is deliberately lenient: it tolerates trailing
    // whitespace (and checksum files with extra data appended).
    Ok(String::from_utf8_lossy(&checksum_bytes).contains(&expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_safety_rejects_traversal_and_absolute() {
        assert!(check_path_safety("attachments/a.txt").is_ok());
        assert!(check_path_safety("../../../etc/passwd").is_err());
        assert!(check_path_safety("a/../b").is_err());
        assert!(check_path_safety("/etc/passwd").is_err());
        assert!(check_path_safety(r"\windows\system32").is_err());
    }

    #[test]
    fn percent_decoding_exposes_hidden_traversal() {
        assert_eq!(percent_decode("%2e%2e%2fetc"), "../etc");
        assert_eq!(percent_decode("plain.txt"), "plain.txt");
        assert_eq!(percent_decode("50%"), "50%");
    }

    #[test]
    fn missing_bundle_is_not_found() {
        let err = read_bundle(Path::new("/no/such/bundle")).unwrap_err();
        assert!(matches!(err, BundleError::NotFound(_)));
    }

    #[test]
    fn unknown_version_has_no_migration() {
        let err = migrate_bundle(serde_json::json!({}), "9.9").unwrap_err();
        assert!(matches!(err, BundleError::UnsupportedVersion(_)));
    }

    #[test]
    fn current_version_migration_is_identity() {
        let value = serde_json::json!({"metadata": {"version": "1.0"}});
        let migrated = migrate_bundle(value.clone(), "1.0").unwrap();
        assert_eq!(migrated, value);
    }
}
