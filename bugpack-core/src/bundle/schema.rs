//! Bundle schema: the record types serialized into `manifest.json`.
//!
//! All records are frozen value types: built once, serialized, and never
//! mutated afterwards. Serialization is canonical JSON (stable key order,
//! UTF-8); timestamps are RFC 3339 with an explicit UTC offset. The schema
//! is strictly tree-shaped: a chained traceback owns its children.

use crate::bundle::error::FieldError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Bundle format version emitted into every manifest.
pub const BUNDLE_VERSION: &str = "1.0";

/// A single stack frame in a traceback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// File path where the frame originated.
    pub file: String,
    /// Line number in the file.
    pub line: u32,
    /// Function name (absent for module-level code).
    #[serde(default)]
    pub function: Option<String>,
    /// The source code line, when available.
    #[serde(default)]
    pub code: Option<String>,
    /// Local variables captured in the frame.
    #[serde(default)]
    pub locals: Option<BTreeMap<String, String>>,
}

/// Structured representation of a parsed traceback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Traceback {
    /// The type of exception raised.
    pub exception_type: String,
    /// The exception message.
    pub message: String,
    /// Stack frames, innermost last.
    #[serde(default)]
    pub frames: Vec<Frame>,
    /// Chained exceptions (cause/context), owned children.
    #[serde(default)]
    pub chained: Option<Vec<Traceback>>,
}

/// Captured command output, already redacted by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CaptureOutput {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub duration_ms: u64,
    /// The executed command argv.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub truncated: bool,
}

/// Version-control information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GitInfo {
    /// Current commit SHA.
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    /// Whether there are uncommitted changes.
    #[serde(default)]
    pub dirty: Option<bool>,
    /// Remote origin URL, already redacted.
    #[serde(default)]
    pub remote_url: Option<String>,
}

/// One entry of the package inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
}

/// Environment snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Environment {
    /// Runtime version string of the capturing tool.
    #[serde(default)]
    pub runtime_version: String,
    /// Platform identifier string.
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub packages: Vec<PackageInfo>,
    /// Filtered environment variables.
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub git: Option<GitInfo>,
    /// Whether a virtual environment was active.
    #[serde(default)]
    pub virtualenv: bool,
    #[serde(default)]
    pub in_container: bool,
    #[serde(default)]
    pub ci_detected: bool,
}

/// Bundle metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    /// Bundle format version.
    pub version: String,
    /// Creation timestamp, RFC 3339 UTC.
    pub created_at: DateTime<Utc>,
    /// Version of the tool that created the bundle.
    #[serde(default)]
    pub tool_version: String,
    /// SHA-256 hash of the redaction session salt.
    #[serde(default)]
    pub redaction_salt_hash: String,
}

impl Default for BundleMetadata {
    fn default() -> Self {
        Self {
            version: BUNDLE_VERSION.to_string(),
            created_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            redaction_salt_hash: String::new(),
        }
    }
}

/// The complete bundle manifest record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BugBundle {
    #[serde(default)]
    pub metadata: BundleMetadata,
    #[serde(default)]
    pub capture: CaptureOutput,
    #[serde(default)]
    pub traceback: Option<Traceback>,
    #[serde(default)]
    pub environment: Option<Environment>,
    /// Redaction summary: category to count. Individual match offsets are
    /// not persisted.
    #[serde(default)]
    pub redaction_report: BTreeMap<String, u64>,
}

impl BugBundle {
    /// Serialize to canonical manifest JSON: recursively sorted keys,
    /// two-space indentation, UTF-8 bytes.
    pub fn to_canonical_json(&self) -> serde_json::Result<Vec<u8>> {
        let value = sort_json_value(serde_json::to_value(self)?);
        serde_json::to_vec_pretty(&value)
    }

    /// Deserialize from a manifest JSON value. Unknown fields are tolerated.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

/// Recursively sort object keys so serialization order is stable.
pub fn sort_json_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, sort_json_value(v));
            }
            Value::Object(out)
        }
        Value::Array(values) => {
            Value::Array(values.into_iter().map(sort_json_value).collect())
        }
        other => other,
    }
}

/// Validate a parsed manifest against the schema, collecting one
/// [`FieldError`] per offending field rather than failing at the first.
pub fn validate_manifest(value: &Value) -> Vec<FieldError> {
    let mut errors = Vec::new();

    let Some(root) = value.as_object() else {
        errors.push(field_error("manifest", "expected object"));
        return errors;
    };

    match root.get("metadata") {
        Some(Value::Object(metadata)) => {
            expect_string(metadata.get("version"), "metadata.version", true, &mut errors);
            expect_string(
                metadata.get("created_at"),
                "metadata.created_at",
                true,
                &mut errors,
            );
            expect_string(
                metadata.get("tool_version"),
                "metadata.tool_version",
                false,
                &mut errors,
            );
            expect_string(
                metadata.get("redaction_salt_hash"),
                "metadata.redaction_salt_hash",
                false,
                &mut errors,
            );
        }
        Some(_) => errors.push(field_error("metadata", "expected object")),
        None => errors.push(field_error("metadata", "missing required field")),
    }

    match root.get("capture") {
        Some(Value::Object(capture)) => {
            expect_string(capture.get("stdout"), "capture.stdout", false, &mut errors);
            expect_string(capture.get("stderr"), "capture.stderr", false, &mut errors);
            expect_integer(capture.get("exit_code"), "capture.exit_code", &mut errors);
            expect_integer(capture.get("duration_ms"), "capture.duration_ms", &mut errors);
            if let Some(command) = capture.get("command") {
                match command.as_array() {
                    Some(argv) => {
                        for (i, arg) in argv.iter().enumerate() {
                            if !arg.is_string() {
                                errors.push(field_error(
                                    &format!("capture.command[{i}]"),
                                    "expected string",
                                ));
                            }
                        }
                    }
                    None => errors.push(field_error("capture.command", "expected array")),
                }
            }
            expect_bool(capture.get("timed_out"), "capture.timed_out", &mut errors);
            expect_bool(capture.get("truncated"), "capture.truncated", &mut errors);
        }
        Some(_) => errors.push(field_error("capture", "expected object")),
        None => errors.push(field_error("capture", "missing required field")),
    }

    if let Some(traceback) = root.get("traceback")
        && !traceback.is_null()
    {
        validate_traceback(traceback, "traceback", &mut errors);
    }

    if let Some(environment) = root.get("environment")
        && !environment.is_null()
    {
        match environment.as_object() {
            Some(env) => {
                expect_string(
                    env.get("runtime_version"),
                    "environment.runtime_version",
                    false,
                    &mut errors,
                );
                expect_string(env.get("platform"), "environment.platform", false, &mut errors);
                expect_string(env.get("cwd"), "environment.cwd", false, &mut errors);
                if let Some(packages) = env.get("packages") {
                    match packages.as_array() {
                        Some(list) => {
                            for (i, package) in list.iter().enumerate() {
                                if !package.is_object() {
                                    errors.push(field_error(
                                        &format!("environment.packages[{i}]"),
                                        "expected object",
                                    ));
                                }
                            }
                        }
                        None => {
                            errors.push(field_error("environment.packages", "expected array"))
                        }
                    }
                }
                if let Some(env_vars) = env.get("env_vars")
                    && !env_vars.is_object()
                {
                    errors.push(field_error("environment.env_vars", "expected object"));
                }
                expect_bool(env.get("virtualenv"), "environment.virtualenv", &mut errors);
                expect_bool(env.get("in_container"), "environment.in_container", &mut errors);
                expect_bool(env.get("ci_detected"), "environment.ci_detected", &mut errors);
            }
            None => errors.push(field_error("environment", "expected object")),
        }
    }

    match root.get("redaction_report") {
        Some(Value::Object(report)) => {
            for (key, count) in report {
                if !count.is_u64() {
                    errors.push(field_error(
                        &format!("redaction_report.{key}"),
                        "expected non-negative integer",
                    ));
                }
            }
        }
        Some(Value::Null) | None => {}
        Some(_) => errors.push(field_error("redaction_report", "expected object")),
    }

    errors
}

fn validate_traceback(value: &Value, path: &str, errors: &mut Vec<FieldError>) {
    let Some(tb) = value.as_object() else {
        errors.push(field_error(path, "expected object"));
        return;
    };

    expect_string(
        tb.get("exception_type"),
        &format!("{path}.exception_type"),
        true,
        errors,
    );
    expect_string(tb.get("message"), &format!("{path}.message"), true, errors);

    if let Some(frames) = tb.get("frames") {
        match frames.as_array() {
            Some(list) => {
                for (i, frame) in list.iter().enumerate() {
                    let frame_path = format!("{path}.frames[{i}]");
                    match frame.as_object() {
                        Some(f) => {
                            expect_string(f.get("file"), &format!("{frame_path}.file"), true, errors);
                            expect_integer(f.get("line"), &format!("{frame_path}.line"), errors);
                        }
                        None => errors.push(field_error(&frame_path, "expected object")),
                    }
                }
            }
            None => errors.push(field_error(&format!("{path}.frames"), "expected array")),
        }
    }

    if let Some(chained) = tb.get("chained")
        && !chained.is_null()
    {
        match chained.as_array() {
            Some(list) => {
                for (i, child) in list.iter().enumerate() {
                    validate_traceback(child, &format!("{path}.chained[{i}]"), errors);
                }
            }
            None => errors.push(field_error(&format!("{path}.chained"), "expected array")),
        }
    }
}

fn field_error(path: &str, reason: &str) -> FieldError {
    FieldError {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn expect_string(
    value: Option<&Value>,
    path: &str,
    required: bool,
    errors: &mut Vec<FieldError>,
) {
    match value {
        Some(v) if v.is_string() => {}
        Some(Value::Null) | None if !required => {}
        Some(_) => errors.push(field_error(path, "expected string")),
        None => errors.push(field_error(path, "missing required field")),
    }
}

fn expect_integer(value: Option<&Value>, path: &str, errors: &mut Vec<FieldError>) {
    if let Some(v) = value
        && !v.is_i64()
        && !v.is_u64()
    {
        errors.push(field_error(path, "expected integer"));
    }
}

fn expect_bool(value: Option<&Value>, path: &str, errors: &mut Vec<FieldError>) {
    if let Some(v) = value
        && !v.is_boolean()
    {
        errors.push(field_error(path, "expected boolean"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bundle() -> BugBundle {
        BugBundle {
            metadata: BundleMetadata {
                redaction_salt_hash: "ab".repeat(32),
                ..BundleMetadata::default()
            },
            capture: CaptureOutput {
                stdout: "hello".to_string(),
                stderr: "oops".to_string(),
                exit_code: 1,
                duration_ms: 42,
                command: vec!["./crash".to_string(), "--now".to_string()],
                ..CaptureOutput::default()
            },
            traceback: Some(Traceback {
                exception_type: "ValueError".to_string(),
                message: "bad input".to_string(),
                frames: vec![Frame {
                    file: "app.py".to_string(),
                    line: 10,
                    function: Some("main".to_string()),
                    code: Some("raise ValueError".to_string()),
                    locals: None,
                }],
                chained: Some(vec![Traceback {
                    exception_type: "KeyError".to_string(),
                    message: "'x'".to_string(),
                    frames: vec![],
                    chained: None,
                }]),
            }),
            environment: None,
            redaction_report: [("AWS_KEY".to_string(), 2u64)].into_iter().collect(),
        }
    }

    #[test]
    fn canonical_json_round_trips() {
        let bundle = sample_bundle();
        let bytes = bundle.to_canonical_json().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        let parsed = BugBundle::from_value(value).unwrap();
        assert_eq!(parsed, bundle);
    }

    #[test]
    fn canonical_json_is_byte_stable() {
        let bundle = sample_bundle();
        assert_eq!(
            bundle.to_canonical_json().unwrap(),
            bundle.to_canonical_json().unwrap()
        );
    }

    #[test]
    fn timestamps_carry_utc_offset() {
        let bytes = sample_bundle().to_canonical_json().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        let created_at = value["metadata"]["created_at"].as_str().unwrap();
        assert!(
            created_at.ends_with('Z') || created_at.contains("+00:00"),
            "no explicit UTC offset: {created_at}"
        );
    }

    #[test]
    fn git_ref_serializes_as_ref() {
        let git = GitInfo {
            git_ref: Some("abc123".to_string()),
            ..GitInfo::default()
        };
        let value = serde_json::to_value(&git).unwrap();
        assert_eq!(value["ref"], "abc123");
    }

    #[test]
    fn valid_manifest_passes_validation() {
        let bytes = sample_bundle().to_canonical_json().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(validate_manifest(&value).is_empty());
    }

    #[test]
    fn wrong_types_are_aggregated() {
        let value = serde_json::json!({
            "metadata": {"version": 42, "created_at": "2026-01-01T00:00:00Z"},
            "capture": {"exit_code": "one", "stdout": ""},
        });
        let errors = validate_manifest(&value);
        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"metadata.version"));
        assert!(paths.contains(&"capture.exit_code"));
    }

    #[test]
    fn missing_required_sections_are_reported() {
        let errors = validate_manifest(&serde_json::json!({}));
        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"metadata"));
        assert!(paths.contains(&"capture"));
    }

    #[test]
    fn nested_traceback_errors_carry_full_paths() {
        let value = serde_json::json!({
            "metadata": {"version": "1.0", "created_at": "2026-01-01T00:00:00Z"},
            "capture": {},
            "traceback": {
                "exception_type": "E",
                "message": "m",
                "chained": [{"exception_type": 1, "message": "m"}],
            },
        });
        let errors = validate_manifest(&value);
        assert!(
            errors
                .iter()
                .any(|e| e.path == "traceback.chained[0].exception_type")
        );
    }

    #[test]
    fn unknown_fields_are_tolerated_on_read() {
        let bytes = sample_bundle().to_canonical_json().unwrap();
        let mut value: Value = serde_json::from_slice(&bytes).unwrap();
        value["future_field"] = serde_json::json!({"x": 1});
        assert!(validate_manifest(&value).is_empty());
        assert!(BugBundle::from_value(value).is_ok());
    }
}
