//! `bugpack inspect`: summary, integrity, validation, attachments.

use crate::exit_codes;
use anyhow::{Context, Result};
use bugpack_core::bundle::{
    get_attachment, list_attachments, read_bundle, validate_bundle, verify_integrity,
};
use std::path::Path;

pub fn execute(bundle_path: &Path, attachment: Option<&str>) -> Result<i32> {
    if let Some(name) = attachment {
        let content = get_attachment(bundle_path, name)
            .with_context(|| format!("reading attachment '{name}'"))?;
        print!("{content}");
        return Ok(exit_codes::SUCCESS);
    }

    let bundle = read_bundle(bundle_path)
        .with_context(|| format!("reading {}", bundle_path.display()))?;

    println!("bundle:      {}", bundle_path.display());
    println!("version:     {}", bundle.metadata.version);
    println!("created:     {}", bundle.metadata.created_at.to_rfc3339());
    println!("tool:        {}", bundle.metadata.tool_version);
    println!("command:     {}", bundle.capture.command.join(" "));
    println!("exit code:   {}", bundle.capture.exit_code);
    println!("duration:    {}ms", bundle.capture.duration_ms);
    if let Some(tb) = &bundle.traceback {
        println!("error:       {}: {}", tb.exception_type, tb.message);
    }

    let total: u64 = bundle.redaction_report.values().sum();
    if total > 0 {
        let categories: Vec<String> = bundle
            .redaction_report
            .iter()
            .map(|(category, count)| format!("{category}={count}"))
            .collect();
        println!("redactions:  {} ({})", total, categories.join(", "));
    }

    match verify_integrity(bundle_path)? {
        true => println!("integrity:   ok"),
        false => println!("integrity:   FAILED"),
    }

    let attachments = list_attachments(bundle_path)?;
    if !attachments.is_empty() {
        println!("attachments: {}", attachments.join(", "));
    }

    let validation = validate_bundle(bundle_path);
    for warning in &validation.warnings {
        println!("warning:     {warning}");
    }
    for error in &validation.errors {
        println!("invalid:     {error}");
    }

    Ok(if validation.valid {
        exit_codes::SUCCESS
    } else {
        exit_codes::VALIDATION_FAILED
    })
}
