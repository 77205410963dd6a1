//! `bugpack audit`: verify a written bundle is actually safe to share.
//!
//! Reads the bundle's stored (already-redacted) capture streams and runs
//! the high-priority leak scan over them. This is the post-hoc check for
//! bundles produced elsewhere or with older pattern catalogs.

use crate::exit_codes;
use anyhow::{Context, Result};
use bugpack_core::bundle::read_bundle;
use bugpack_core::config::load_config;
use bugpack_core::redact::create_redaction_engine;
use std::path::Path;

pub fn execute(bundle_path: &Path) -> Result<i32> {
    let bundle = read_bundle(bundle_path)
        .with_context(|| format!("reading {}", bundle_path.display()))?;

    let config = load_config(None);
    let engine = create_redaction_engine(None, Some(config.pattern_config()));

    let mut leaks = engine.verify_redaction(&bundle.capture.stdout);
    for leak in engine.verify_redaction(&bundle.capture.stderr) {
        if !leaks.contains(&leak) {
            leaks.push(leak);
        }
    }
    if let Some(env) = &bundle.environment {
        for value in env.env_vars.values() {
            for leak in engine.verify_redaction(value) {
                if !leaks.contains(&leak) {
                    leaks.push(leak);
                }
            }
        }
    }

    if leaks.is_empty() {
        println!("clean: no high-priority secrets detected in {}", bundle_path.display());
        Ok(exit_codes::SUCCESS)
    } else {
        for leak in &leaks {
            println!("leak: pattern '{leak}' still matches bundle contents");
        }
        Ok(exit_codes::SECRETS_FOUND)
    }
}
