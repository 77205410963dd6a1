//! `bugpack scan`: redact a file or stdin and report what was found.

use crate::exit_codes;
use anyhow::{Context, Result};
use bugpack_core::config::load_config;
use bugpack_core::redact::create_redaction_engine;
use std::io::Read;
use std::path::Path;

pub fn execute(file: Option<&Path>, verify: bool) -> Result<i32> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("could not read stdin")?;
            buf
        }
    };

    let config = load_config(None);
    let project_root = std::env::current_dir().ok();
    let mut engine = create_redaction_engine(project_root, Some(config.pattern_config()));

    let (redacted, report) = engine.redact(&text);
    print!("{redacted}");

    let mut summary: Vec<(String, u64)> = report.summary().into_iter().collect();
    summary.sort();
    for (category, count) in &summary {
        eprintln!("{category}: {count}");
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }

    if verify {
        let leaks = engine.verify_redaction(&redacted);
        if !leaks.is_empty() {
            for leak in &leaks {
                eprintln!("leak: pattern '{leak}' still matches");
            }
            return Ok(exit_codes::SECRETS_FOUND);
        }
    }

    Ok(exit_codes::SUCCESS)
}
