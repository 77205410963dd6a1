//! `bugpack render`: markdown or JSON output for a bundle.

use crate::exit_codes;
use anyhow::{Context, Result, bail};
use bugpack_core::bundle::read_bundle;
use bugpack_core::render::{to_json, to_llm_context};
use std::path::Path;

pub fn execute(bundle_path: &Path, format: &str, max_tokens: usize) -> Result<i32> {
    let bundle = read_bundle(bundle_path)
        .with_context(|| format!("reading {}", bundle_path.display()))?;

    match format {
        "md" => println!("{}", to_llm_context(&bundle, max_tokens)),
        "json" => println!("{}", to_json(&bundle).context("serializing bundle")?),
        other => bail!("unknown format '{other}' (expected md or json)"),
    }

    Ok(exit_codes::SUCCESS)
}
