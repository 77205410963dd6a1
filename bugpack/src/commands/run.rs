//! `bugpack run`: execute, capture, redact, and bundle.

use crate::exit_codes;
use anyhow::{Context, Result};
use bugpack_core::bundle::{BugBundle, BundleMetadata, CaptureOutput, add_attachment, create_bundle};
use bugpack_core::capture::{CaptureConfig, EnvConfig, collect_environment, extract_traceback};
use bugpack_core::config::load_config;
use bugpack_core::redact::create_redaction_engine;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub fn execute(
    command: &[String],
    output: Option<PathBuf>,
    timeout: Option<u64>,
    attachments: &[PathBuf],
    no_redact: bool,
) -> Result<i32> {
    let config = load_config(None);
    let timeout_secs = timeout.unwrap_or(config.defaults.timeout);

    let output = output.unwrap_or_else(|| match &config.output.default_output_dir {
        Some(dir) => dir.join("bug.bugbundle"),
        None => PathBuf::from("./bug.bugbundle"),
    });

    eprintln!("running: {}", command.join(" "));
    let capture_config = CaptureConfig {
        timeout: Duration::from_secs(timeout_secs),
        ..CaptureConfig::default()
    };
    let result = bugpack_core::capture::run_command(command, &capture_config);

    let env_config = EnvConfig {
        env_allowlist: config.defaults.env_allowlist.clone(),
        ..EnvConfig::default()
    };
    let snapshot = collect_environment(&env_config);
    let mut environment = snapshot.to_environment();

    let project_root = std::env::current_dir().ok();
    let mut engine = create_redaction_engine(project_root, Some(config.pattern_config()));

    let (stdout, stderr, salt_hash, redaction_report) = if no_redact {
        (result.stdout.clone(), result.stderr.clone(), String::new(), BTreeMap::new())
    } else {
        let (stdout, stdout_report) = engine.redact(&result.stdout);
        let (stderr, mut report) = engine.redact(&result.stderr);
        report.merge(stdout_report);

        // Environment values get the same treatment as the output streams.
        let mut env_vars = BTreeMap::new();
        for (key, value) in &environment.env_vars {
            let (clean, env_report) = engine.redact(value);
            report.merge(env_report);
            env_vars.insert(key.clone(), clean);
        }
        environment.env_vars = env_vars;
        if let Some(git) = &mut environment.git
            && let Some(remote_url) = git.remote_url.take()
        {
            let (clean, url_report) = engine.redact(&remote_url);
            report.merge(url_report);
            git.remote_url = Some(clean);
        }

        let summary: BTreeMap<String, u64> = report.summary().into_iter().collect();
        (stdout, stderr, engine.salt_hash(), summary)
    };

    let traceback = extract_traceback(&stderr).map(|tb| tb.to_traceback());

    let bundle = BugBundle {
        metadata: BundleMetadata {
            redaction_salt_hash: salt_hash,
            ..BundleMetadata::default()
        },
        capture: CaptureOutput {
            stdout,
            stderr,
            exit_code: result.exit_code,
            duration_ms: result.duration_ms,
            command: command.to_vec(),
            timed_out: result.timed_out,
            truncated: result.truncated_stdout || result.truncated_stderr,
        },
        traceback,
        environment: Some(environment),
        redaction_report,
    };

    create_bundle(&bundle, &output, true)
        .with_context(|| format!("failed to write bundle to {}", output.display()))?;

    for path in attachments {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment.txt".to_string());
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                let content = if no_redact {
                    raw
                } else {
                    engine.redact(&raw).0
                };
                match add_attachment(&output, &name, &content) {
                    Ok(final_name) => info!(attachment = %final_name, "attached"),
                    Err(e) => eprintln!("warning: could not attach {name}: {e}"),
                }
            }
            Err(e) => eprintln!("warning: could not read {}: {e}", path.display()),
        }
    }

    let total: u64 = bundle.redaction_report.values().sum();
    eprintln!(
        "bundle written to {} (exit code {}, {} redactions)",
        output.display(),
        result.exit_code,
        total
    );

    Ok(if result.timed_out {
        exit_codes::TIMEOUT
    } else {
        exit_codes::SUCCESS
    })
}
