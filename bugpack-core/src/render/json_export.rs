//! Generate JSON output and LLM-optimized context from bundles.
//!
//! The LLM context is a token-budgeted markdown document that prioritizes
//! the error and traceback, then environment, then truncated output tails.

use crate::bundle::schema::BugBundle;

/// Default token budget for [`to_llm_context`].
pub const DEFAULT_MAX_TOKENS: usize = 4000;

const CHARS_PER_TOKEN: usize = 4;

fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

fn truncate_to_tokens(text: &str, max_tokens: usize) -> (String, bool) {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    if text.len() <= max_chars {
        return (text.to_string(), false);
    }

    let mut cut = max_chars;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = &text[..cut];

    // Prefer breaking at a line boundary when one is reasonably close.
    if let Some(last_newline) = truncated.rfind('\n')
        && last_newline > max_chars / 2
    {
        truncated = &truncated[..last_newline];
    }

    (format!("{truncated}\n... [truncated]"), true)
}

/// Export a bundle as pretty-printed JSON.
pub fn to_json(bundle: &BugBundle) -> serde_json::Result<String> {
    let bytes = bundle.to_canonical_json()?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Generate LLM-optimized markdown context from a bundle.
pub fn to_llm_context(bundle: &BugBundle, max_tokens: usize) -> String {
    let mut sections: Vec<String> = Vec::new();
    let mut remaining = max_tokens as i64;

    let header = build_header(bundle);
    remaining -= estimate_tokens(&header) as i64;
    sections.push(header);

    if bundle.traceback.is_some() {
        let error_section = build_error_section(bundle);
        let error_tokens = estimate_tokens(&error_section) as i64;
        if error_tokens <= remaining {
            sections.push(error_section);
            remaining -= error_tokens;
        }
    }

    let env_section = build_env_section(bundle);
    let env_tokens = estimate_tokens(&env_section) as i64;
    if env_tokens <= remaining {
        sections.push(env_section);
        remaining -= env_tokens;
    }

    if !bundle.capture.stderr.is_empty() && remaining > 100 {
        let budget = (remaining / 2).min(1000) as usize;
        let (stderr, _) = truncate_to_tokens(&bundle.capture.stderr, budget);
        let section = format!("## stderr\n```\n{stderr}\n```");
        remaining -= estimate_tokens(&section) as i64;
        sections.push(section);
    }

    if !bundle.capture.stdout.is_empty() && remaining > 100 {
        let (stdout, _) = truncate_to_tokens(&bundle.capture.stdout, (remaining - 50) as usize);
        sections.push(format!("## stdout\n```\n{stdout}\n```"));
    }

    if !bundle.redaction_report.is_empty() {
        sections.push(build_redaction_note(bundle));
    }

    sections.join("\n\n")
}

fn build_header(bundle: &BugBundle) -> String {
    let command = if bundle.capture.command.is_empty() {
        "N/A".to_string()
    } else {
        bundle.capture.command.join(" ")
    };
    format!(
        "# Bug Context\n\n**Command:** `{command}`\n**Exit code:** {}\n**Duration:** {}ms",
        bundle.capture.exit_code, bundle.capture.duration_ms
    )
}

fn build_error_section(bundle: &BugBundle) -> String {
    let Some(tb) = &bundle.traceback else {
        return String::new();
    };

    let mut lines = vec![
        "## Error".to_string(),
        String::new(),
        format!("**{}:** {}", tb.exception_type, tb.message),
        String::new(),
        "### Traceback".to_string(),
        "```".to_string(),
    ];

    let skip = tb.frames.len().saturating_sub(10);
    for frame in tb.frames.iter().skip(skip) {
        let mut location = format!("  File \"{}\", line {}", frame.file, frame.line);
        if let Some(function) = &frame.function {
            location.push_str(&format!(", in {function}"));
        }
        lines.push(location);
        if let Some(code) = &frame.code {
            lines.push(format!("    {code}"));
        }
    }

    lines.push(format!("{}: {}", tb.exception_type, tb.message));
    lines.push("```".to_string());

    lines.join("\n")
}

fn build_env_section(bundle: &BugBundle) -> String {
    let mut lines = vec!["## Environment".to_string()];

    if let Some(env) = &bundle.environment {
        lines.push(format!("- **Runtime:** {}", env.runtime_version));
        lines.push(format!("- **Platform:** {}", env.platform));

        if let Some(git) = &env.git
            && let Some(git_ref) = &git.git_ref
        {
            let short: String = git_ref.chars().take(7).collect();
            let dirty = if git.dirty == Some(true) { " (dirty)" } else { "" };
            lines.push(format!("- **Git:** {short}{dirty}"));
        }

        if env.virtualenv {
            lines.push("- **Virtualenv:** Yes".to_string());
        }
    }

    lines.join("\n")
}

fn build_redaction_note(bundle: &BugBundle) -> String {
    let total: u64 = bundle.redaction_report.values().sum();
    let categories: Vec<&str> = bundle.redaction_report.keys().map(String::as_str).collect();
    format!(
        "*Note: {total} secrets were redacted ({})*",
        categories.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::schema::{CaptureOutput, Environment, Frame, GitInfo, Traceback};

    fn sample() -> BugBundle {
        BugBundle {
            capture: CaptureOutput {
                stdout: "ok so far".to_string(),
                stderr: "boom".to_string(),
                exit_code: 1,
                duration_ms: 120,
                command: vec!["python".to_string(), "app.py".to_string()],
                ..CaptureOutput::default()
            },
            traceback: Some(Traceback {
                exception_type: "ValueError".to_string(),
                message: "bad".to_string(),
                frames: vec![Frame {
                    file: "app.py".to_string(),
                    line: 3,
                    function: Some("main".to_string()),
                    code: Some("raise ValueError('bad')".to_string()),
                    locals: None,
                }],
                chained: None,
            }),
            environment: Some(Environment {
                runtime_version: "bugpack 0.3.1".to_string(),
                platform: "linux-x86_64".to_string(),
                git: Some(GitInfo {
                    git_ref: Some("0123456789abcdef".to_string()),
                    dirty: Some(true),
                    ..GitInfo::default()
                }),
                virtualenv: true,
                ..Environment::default()
            }),
            redaction_report: [("AWS_KEY".to_string(), 2u64), ("EMAIL".to_string(), 1u64)]
                .into_iter()
                .collect(),
            ..BugBundle::default()
        }
    }

    #[test]
    fn llm_context_contains_prioritized_sections() {
        let context = to_llm_context(&sample(), DEFAULT_MAX_TOKENS);
        assert!(context.starts_with("# Bug Context"));
        assert!(context.contains("**Command:** `python app.py`"));
        assert!(context.contains("**ValueError:** bad"));
        assert!(context.contains("File \"app.py\", line 3, in main"));
        assert!(context.contains("- **Git:** 0123456 (dirty)"));
        assert!(context.contains("## stderr"));
        assert!(context.contains("*Note: 3 secrets were redacted (AWS_KEY, EMAIL)*"));
    }

    #[test]
    fn tight_budget_drops_low_priority_sections() {
        let context = to_llm_context(&sample(), 40);
        assert!(context.starts_with("# Bug Context"));
        assert!(!context.contains("## stdout"));
    }

    #[test]
    fn truncation_cuts_on_line_boundary() {
        let text = "line one is fairly long\n".repeat(100);
        let (truncated, was_truncated) = truncate_to_tokens(&text, 10);
        assert!(was_truncated);
        assert!(truncated.ends_with("... [truncated]"));
        assert!(truncated.len() < text.len());
    }

    #[test]
    fn json_export_is_valid_json() {
        let text = to_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["capture"]["exit_code"], 1);
    }

    #[test]
    fn only_last_ten_frames_render() {
        let mut bundle = sample();
        if let Some(tb) = &mut bundle.traceback {
            tb.frames = (0..15)
                .map(|i| Frame {
                    file: format!("f{i}.py"),
                    line: i,
                    function: None,
                    code: None,
                    locals: None,
                })
                .collect();
        }
        let context = to_llm_context(&bundle, DEFAULT_MAX_TOKENS);
        assert!(!context.contains("f4.py"));
        assert!(context.contains("f5.py"));
        assert!(context.contains("f14.py"));
    }
}
