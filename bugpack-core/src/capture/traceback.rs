//! Traceback parser: extract structured failure information from stderr.
//!
//! Captured subprocesses are arbitrary, so two formats are recognized:
//! CPython tracebacks (including chained exceptions, locals display, and
//! recursion truncation) and Rust panic messages with optional backtraces.

use crate::bundle::schema::{Frame, Traceback};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static ANSI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]|\x1b\][^\x07]*\x07").expect("ansi pattern must compile")
});

static TRACEBACK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Traceback \(most recent call last\):?\s*$")
        .expect("header pattern must compile")
});

static FRAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*File "([^"]+)", line (\d+)(?:, in (\S+))?"#)
        .expect("frame pattern must compile")
});

static EXCEPTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_.]*):\s*(.*)$").expect("exception pattern must compile")
});

static EXCEPTION_NO_MSG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_.]*)$").expect("pattern must compile"));

static RECURSION_TRUNCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\[Previous line repeated (\d+) more times?\]")
        .expect("recursion pattern must compile")
});

static LOCAL_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s{4,}([a-zA-Z_][a-zA-Z0-9_]*)\s*=\s*(.+)$")
        .expect("locals pattern must compile")
});

static SYNTAX_ERROR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^\s*File "([^"]+)", line (\d+)\n(.*)\n\s*(?:\^+)?\n(SyntaxError|IndentationError|TabError):\s*(.*)"#,
    )
    .expect("syntax error pattern must compile")
});

static RUST_PANIC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^thread '([^']*)' panicked at (.+?):(\d+):(\d+):\n([^\n]*)")
        .expect("panic pattern must compile")
});

static RUST_PANIC_LEGACY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^thread '([^']*)' panicked at '([^\n]*)', (.+?):(\d+):(\d+)")
        .expect("legacy panic pattern must compile")
});

static RUST_BACKTRACE_AT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+at (.+?):(\d+)(?::\d+)?$").expect("backtrace pattern must compile")
});

static RUST_BACKTRACE_FUNC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+\d+:\s+(\S.*)$").expect("backtrace func pattern must compile")
});

const CAUSE_MARKER: &str =
    "\nThe above exception was the direct cause of the following exception:\n";
const CONTEXT_MARKER: &str =
    "\nDuring handling of the above exception, another exception occurred:\n";

/// Structured representation of a parsed failure.
#[derive(Debug, Clone, Default)]
pub struct ParsedTraceback {
    pub exception_type: String,
    pub message: String,
    /// Stack frames, innermost last.
    pub frames: Vec<Frame>,
    /// Chained exception (`__cause__`).
    pub cause: Option<Box<ParsedTraceback>>,
    /// Chained exception (`__context__`).
    pub context: Option<Box<ParsedTraceback>>,
    /// Parsing was incomplete.
    pub partial: bool,
    /// Estimated recursion depth if the traceback was truncated.
    pub recursion_depth: Option<u32>,
}

impl ParsedTraceback {
    /// Convert to the owned-tree schema record.
    pub fn to_traceback(&self) -> Traceback {
        let mut chained = Vec::new();
        if let Some(cause) = &self.cause {
            chained.push(cause.to_traceback());
        }
        if let Some(context) = &self.context {
            chained.push(context.to_traceback());
        }

        Traceback {
            exception_type: self.exception_type.clone(),
            message: self.message.clone(),
            frames: self.frames.clone(),
            chained: if chained.is_empty() { None } else { Some(chained) },
        }
    }
}

fn strip_ansi(text: &str) -> String {
    ANSI_PATTERN.replace_all(text, "").into_owned()
}

fn find_traceback_blocks(text: &str) -> Vec<(usize, usize)> {
    let mut blocks = Vec::new();
    for m in TRACEBACK_HEADER.find_iter(text) {
        let remaining = &text[m.end()..];
        let end = m.end() + find_traceback_end(remaining);
        blocks.push((m.start(), end));
    }
    blocks
}

fn find_traceback_end(text: &str) -> usize {
    let mut last_valid = 0;
    let mut current = 0;
    let mut in_frame = false;

    for line in text.split('\n') {
        let line_len = line.len() + 1;

        if FRAME_PATTERN.is_match(line) {
            in_frame = true;
            last_valid = current + line_len;
        } else if in_frame && line.starts_with("    ") && !line.trim().is_empty() {
            last_valid = current + line_len;
        } else if EXCEPTION_PATTERN.is_match(line) || EXCEPTION_NO_MSG_PATTERN.is_match(line) {
            last_valid = current + line_len;
            break;
        } else if RECURSION_TRUNCATION.is_match(line) {
            last_valid = current + line_len;
        } else if line.trim().is_empty() && in_frame {
            // blank line inside a traceback, keep scanning
        } else if in_frame && !line.starts_with(' ') {
            break;
        }

        current += line_len;
    }

    last_valid.min(text.len())
}

fn parse_frames(text: &str) -> (Vec<Frame>, Option<u32>) {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut frames = Vec::new();
    let mut recursion_depth = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(caps) = FRAME_PATTERN.captures(line) {
            let file = caps[1].to_string();
            let line_num: u32 = caps[2].parse().unwrap_or(0);
            let function = caps.get(3).map(|m| m.as_str().to_string());

            let mut code = None;
            let mut locals = BTreeMap::new();

            if i + 1 < lines.len() {
                let next = lines[i + 1];
                if next.starts_with("    ") && !FRAME_PATTERN.is_match(next) {
                    code = Some(next.trim().to_string());
                    i += 1;

                    let mut j = i + 1;
                    while j < lines.len() {
                        if let Some(local) = LOCAL_VAR_PATTERN.captures(lines[j]) {
                            locals.insert(local[1].to_string(), local[2].to_string());
                            i = j;
                            j += 1;
                        } else {
                            break;
                        }
                    }
                }
            }

            frames.push(Frame {
                file,
                line: line_num,
                function,
                code,
                locals: if locals.is_empty() { None } else { Some(locals) },
            });
        }

        if let Some(caps) = RECURSION_TRUNCATION.captures(line) {
            recursion_depth = caps[1].parse().ok();
        }

        i += 1;
    }

    (frames, recursion_depth)
}

fn parse_exception(text: &str) -> (String, String) {
    for line in text.trim().split('\n').rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = EXCEPTION_PATTERN.captures(line) {
            return (caps[1].to_string(), caps[2].to_string());
        }
        if let Some(caps) = EXCEPTION_NO_MSG_PATTERN.captures(line) {
            return (caps[1].to_string(), String::new());
        }
    }

    ("Unknown".to_string(), String::new())
}

fn parse_single_traceback(text: &str) -> ParsedTraceback {
    let (frames, recursion_depth) = parse_frames(text);
    let (exception_type, message) = parse_exception(text);
    let partial = frames.is_empty() && exception_type == "Unknown";

    ParsedTraceback {
        exception_type,
        message,
        frames,
        cause: None,
        context: None,
        partial,
        recursion_depth,
    }
}

fn split_chained(text: &str) -> (&str, Option<&str>, Option<&str>) {
    if let Some(idx) = text.find(CAUSE_MARKER) {
        let cause = &text[..idx];
        let main = &text[idx + CAUSE_MARKER.len()..];
        return (main, Some(cause), None);
    }
    if let Some(idx) = text.find(CONTEXT_MARKER) {
        let context = &text[..idx];
        let main = &text[idx + CONTEXT_MARKER.len()..];
        return (main, None, Some(context));
    }
    (text, None, None)
}

fn last_block(text: &str) -> Option<&str> {
    let blocks = find_traceback_blocks(text);
    let (start, end) = *blocks.last()?;
    Some(&text[start..end])
}

fn extract_python_traceback(text: &str) -> Option<ParsedTraceback> {
    let (main_text, cause_text, context_text) = split_chained(text);

    let mut result = parse_single_traceback(last_block(main_text)?);

    if let Some(cause) = cause_text.and_then(last_block) {
        result.cause = Some(Box::new(parse_single_traceback(cause)));
    }
    if let Some(context) = context_text.and_then(last_block) {
        result.context = Some(Box::new(parse_single_traceback(context)));
    }

    Some(result)
}

fn extract_rust_panic(text: &str) -> Option<ParsedTraceback> {
    let (message, file, line) = if let Some(caps) = RUST_PANIC_PATTERN.captures(text) {
        (
            caps[5].trim().to_string(),
            caps[2].to_string(),
            caps[3].parse().unwrap_or(0),
        )
    } else if let Some(caps) = RUST_PANIC_LEGACY_PATTERN.captures(text) {
        (
            caps[2].to_string(),
            caps[3].to_string(),
            caps[4].parse().unwrap_or(0),
        )
    } else {
        return None;
    };

    let mut frames = vec![Frame {
        file,
        line,
        function: None,
        code: None,
        locals: None,
    }];

    // RUST_BACKTRACE frames, outermost last in the panic output.
    let mut pending_function: Option<String> = None;
    for raw in text.split('\n') {
        if let Some(caps) = RUST_BACKTRACE_FUNC.captures(raw) {
            pending_function = Some(caps[1].to_string());
        } else if let Some(caps) = RUST_BACKTRACE_AT.captures(raw) {
            frames.push(Frame {
                file: caps[1].to_string(),
                line: caps[2].parse().unwrap_or(0),
                function: pending_function.take(),
                code: None,
                locals: None,
            });
        }
    }

    Some(ParsedTraceback {
        exception_type: "panic".to_string(),
        message,
        frames,
        ..ParsedTraceback::default()
    })
}

/// Extract and parse the last complete traceback from stderr.
///
/// Handles CPython tracebacks (chained exceptions, recursion truncation,
/// rich locals display) and Rust panics; returns `None` when neither
/// format is present.
pub fn extract_traceback(stderr: &str) -> Option<ParsedTraceback> {
    if stderr.trim().is_empty() {
        return None;
    }

    let text = strip_ansi(stderr);
    extract_python_traceback(&text).or_else(|| extract_rust_panic(&text))
}

/// Extract a syntax error, which CPython reports without a frame header.
pub fn extract_syntax_error(stderr: &str) -> Option<ParsedTraceback> {
    if stderr.is_empty() {
        return None;
    }

    let text = strip_ansi(stderr);
    let caps = SYNTAX_ERROR_PATTERN.captures(&text)?;

    let code = caps[3].trim();
    let frame = Frame {
        file: caps[1].to_string(),
        line: caps[2].parse().unwrap_or(0),
        function: None,
        code: if code.is_empty() {
            None
        } else {
            Some(code.to_string())
        },
        locals: None,
    };

    Some(ParsedTraceback {
        exception_type: caps[4].to_string(),
        message: caps[5].to_string(),
        frames: vec![frame],
        ..ParsedTraceback::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_TB: &str = r#"Traceback (most recent call last):
  File "app.py", line 10, in main
    value = parse(data)
  File "app.py", line 22, in parse
    return int(raw)
ValueError: invalid literal for int() with base 10: 'x'
"#;

    #[test]
    fn parses_simple_traceback() {
        let tb = extract_traceback(SIMPLE_TB).unwrap();
        assert_eq!(tb.exception_type, "ValueError");
        assert!(tb.message.contains("invalid literal"));
        assert_eq!(tb.frames.len(), 2);
        assert_eq!(tb.frames[0].file, "app.py");
        assert_eq!(tb.frames[0].line, 10);
        assert_eq!(tb.frames[0].function.as_deref(), Some("main"));
        assert_eq!(tb.frames[1].code.as_deref(), Some("return int(raw)"));
    }

    #[test]
    fn uses_last_traceback_in_output() {
        let text = format!("{SIMPLE_TB}\nsome noise\n{SIMPLE_TB}");
        let tb = extract_traceback(&text).unwrap();
        assert_eq!(tb.exception_type, "ValueError");
    }

    #[test]
    fn parses_chained_cause() {
        let text = r#"Traceback (most recent call last):
  File "low.py", line 3, in read
    raise OSError("disk")
OSError: disk

The above exception was the direct cause of the following exception:

Traceback (most recent call last):
  File "high.py", line 8, in main
    read()
RuntimeError: wrapped
"#;
        let tb = extract_traceback(text).unwrap();
        assert_eq!(tb.exception_type, "RuntimeError");
        let cause = tb.cause.as_ref().unwrap();
        assert_eq!(cause.exception_type, "OSError");
        assert_eq!(cause.message, "disk");

        let schema = tb.to_traceback();
        assert_eq!(schema.chained.unwrap()[0].exception_type, "OSError");
    }

    #[test]
    fn parses_recursion_truncation() {
        let text = r#"Traceback (most recent call last):
  File "r.py", line 2, in f
    return f(n)
  [Previous line repeated 996 more times]
RecursionError: maximum recursion depth exceeded
"#;
        let tb = extract_traceback(text).unwrap();
        assert_eq!(tb.exception_type, "RecursionError");
        assert_eq!(tb.recursion_depth, Some(996));
    }

    #[test]
    fn exception_without_message() {
        let text = "Traceback (most recent call last):\n  File \"a.py\", line 1, in m\n    x()\nKeyboardInterrupt\n";
        let tb = extract_traceback(text).unwrap();
        assert_eq!(tb.exception_type, "KeyboardInterrupt");
        assert_eq!(tb.message, "");
    }

    #[test]
    fn ansi_codes_are_stripped_first() {
        let text = SIMPLE_TB.replace("ValueError", "\x1b[31mValueError\x1b[0m");
        let tb = extract_traceback(&text).unwrap();
        assert_eq!(tb.exception_type, "ValueError");
    }

    #[test]
    fn no_traceback_returns_none() {
        assert!(extract_traceback("").is_none());
        assert!(extract_traceback("just ordinary logs\n").is_none());
    }

    #[test]
    fn parses_rust_panic() {
        let text = "thread 'main' panicked at src/main.rs:14:9:\nindex out of bounds: the len is 3 but the index is 7\nnote: run with `RUST_BACKTRACE=1` environment variable to display a backtrace\n";
        let tb = extract_traceback(text).unwrap();
        assert_eq!(tb.exception_type, "panic");
        assert!(tb.message.contains("index out of bounds"));
        assert_eq!(tb.frames[0].file, "src/main.rs");
        assert_eq!(tb.frames[0].line, 14);
    }

    #[test]
    fn parses_legacy_rust_panic() {
        let text = "thread 'worker' panicked at 'called `Option::unwrap()` on a `None` value', src/lib.rs:99:21\n";
        let tb = extract_traceback(text).unwrap();
        assert_eq!(tb.exception_type, "panic");
        assert!(tb.message.contains("unwrap"));
        assert_eq!(tb.frames[0].line, 99);
    }

    #[test]
    fn rust_backtrace_frames_are_collected() {
        let text = "thread 'main' panicked at src/main.rs:5:5:\nboom\nstack backtrace:\n   0: rust_begin_unwind\n             at /rustc/abc/library/std/src/panicking.rs:645:5\n   1: app::main\n             at ./src/main.rs:5:5\n";
        let tb = extract_traceback(text).unwrap();
        assert!(tb.frames.len() >= 3);
        assert_eq!(tb.frames[2].function.as_deref(), Some("app::main"));
    }

    #[test]
    fn parses_syntax_error() {
        let text = "  File \"bad.py\", line 1\n    print(\n          ^\nSyntaxError: unexpected EOF while parsing\n";
        let tb = extract_syntax_error(text).unwrap();
        assert_eq!(tb.exception_type, "SyntaxError");
        assert_eq!(tb.frames[0].file, "bad.py");
        assert_eq!(tb.frames[0].code.as_deref(), Some("print("));
    }

    #[test]
    fn locals_lines_are_captured() {
        let text = "Traceback (most recent call last):\n  File \"a.py\", line 4, in run\n    do(x)\n      x = 'value'\n      y = 12\nTypeError: nope\n";
        let tb = extract_traceback(text).unwrap();
        let locals = tb.frames[0].locals.as_ref().unwrap();
        assert_eq!(locals.get("x").map(String::as_str), Some("'value'"));
        assert_eq!(locals.get("y").map(String::as_str), Some("12"));
    }
}
