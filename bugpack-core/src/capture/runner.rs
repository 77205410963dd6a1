//! Process runner: execute a command and capture its output streams.
//!
//! The runner never panics on a failing subprocess; spawn failures, signals
//! and timeouts are all recorded in the [`CaptureResult`].

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use std::collections::HashSet;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

static ANSI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]|\x1b\][^\x07]*\x07").expect("ansi pattern must compile")
});

/// Exit code recorded when the command could not be started.
pub const EXIT_SPAWN_FAILED: i32 = -1;
/// Exit code recorded when the command timed out.
pub const EXIT_TIMED_OUT: i32 = -2;

/// Configuration for command capture.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Maximum execution time.
    pub timeout: Duration,
    /// Maximum bytes kept per stream.
    pub max_output_bytes: usize,
    /// Keep ANSI escape codes instead of stripping them.
    pub preserve_ansi: bool,
    /// Normalize `\r\n` and `\r` to `\n`.
    pub strip_cr: bool,
    /// Working directory for the command.
    pub cwd: Option<PathBuf>,
    /// When non-empty, only these environment variables are passed through.
    pub env_passthrough: HashSet<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_output_bytes: 10_000_000,
            preserve_ansi: false,
            strip_cr: true,
            cwd: None,
            env_passthrough: HashSet::new(),
        }
    }
}

/// Result of command capture.
#[derive(Debug, Clone, Default)]
pub struct CaptureResult {
    /// The executed command argv.
    pub command: Vec<String>,
    pub stdout: String,
    pub stderr: String,
    /// Process exit code; [`EXIT_SPAWN_FAILED`] or [`EXIT_TIMED_OUT`] for
    /// runner-level failures, negative signal number when killed.
    pub exit_code: i32,
    pub duration_ms: u64,
    /// Signal that terminated the process, when one did.
    pub signal_num: Option<i32>,
    pub timed_out: bool,
    pub truncated_stdout: bool,
    pub truncated_stderr: bool,
    /// Stream was binary and has been base64-encoded.
    pub is_binary_stdout: bool,
    pub is_binary_stderr: bool,
    /// Set when the command failed to start.
    pub error_message: Option<String>,
}

fn strip_ansi(text: &str) -> String {
    ANSI_PATTERN.replace_all(text, "").into_owned()
}

/// Decode captured bytes, falling back to base64 for binary streams.
///
/// Returns `(text, is_binary, replacement_count)`.
fn decode_output(data: &[u8]) -> (String, bool, usize) {
    if data.is_empty() {
        return (String::new(), false, 0);
    }

    match std::str::from_utf8(data) {
        Ok(text) => (text.to_string(), false, 0),
        Err(_) => {
            let lossy = String::from_utf8_lossy(data);
            let replacements = lossy.matches('\u{FFFD}').count();
            if replacements > data.len() / 10 {
                (BASE64.encode(data), true, 0)
            } else {
                (lossy.into_owned(), false, replacements)
            }
        }
    }
}

fn truncate_output(mut data: Vec<u8>, max_bytes: usize) -> (Vec<u8>, bool) {
    if data.len() <= max_bytes {
        return (data, false);
    }

    let omitted = data.len() - max_bytes;
    data.truncate(max_bytes);
    data.extend_from_slice(format!("\n[TRUNCATED: {omitted} bytes omitted]\n").as_bytes());
    (data, true)
}

fn normalize_output(text: &str, config: &CaptureConfig) -> String {
    let mut text = text.to_string();
    if config.strip_cr {
        text = text.replace("\r\n", "\n").replace('\r', "\n");
    }
    if !config.preserve_ansi {
        text = strip_ansi(&text);
    }
    text
}

fn spawn_error_message(e: &std::io::Error, program: &str) -> String {
    match e.kind() {
        std::io::ErrorKind::NotFound => format!("Command not found: {program}"),
        std::io::ErrorKind::PermissionDenied => format!("Permission denied: {program}"),
        _ => format!("OS error: {e}"),
    }
}

fn reader_thread<R: Read + Send + 'static>(stream: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_end(&mut buf);
        }
        buf
    })
}

/// Execute a command and capture its output.
pub fn run_command(cmd: &[String], config: &CaptureConfig) -> CaptureResult {
    let mut result = CaptureResult {
        command: cmd.to_vec(),
        ..CaptureResult::default()
    };

    let Some(program) = cmd.first() else {
        result.exit_code = EXIT_SPAWN_FAILED;
        result.error_message = Some("empty command".to_string());
        return result;
    };

    if let Some(cwd) = &config.cwd
        && !cwd.is_dir()
    {
        result.exit_code = EXIT_SPAWN_FAILED;
        result.error_message = Some(format!(
            "Working directory does not exist: {}",
            cwd.display()
        ));
        return result;
    }

    let mut command = Command::new(program);
    command
        .args(&cmd[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(cwd) = &config.cwd {
        command.current_dir(cwd);
    }

    if !config.env_passthrough.is_empty() {
        command.env_clear();
        for (key, value) in std::env::vars() {
            if config.env_passthrough.contains(&key) {
                command.env(key, value);
            }
        }
    }

    let start = Instant::now();

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            let message = spawn_error_message(&e, program);
            result.exit_code = EXIT_SPAWN_FAILED;
            result.stderr = message.clone();
            result.error_message = Some(message);
            result.duration_ms = start.elapsed().as_millis() as u64;
            return result;
        }
    };

    let stdout_handle = reader_thread(child.stdout.take());
    let stderr_handle = reader_thread(child.stderr.take());

    let deadline = start + config.timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    warn!(command = %program, "command timed out, killing");
                    let _ = child.kill();
                    let _ = child.wait();
                    result.timed_out = true;
                    result.exit_code = EXIT_TIMED_OUT;
                    #[cfg(unix)]
                    {
                        result.signal_num = Some(libc_sigkill());
                    }
                    break None;
                }
                thread::sleep(Duration::from_millis(25));
            }
            Err(e) => {
                result.exit_code = EXIT_SPAWN_FAILED;
                result.error_message = Some(format!("OS error: {e}"));
                break None;
            }
        }
    };

    let stdout_data = stdout_handle.join().unwrap_or_default();
    let stderr_data = stderr_handle.join().unwrap_or_default();
    result.duration_ms = start.elapsed().as_millis() as u64;

    if let Some(status) = status {
        match status.code() {
            Some(code) => result.exit_code = code,
            None => {
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    if let Some(signal) = status.signal() {
                        result.signal_num = Some(signal);
                        result.exit_code = -signal;
                    }
                }
                #[cfg(not(unix))]
                {
                    result.exit_code = EXIT_SPAWN_FAILED;
                }
            }
        }
    }

    let (stdout_data, truncated_stdout) = truncate_output(stdout_data, config.max_output_bytes);
    let (stderr_data, truncated_stderr) = truncate_output(stderr_data, config.max_output_bytes);
    result.truncated_stdout = truncated_stdout;
    result.truncated_stderr = truncated_stderr;

    let (stdout_text, binary_stdout, _) = decode_output(&stdout_data);
    let (stderr_text, binary_stderr, _) = decode_output(&stderr_data);
    result.is_binary_stdout = binary_stdout;
    result.is_binary_stderr = binary_stderr;

    result.stdout = if binary_stdout {
        stdout_text
    } else {
        normalize_output(&stdout_text, config)
    };
    result.stderr = if binary_stderr {
        stderr_text
    } else {
        normalize_output(&stderr_text, config)
    };

    debug!(
        command = %program,
        exit_code = result.exit_code,
        duration_ms = result.duration_ms,
        "command captured"
    );
    result
}

#[cfg(unix)]
fn libc_sigkill() -> i32 {
    9
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn strip_ansi_removes_color_codes() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m plain"), "red plain");
    }

    #[test]
    fn decode_keeps_valid_utf8() {
        let (text, binary, errors) = decode_output(b"hello");
        assert_eq!(text, "hello");
        assert!(!binary);
        assert_eq!(errors, 0);
    }

    #[test]
    fn decode_flags_mostly_binary_as_base64() {
        let data: Vec<u8> = (0u8..=255).collect();
        let (text, binary, _) = decode_output(&data);
        assert!(binary);
        assert_eq!(BASE64.decode(text).unwrap(), data);
    }

    #[test]
    fn truncation_appends_marker() {
        let (data, truncated) = truncate_output(vec![b'x'; 100], 10);
        assert!(truncated);
        let text = String::from_utf8(data).unwrap();
        assert!(text.starts_with("xxxxxxxxxx\n[TRUNCATED: 90 bytes omitted]"));
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_and_exit_code() {
        let result = run_command(&cmd(&["sh", "-c", "echo out; echo err >&2; exit 3"]), &CaptureConfig::default());
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert_eq!(result.exit_code, 3);
        assert!(!result.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn missing_command_is_reported_not_panicked() {
        let result = run_command(&cmd(&["definitely-not-a-command-x9"]), &CaptureConfig::default());
        assert_eq!(result.exit_code, EXIT_SPAWN_FAILED);
        assert!(result.error_message.unwrap().contains("not found"));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_the_child() {
        let config = CaptureConfig {
            timeout: Duration::from_millis(200),
            ..CaptureConfig::default()
        };
        let result = run_command(&cmd(&["sleep", "30"]), &config);
        assert!(result.timed_out);
        assert_eq!(result.exit_code, EXIT_TIMED_OUT);
        assert!(result.duration_ms < 5_000);
    }

    #[test]
    fn invalid_cwd_is_an_error_result() {
        let config = CaptureConfig {
            cwd: Some(PathBuf::from("/no/such/dir")),
            ..CaptureConfig::default()
        };
        let result = run_command(&cmd(&["true"]), &config);
        assert_eq!(result.exit_code, EXIT_SPAWN_FAILED);
        assert!(result.error_message.is_some());
    }
}
