//! Cross-platform path anonymization over free-form text.
//!
//! Replaces identifying path fragments (home, username, temp dirs, venv and
//! site-package trees, project root) with stable placeholders while keeping
//! enough structure to read a stack trace. This is not a path parser: it is
//! an ordered chain of regex rewrites, most specific first.

use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

static TEMP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"/var/folders/[^/]+/[^/]+/[^/]+",
        r"/tmp/pytest-of-[^/]+",
        r"/tmp/[^/\s]+",
        r"/private/var/folders/[^/]+/[^/]+/[^/]+",
        r"(?i)C:\\Users\\[^\\]+\\AppData\\Local\\Temp\\[^\\]+",
        r"(?i)C:\\Windows\\Temp\\[^\\]+",
        r"/run/user/\d+/[^/]+",
    ]
    .iter()
    .map(|s| Regex::new(s).expect("temp pattern must compile"))
    .collect()
});

static SITE_PACKAGES_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[/\\](?:site-packages|dist-packages)[/\\]").expect("site pattern must compile")
});

static VENV_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"[/\\]\.venv[/\\]lib[/\\]python\d+\.\d+[/\\]",
        r"[/\\]venv[/\\]lib[/\\]python\d+\.\d+[/\\]",
        r"[/\\]\.virtualenvs[/\\][^/\\]+[/\\]lib[/\\]python\d+\.\d+[/\\]",
        r"[/\\]envs[/\\][^/\\]+[/\\]lib[/\\]python\d+\.\d+[/\\]",
    ]
    .iter()
    .map(|s| Regex::new(s).expect("venv pattern must compile"))
    .collect()
});

fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "user".to_string())
}

fn current_home() -> String {
    dirs::home_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Ordered path rewriter. Each rewrite is independently toggleable.
#[derive(Debug, Clone)]
pub struct PathAnonymizer {
    /// Project root replaced with `<PROJECT>`, both slash variants.
    pub project_root: Option<PathBuf>,
    /// Username rewritten to `<USER>` inside standard user-root paths.
    pub username: String,
    /// Home directory prefix rewritten to `~`.
    pub home_dir: String,
    pub anonymize_home: bool,
    pub anonymize_username: bool,
    pub anonymize_temp: bool,
    pub anonymize_site_packages: bool,
    pub anonymize_venv: bool,
}

impl Default for PathAnonymizer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PathAnonymizer {
    pub fn new(project_root: Option<PathBuf>) -> Self {
        Self {
            project_root,
            username: current_username(),
            home_dir: current_home(),
            anonymize_home: true,
            anonymize_username: true,
            anonymize_temp: true,
            anonymize_site_packages: true,
            anonymize_venv: true,
        }
    }

    /// Anonymize paths in free-form text. Order matters: the most specific
    /// replacements run first so later, more general ones cannot consume
    /// text a specific rewrite wanted to mark distinctly.
    pub fn anonymize(&self, text: &str) -> String {
        if text.is_empty() {
            return text.to_string();
        }

        let mut result = text.to_string();

        if let Some(root) = &self.project_root {
            let root_str = root.to_string_lossy();
            result = result.replace(root_str.as_ref(), "<PROJECT>");
            let alt = root_str.replace('/', "\\");
            if alt != root_str {
                result = result.replace(&alt, "<PROJECT>");
            }
        }

        if self.anonymize_venv {
            for pattern in VENV_PATTERNS.iter() {
                result = pattern.replace_all(&result, "/<VENV>/").into_owned();
            }
        }

        if self.anonymize_site_packages {
            result = SITE_PACKAGES_PATTERN
                .replace_all(&result, |caps: &regex::Captures<'_>| {
                    let sep = caps[0].chars().next().unwrap_or('/');
                    format!("{sep}<SITE_PACKAGES>{sep}")
                })
                .into_owned();
        }

        if self.anonymize_temp {
            for pattern in TEMP_PATTERNS.iter() {
                result = pattern.replace_all(&result, "<TMPDIR>").into_owned();
            }
        }

        if self.anonymize_home && !self.home_dir.is_empty() {
            result = result.replace(&self.home_dir, "~");
            let alt = self.home_dir.replace('/', "\\");
            if alt != self.home_dir {
                result = result.replace(&alt, "~");
            }
        }

        if self.anonymize_username && !self.username.is_empty() {
            result = self.anonymize_username_in(&result);
        }

        result
    }

    /// Anonymize a single path.
    pub fn anonymize_path(&self, path: &std::path::Path) -> String {
        self.anonymize(&path.to_string_lossy())
    }

    fn anonymize_username_in(&self, text: &str) -> String {
        let user = regex::escape(&self.username);
        let rewrites = [
            (format!(r"(/home/){user}(/|$)"), "${1}<USER>${2}"),
            (format!(r"(/Users/){user}(/|$)"), "${1}<USER>${2}"),
            (format!(r"(\\Users\\){user}(\\|$)"), "${1}<USER>${2}"),
            (r"(/run/user/)\d+(/|$)".to_string(), "${1}<UID>${2}"),
        ];

        let mut result = text.to_string();
        for (source, replacement) in rewrites {
            if let Ok(pattern) = Regex::new(&source) {
                result = pattern.replace_all(&result, replacement).into_owned();
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anonymizer(project_root: Option<&str>) -> PathAnonymizer {
        let mut a = PathAnonymizer::new(project_root.map(PathBuf::from));
        a.username = "alice".to_string();
        a.home_dir = "/home/alice".to_string();
        a
    }

    #[test]
    fn empty_input_unchanged() {
        assert_eq!(anonymizer(None).anonymize(""), "");
    }

    #[test]
    fn project_root_becomes_placeholder() {
        let a = anonymizer(Some("/home/alice/proj"));
        let out = a.anonymize("error in /home/alice/proj/src/main.rs");
        assert_eq!(out, "error in <PROJECT>/src/main.rs");
    }

    #[test]
    fn traceback_shaped_input_gets_full_chain() {
        let a = anonymizer(Some("/home/alice/proj"));
        let input =
            "  File \"/home/alice/proj/.venv/lib/python3.11/site-packages/pkg/x.py\", line 10";
        let out = a.anonymize(input);
        assert!(
            out.contains("<PROJECT>/<VENV>/<SITE_PACKAGES>/pkg/x.py"),
            "got: {out}"
        );
    }

    #[test]
    fn home_prefix_becomes_tilde() {
        let a = anonymizer(None);
        let out = a.anonymize("log at /home/alice/logs/app.log");
        assert_eq!(out, "log at ~/logs/app.log");
    }

    #[test]
    fn username_outside_home_becomes_user_placeholder() {
        let mut a = anonymizer(None);
        a.anonymize_home = false;
        let out = a.anonymize("/home/alice/data and /Users/alice/data");
        assert_eq!(out, "/home/<USER>/data and /Users/<USER>/data");
    }

    #[test]
    fn username_not_rewritten_mid_word() {
        let mut a = anonymizer(None);
        a.anonymize_home = false;
        let out = a.anonymize("/home/alicette/data");
        assert_eq!(out, "/home/alicette/data");
    }

    #[test]
    fn temp_dirs_become_tmpdir() {
        let a = anonymizer(None);
        assert_eq!(a.anonymize("wrote /tmp/build-8f2k1"), "wrote <TMPDIR>");
        assert_eq!(
            a.anonymize("cache in /var/folders/ab/cd12/T"),
            "cache in <TMPDIR>"
        );
    }

    #[test]
    fn run_user_uid_is_masked() {
        let a = anonymizer(None);
        let out = a.anonymize("socket at /run/user/1000/bus.sock");
        assert_eq!(out, "socket at <TMPDIR>");

        let mut b = anonymizer(None);
        b.anonymize_temp = false;
        let out = b.anonymize("dir /run/user/1000/");
        assert_eq!(out, "dir /run/user/<UID>/");
    }

    #[test]
    fn windows_temp_and_user_paths() {
        let mut a = anonymizer(None);
        a.home_dir = String::new();
        let out = a.anonymize(r"C:\Users\alice\AppData\Local\Temp\build123");
        assert_eq!(out, "<TMPDIR>");

        let out = a.anonymize(r"C:\Users\alice\project");
        assert_eq!(out, r"C:\Users\<USER>\project");
    }

    #[test]
    fn site_packages_keeps_separator_style() {
        let a = anonymizer(None);
        let out = a.anonymize(r"C:\py\Lib\site-packages\x.py");
        assert_eq!(out, r"C:\py\Lib\<SITE_PACKAGES>\x.py");
    }

    #[test]
    fn toggles_disable_individual_rewrites() {
        let mut a = anonymizer(None);
        a.anonymize_temp = false;
        assert_eq!(a.anonymize("/tmp/keep-me"), "/tmp/keep-me");
    }
}
