use regex::Regex;
use std::path::{Component, Path, PathBuf};

/// Values substituted for `$HOME` and `$APPDATA` in `allowPaths` patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEnv {
    pub home: Option<PathBuf>,
    pub app_data: Option<PathBuf>,
}

impl PathEnv {
    /// Resolve from the current user's environment.
    pub fn current() -> Self {
        Self {
            home: dirs::home_dir(),
            app_data: crate::capabilities::paths::app_data_dir(),
        }
    }

    /// Replace `$HOME` / `$APPDATA` tokens. Unknown or unresolvable variables are left as-is.
    pub fn expand(&self, pattern: &str) -> String {
        let mut expanded = pattern.to_string();
        // longer token first
        if let Some(app_data) = &self.app_data {
            expanded = expanded.replace("$APPDATA", &app_data.to_string_lossy());
        }
        if let Some(home) = &self.home {
            expanded = expanded.replace("$HOME", &home.to_string_lossy());
        }
        expanded
    }
}

/// Translate a path glob into an anchored regular expression.
///
/// `**` matches any depth (including `/`), `*` matches within one path segment,
/// everything else is literal.
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '*' {
            if chars.peek() == Some(&'*') {
                chars.next();
                out.push_str(".*");
            } else {
                out.push_str("[^/]*");
            }
        } else {
            let mut buf = [0u8; 4];
            out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
        }
    }
    out.push('$');
    out
}

/// Whether `path` matches `pattern` after environment expansion.
/// A pattern that fails to compile never matches.
pub fn glob_matches(env: &PathEnv, pattern: &str, path: &str) -> bool {
    let expanded = env.expand(pattern);
    match Regex::new(&glob_to_regex(&expanded)) {
        Ok(re) => re.is_match(path),
        Err(e) => {
            log::warn!("Ignoring unusable path pattern '{}': {}", pattern, e);
            false
        }
    }
}

/// Resolve `.` and `..` in `path` without touching the filesystem.
///
/// Returns `None` when a `..` would climb above the root, or above the first
/// component of a relative path.
pub fn normalize_lexical(path: &str) -> Option<String> {
    let mut components: Vec<Component> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match components.last() {
                Some(Component::Normal(_)) => {
                    components.pop();
                }
                _ => return None,
            },
            c => components.push(c),
        }
    }
    let normalized: PathBuf = components.iter().collect();
    Some(normalized.to_string_lossy().to_string())
}

/// Whether `value` matches the anchored regular expression `pattern`.
/// A malformed pattern never matches.
pub fn anchored_match(pattern: &str, value: &str) -> bool {
    match Regex::new(&format!("^(?:{})$", pattern)) {
        Ok(re) => re.is_match(value),
        Err(e) => {
            log::warn!("Ignoring malformed argument pattern '{}': {}", pattern, e);
            false
        }
    }
}
