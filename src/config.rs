use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capabilities::paths;
use crate::error::{RuaError, RuaResult};
use crate::util;

const SETTINGS_FILE: &str = "settings.json";

/// Bounded retry schedule: the delay before attempt `n` (0-based) is
/// `initial_delay_ms * multiplier^n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay_ms: 50,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = (self.multiplier as u64).saturating_pow(attempt);
        Duration::from_millis(self.initial_delay_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub background_load_timeout_ms: u64,
    pub activate_retry: RetryPolicy,
    /// Persisted dev-mode override, re-applied on startup.
    pub dev_extension_path: Option<PathBuf>,
    /// Interpreter for `shell_execute_command`; `$SHELL`, then `sh`, when unset.
    pub shell: Option<String>,
    /// Script file extension (without dot) to interpreter program.
    pub script_interpreters: HashMap<String, String>,

    #[serde(skip)]
    path: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        let mut script_interpreters = HashMap::new();
        script_interpreters.insert("js".to_string(), "node".to_string());
        script_interpreters.insert("mjs".to_string(), "node".to_string());
        Self {
            background_load_timeout_ms: 5000,
            activate_retry: RetryPolicy::default(),
            dev_extension_path: None,
            shell: None,
            script_interpreters,
            path: PathBuf::new(),
        }
    }
}

impl HostConfig {
    pub fn load(data_dir: &Path) -> RuaResult<Self> {
        let path = data_dir.join(SETTINGS_FILE);
        let mut config = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            HostConfig::default()
        };
        config.path = path;
        Ok(config)
    }

    pub fn save(&self) -> RuaResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(RuaError::Other("Settings were not loaded from disk".into()));
        }
        let data = serde_json::to_string_pretty(self)?;
        util::atomic_write(&self.path, data.as_bytes())?;
        Ok(())
    }

    pub fn background_load_timeout(&self) -> Duration {
        Duration::from_millis(self.background_load_timeout_ms)
    }
}

/// `<platform data dir>/rua`, falling back to `~/.rua`.
pub fn default_data_dir() -> PathBuf {
    paths::app_data_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(format!(".{}", paths::APP_DIR_NAME))))
        .unwrap_or_else(|| PathBuf::from(format!(".{}", paths::APP_DIR_NAME)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..policy.attempts)
            .map(|n| policy.delay_for(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![50, 100, 200]);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig::load(dir.path()).unwrap();
        assert_eq!(config.background_load_timeout_ms, 5000);
        assert_eq!(config.script_interpreters.get("js").map(String::as_str), Some("node"));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HostConfig::load(dir.path()).unwrap();
        config.dev_extension_path = Some(PathBuf::from("/src/my-ext"));
        config.shell = Some("zsh".into());
        config.save().unwrap();

        let reloaded = HostConfig::load(dir.path()).unwrap();
        assert_eq!(reloaded.dev_extension_path, Some(PathBuf::from("/src/my-ext")));
        assert_eq!(reloaded.shell.as_deref(), Some("zsh"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"activate_retry": {"attempts": 5}}"#,
        )
        .unwrap();
        let config = HostConfig::load(dir.path()).unwrap();
        assert_eq!(config.activate_retry.attempts, 5);
        assert_eq!(config.activate_retry.initial_delay_ms, 50);
        assert_eq!(config.background_load_timeout_ms, 5000);
    }

    #[test]
    fn unsaved_default_refuses_to_write() {
        assert!(HostConfig::default().save().is_err());
    }
}
