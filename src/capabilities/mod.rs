//! Core capability provider.
//!
//! Permission-agnostic access to host primitives. Every method propagates
//! transport and IO failures unchanged; retry and permission policy belong to
//! the callers in `api`.

pub mod clipboard;
pub mod filesystem;
pub mod memory;
pub mod native;
pub mod notification;
pub mod paths;
pub mod shell;
pub mod storage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RuaResult;

pub use memory::MemoryHost;
pub use native::NativeHost;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub name: String,
    pub is_file: bool,
    pub is_directory: bool,
}

/// Times are milliseconds since the Unix epoch, 0 when the platform cannot report them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStat {
    pub size: u64,
    pub is_file: bool,
    pub is_directory: bool,
    pub mtime: u64,
    pub ctime: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    pub platform: String,
    pub arch: String,
    pub family: String,
}

impl OsInfo {
    pub fn current() -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            family: std::env::consts::FAMILY.to_string(),
        }
    }
}

/// Host primitives available to extensions, before any permission check.
#[async_trait]
pub trait HostCapabilities: Send + Sync {
    async fn clipboard_read_text(&self) -> RuaResult<String>;
    async fn clipboard_write_text(&self, text: &str) -> RuaResult<()>;

    async fn notification_show(&self, options: &NotificationOptions) -> RuaResult<()>;

    /// Stored JSON decoded, or the raw string for legacy non-JSON entries.
    async fn storage_get(&self, extension_id: &str, key: &str) -> RuaResult<Option<Value>>;
    /// Always stores the JSON encoding of `value`.
    async fn storage_set(&self, extension_id: &str, key: &str, value: &Value) -> RuaResult<()>;
    async fn storage_remove(&self, extension_id: &str, key: &str) -> RuaResult<()>;

    async fn fs_read_text_file(&self, path: &str) -> RuaResult<String>;
    async fn fs_read_binary_file(&self, path: &str) -> RuaResult<Vec<u8>>;
    async fn fs_write_text_file(&self, path: &str, contents: &str) -> RuaResult<()>;
    async fn fs_write_binary_file(&self, path: &str, contents: &[u8]) -> RuaResult<()>;
    async fn fs_read_dir(&self, path: &str) -> RuaResult<Vec<DirEntry>>;
    async fn fs_exists(&self, path: &str) -> RuaResult<bool>;
    async fn fs_stat(&self, path: &str) -> RuaResult<FileStat>;

    async fn shell_execute(&self, program: &str, args: &[String]) -> RuaResult<ShellResult>;
    /// Run a full command line through the user's shell.
    async fn shell_execute_command(&self, command: &str) -> RuaResult<ShellResult>;
    /// Start a program without waiting for it; returns its pid.
    async fn shell_spawn(&self, program: &str, args: &[String]) -> RuaResult<u32>;

    fn os_info(&self) -> OsInfo {
        OsInfo::current()
    }

    fn resolve_path(&self, path: &str, base_dir: Option<&str>) -> String {
        paths::resolve_path(path, base_dir)
    }
}

/// Decode a stored storage entry.
///
/// Entries are written as JSON text; anything that fails to parse is a legacy
/// raw string and is returned verbatim. Legacy entries carry no tag, so a raw
/// string that is itself valid JSON text (`"42"`, `"true"`, `"null"`) decodes
/// as that JSON value rather than as the string.
pub fn decode_stored_value(stored: &Value) -> Value {
    match stored {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())),
        other => other.clone(),
    }
}

/// Encode a value for storage as its JSON text.
pub fn encode_stored_value(value: &Value) -> RuaResult<Value> {
    Ok(Value::String(serde_json::to_string(value)?))
}
