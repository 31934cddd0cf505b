//! In-memory capability provider.
//!
//! Records every call and keeps fake clipboard, storage, and file state so the
//! hosts can run headless (tests, CI, previews) without touching the OS.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    decode_stored_value, encode_stored_value, DirEntry, FileStat, HostCapabilities,
    NotificationOptions, ShellResult,
};
use crate::error::{RuaError, RuaResult};

#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    ClipboardReadText,
    ClipboardWriteText(String),
    NotificationShow(NotificationOptions),
    StorageGet { extension_id: String, key: String },
    StorageSet { extension_id: String, key: String },
    StorageRemove { extension_id: String, key: String },
    FsRead(String),
    FsWrite(String),
    FsReadDir(String),
    FsExists(String),
    FsStat(String),
    ShellExecute { program: String, args: Vec<String> },
    ShellExecuteCommand(String),
    ShellSpawn { program: String, args: Vec<String> },
}

#[derive(Default)]
struct MemoryState {
    clipboard: String,
    notifications: Vec<NotificationOptions>,
    /// Raw stored entries, keyed by (extension id, key).
    storage: HashMap<(String, String), Value>,
    files: HashMap<String, Vec<u8>>,
    shell_results: HashMap<String, ShellResult>,
    calls: Vec<HostCall>,
}

#[derive(Default)]
pub struct MemoryHost {
    state: Mutex<MemoryState>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.lock().files.insert(path.to_string(), contents.as_bytes().to_vec());
        self
    }

    pub fn with_clipboard(self, text: &str) -> Self {
        self.lock().clipboard = text.to_string();
        self
    }

    /// Seed a raw stored entry, bypassing JSON encoding (legacy data).
    pub fn with_raw_storage(self, extension_id: &str, key: &str, raw: Value) -> Self {
        self.lock()
            .storage
            .insert((extension_id.to_string(), key.to_string()), raw);
        self
    }

    /// Canned result for `program` (both `shell_execute` and `shell_execute_command`).
    pub fn with_shell_result(self, program: &str, result: ShellResult) -> Self {
        self.lock().shell_results.insert(program.to_string(), result);
        self
    }

    pub fn clipboard(&self) -> String {
        self.lock().clipboard.clone()
    }

    pub fn notifications(&self) -> Vec<NotificationOptions> {
        self.lock().notifications.clone()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.lock().calls.clone()
    }

    pub fn was_called(&self, call: &HostCall) -> bool {
        self.lock().calls.contains(call)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: HostCall) {
        self.lock().calls.push(call);
    }

    fn shell_result(&self, program: &str, echo: String) -> ShellResult {
        self.lock()
            .shell_results
            .get(program)
            .cloned()
            .unwrap_or(ShellResult {
                success: true,
                stdout: echo,
                stderr: String::new(),
                exit_code: Some(0),
            })
    }
}

fn not_found(path: &str) -> RuaError {
    RuaError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{}: not found", path),
    ))
}

#[async_trait]
impl HostCapabilities for MemoryHost {
    async fn clipboard_read_text(&self) -> RuaResult<String> {
        self.record(HostCall::ClipboardReadText);
        Ok(self.clipboard())
    }

    async fn clipboard_write_text(&self, text: &str) -> RuaResult<()> {
        self.record(HostCall::ClipboardWriteText(text.to_string()));
        self.lock().clipboard = text.to_string();
        Ok(())
    }

    async fn notification_show(&self, options: &NotificationOptions) -> RuaResult<()> {
        self.record(HostCall::NotificationShow(options.clone()));
        self.lock().notifications.push(options.clone());
        Ok(())
    }

    async fn storage_get(&self, extension_id: &str, key: &str) -> RuaResult<Option<Value>> {
        self.record(HostCall::StorageGet {
            extension_id: extension_id.to_string(),
            key: key.to_string(),
        });
        Ok(self
            .lock()
            .storage
            .get(&(extension_id.to_string(), key.to_string()))
            .map(decode_stored_value))
    }

    async fn storage_set(&self, extension_id: &str, key: &str, value: &Value) -> RuaResult<()> {
        self.record(HostCall::StorageSet {
            extension_id: extension_id.to_string(),
            key: key.to_string(),
        });
        let encoded = encode_stored_value(value)?;
        self.lock()
            .storage
            .insert((extension_id.to_string(), key.to_string()), encoded);
        Ok(())
    }

    async fn storage_remove(&self, extension_id: &str, key: &str) -> RuaResult<()> {
        self.record(HostCall::StorageRemove {
            extension_id: extension_id.to_string(),
            key: key.to_string(),
        });
        self.lock()
            .storage
            .remove(&(extension_id.to_string(), key.to_string()));
        Ok(())
    }

    async fn fs_read_text_file(&self, path: &str) -> RuaResult<String> {
        self.record(HostCall::FsRead(path.to_string()));
        let bytes = self.file(path).ok_or_else(|| not_found(path))?;
        String::from_utf8(bytes).map_err(|e| RuaError::Other(e.to_string()))
    }

    async fn fs_read_binary_file(&self, path: &str) -> RuaResult<Vec<u8>> {
        self.record(HostCall::FsRead(path.to_string()));
        self.file(path).ok_or_else(|| not_found(path))
    }

    async fn fs_write_text_file(&self, path: &str, contents: &str) -> RuaResult<()> {
        self.fs_write_binary_file(path, contents.as_bytes()).await
    }

    async fn fs_write_binary_file(&self, path: &str, contents: &[u8]) -> RuaResult<()> {
        self.record(HostCall::FsWrite(path.to_string()));
        self.lock().files.insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn fs_read_dir(&self, path: &str) -> RuaResult<Vec<DirEntry>> {
        self.record(HostCall::FsReadDir(path.to_string()));
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let state = self.lock();
        let mut names: Vec<DirEntry> = Vec::new();
        for file in state.files.keys() {
            if let Some(rest) = file.strip_prefix(&prefix) {
                let (name, is_dir) = match rest.split_once('/') {
                    Some((dir, _)) => (dir.to_string(), true),
                    None => (rest.to_string(), false),
                };
                if !names.iter().any(|e| e.name == name) {
                    names.push(DirEntry {
                        name,
                        is_file: !is_dir,
                        is_directory: is_dir,
                    });
                }
            }
        }
        names.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(names)
    }

    async fn fs_exists(&self, path: &str) -> RuaResult<bool> {
        self.record(HostCall::FsExists(path.to_string()));
        Ok(self.lock().files.contains_key(path))
    }

    async fn fs_stat(&self, path: &str) -> RuaResult<FileStat> {
        self.record(HostCall::FsStat(path.to_string()));
        let bytes = self.file(path).ok_or_else(|| not_found(path))?;
        Ok(FileStat {
            size: bytes.len() as u64,
            is_file: true,
            is_directory: false,
            mtime: 0,
            ctime: 0,
        })
    }

    async fn shell_execute(&self, program: &str, args: &[String]) -> RuaResult<ShellResult> {
        self.record(HostCall::ShellExecute {
            program: program.to_string(),
            args: args.to_vec(),
        });
        let echo = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(self.shell_result(program, echo))
    }

    async fn shell_execute_command(&self, command: &str) -> RuaResult<ShellResult> {
        self.record(HostCall::ShellExecuteCommand(command.to_string()));
        let program = command.split_whitespace().next().unwrap_or_default();
        Ok(self.shell_result(program, command.to_string()))
    }

    async fn shell_spawn(&self, program: &str, args: &[String]) -> RuaResult<u32> {
        self.record(HostCall::ShellSpawn {
            program: program.to_string(),
            args: args.to_vec(),
        });
        Ok(4242)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn records_calls() {
        let host = MemoryHost::new();
        host.clipboard_write_text("copied").await.unwrap();
        assert_eq!(host.clipboard_read_text().await.unwrap(), "copied");
        assert!(host.was_called(&HostCall::ClipboardWriteText("copied".into())));
        assert_eq!(host.calls().len(), 2);
    }

    #[tokio::test]
    async fn storage_uses_json_encoding() {
        let host = MemoryHost::new().with_raw_storage("e", "legacy", json!("raw words"));
        host.storage_set("e", "obj", &json!({"x": [1, 2]})).await.unwrap();
        assert_eq!(host.storage_get("e", "obj").await.unwrap(), Some(json!({"x": [1, 2]})));
        assert_eq!(host.storage_get("e", "legacy").await.unwrap(), Some(json!("raw words")));
    }

    #[tokio::test]
    async fn read_dir_derives_entries_from_paths() {
        let host = MemoryHost::new()
            .with_file("/docs/a.txt", "a")
            .with_file("/docs/sub/b.txt", "b");
        let entries = host.fs_read_dir("/docs").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.txt");
        assert!(entries[1].is_directory);
    }

    #[tokio::test]
    async fn missing_files_are_io_errors() {
        let host = MemoryHost::new();
        assert!(matches!(
            host.fs_read_text_file("/nope").await,
            Err(RuaError::Io(_))
        ));
    }
}
