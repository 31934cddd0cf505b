use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use super::storage::ExtensionStorage;
use super::{
    clipboard, filesystem, notification, shell, DirEntry, FileStat, HostCapabilities,
    NotificationOptions, ShellResult,
};
use crate::error::RuaResult;

/// Capability provider backed by the real operating system.
pub struct NativeHost {
    storage: ExtensionStorage,
    shell: Option<String>,
}

impl NativeHost {
    pub fn new(data_dir: &Path, shell: Option<String>) -> Self {
        notification::init();
        Self {
            storage: ExtensionStorage::new(data_dir),
            shell,
        }
    }

    pub fn storage(&self) -> &ExtensionStorage {
        &self.storage
    }
}

#[async_trait]
impl HostCapabilities for NativeHost {
    async fn clipboard_read_text(&self) -> RuaResult<String> {
        clipboard::read_text().await
    }

    async fn clipboard_write_text(&self, text: &str) -> RuaResult<()> {
        clipboard::write_text(text.to_string()).await
    }

    async fn notification_show(&self, options: &NotificationOptions) -> RuaResult<()> {
        notification::show(options.clone()).await
    }

    async fn storage_get(&self, extension_id: &str, key: &str) -> RuaResult<Option<Value>> {
        self.storage.get(extension_id, key).await
    }

    async fn storage_set(&self, extension_id: &str, key: &str, value: &Value) -> RuaResult<()> {
        self.storage.set(extension_id, key, value).await
    }

    async fn storage_remove(&self, extension_id: &str, key: &str) -> RuaResult<()> {
        self.storage.remove(extension_id, key).await
    }

    async fn fs_read_text_file(&self, path: &str) -> RuaResult<String> {
        filesystem::read_text_file(path).await
    }

    async fn fs_read_binary_file(&self, path: &str) -> RuaResult<Vec<u8>> {
        filesystem::read_binary_file(path).await
    }

    async fn fs_write_text_file(&self, path: &str, contents: &str) -> RuaResult<()> {
        filesystem::write_text_file(path, contents).await
    }

    async fn fs_write_binary_file(&self, path: &str, contents: &[u8]) -> RuaResult<()> {
        filesystem::write_binary_file(path, contents).await
    }

    async fn fs_read_dir(&self, path: &str) -> RuaResult<Vec<DirEntry>> {
        filesystem::read_dir(path).await
    }

    async fn fs_exists(&self, path: &str) -> RuaResult<bool> {
        filesystem::exists(path).await
    }

    async fn fs_stat(&self, path: &str) -> RuaResult<FileStat> {
        filesystem::stat(path).await
    }

    async fn shell_execute(&self, program: &str, args: &[String]) -> RuaResult<ShellResult> {
        shell::execute(program, args).await
    }

    async fn shell_execute_command(&self, command: &str) -> RuaResult<ShellResult> {
        let shell = shell::default_shell(self.shell.as_deref());
        shell::execute_command(&shell, command).await
    }

    async fn shell_spawn(&self, program: &str, args: &[String]) -> RuaResult<u32> {
        shell::spawn(program, args)
    }
}
