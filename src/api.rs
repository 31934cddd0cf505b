//! Capability-checked extension API.
//!
//! One [`ExtensionApi`] per loaded extension context. Background scripts and
//! views both go through it, so the two contexts enforce identical checks.
//! Every check runs before the host call; a denial never reaches the host.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::capabilities::{
    DirEntry, FileStat, HostCapabilities, NotificationOptions, OsInfo, ShellResult,
};
use crate::error::RuaResult;
use crate::permissions::{
    has_command_line_permission, has_path_permission_in, has_shell_permission,
    has_simple_permission, normalize_lexical, permission_error, ExtensionHostInfo, PathEnv,
    Permission,
};
use crate::rpc::{Params, RpcError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub id: String,
    pub name: String,
    pub version: String,
}

pub struct ExtensionApi {
    info: ExtensionHostInfo,
    host: Arc<dyn HostCapabilities>,
    env: PathEnv,
}

impl ExtensionApi {
    pub fn new(info: ExtensionHostInfo, host: Arc<dyn HostCapabilities>) -> Self {
        Self {
            info,
            host,
            env: PathEnv::current(),
        }
    }

    /// Use explicit `$HOME` / `$APPDATA` values for path rules.
    pub fn with_path_env(mut self, env: PathEnv) -> Self {
        self.env = env;
        self
    }

    pub fn extension_id(&self) -> &str {
        &self.info.id
    }

    pub fn host_info(&self) -> &ExtensionHostInfo {
        &self.info
    }

    pub fn extension_info(&self) -> ExtensionInfo {
        ExtensionInfo {
            id: self.info.id.clone(),
            name: self.info.name.clone(),
            version: self.info.version.clone(),
        }
    }

    pub fn check_permission(&self, permission: Permission) -> RuaResult<()> {
        if has_simple_permission(&self.info.permissions, permission.as_str()) {
            Ok(())
        } else {
            Err(permission_error(permission.as_str(), None))
        }
    }

    /// Returns the lexically normalized path the host should act on.
    pub fn check_path_permission(&self, permission: Permission, path: &str) -> RuaResult<String> {
        if has_path_permission_in(&self.env, &self.info, permission.as_str(), path) {
            Ok(normalize_lexical(path).unwrap_or_else(|| path.to_string()))
        } else {
            Err(permission_error(permission.as_str(), Some(path)))
        }
    }

    pub fn check_shell_permission(&self, program: &str, args: &[String]) -> RuaResult<()> {
        if has_shell_permission(&self.info, program, args) {
            Ok(())
        } else {
            let command = std::iter::once(program.to_string())
                .chain(args.iter().cloned())
                .collect::<Vec<_>>()
                .join(" ");
            Err(permission_error(Permission::Shell.as_str(), Some(&command)))
        }
    }

    pub async fn clipboard_read_text(&self) -> RuaResult<String> {
        self.check_permission(Permission::Clipboard)?;
        self.host.clipboard_read_text().await
    }

    pub async fn clipboard_write_text(&self, text: &str) -> RuaResult<()> {
        self.check_permission(Permission::Clipboard)?;
        self.host.clipboard_write_text(text).await
    }

    pub async fn notification_show(&self, options: &NotificationOptions) -> RuaResult<()> {
        self.check_permission(Permission::Notification)?;
        self.host.notification_show(options).await
    }

    pub async fn storage_get(&self, key: &str) -> RuaResult<Option<Value>> {
        self.check_permission(Permission::Storage)?;
        self.host.storage_get(&self.info.id, key).await
    }

    pub async fn storage_set(&self, key: &str, value: &Value) -> RuaResult<()> {
        self.check_permission(Permission::Storage)?;
        self.host.storage_set(&self.info.id, key, value).await
    }

    pub async fn storage_remove(&self, key: &str) -> RuaResult<()> {
        self.check_permission(Permission::Storage)?;
        self.host.storage_remove(&self.info.id, key).await
    }

    pub async fn fs_read_text_file(&self, path: &str) -> RuaResult<String> {
        let path = self.check_path_permission(Permission::FsRead, path)?;
        self.host.fs_read_text_file(&path).await
    }

    pub async fn fs_read_binary_file(&self, path: &str) -> RuaResult<Vec<u8>> {
        let path = self.check_path_permission(Permission::FsRead, path)?;
        self.host.fs_read_binary_file(&path).await
    }

    pub async fn fs_write_text_file(&self, path: &str, contents: &str) -> RuaResult<()> {
        let path = self.check_path_permission(Permission::FsWrite, path)?;
        self.host.fs_write_text_file(&path, contents).await
    }

    pub async fn fs_write_binary_file(&self, path: &str, contents: &[u8]) -> RuaResult<()> {
        let path = self.check_path_permission(Permission::FsWrite, path)?;
        self.host.fs_write_binary_file(&path, contents).await
    }

    pub async fn fs_read_dir(&self, path: &str) -> RuaResult<Vec<DirEntry>> {
        let path = self.check_path_permission(Permission::FsRead, path)?;
        self.host.fs_read_dir(&path).await
    }

    pub async fn fs_exists(&self, path: &str) -> RuaResult<bool> {
        let path = self.check_path_permission(Permission::FsRead, path)?;
        self.host.fs_exists(&path).await
    }

    pub async fn fs_stat(&self, path: &str) -> RuaResult<FileStat> {
        let path = self.check_path_permission(Permission::FsRead, path)?;
        self.host.fs_stat(&path).await
    }

    pub async fn shell_execute(&self, program: &str, args: &[String]) -> RuaResult<ShellResult> {
        self.check_shell_permission(program, args)?;
        self.host.shell_execute(program, args).await
    }

    /// Under `allowCommands` rules only plain word lists pass, checked as
    /// `program args..` from the whitespace split of `command`.
    pub async fn shell_execute_command(&self, command: &str) -> RuaResult<ShellResult> {
        if !has_command_line_permission(&self.info, command) {
            return Err(permission_error(Permission::Shell.as_str(), Some(command)));
        }
        self.host.shell_execute_command(command).await
    }

    pub async fn shell_spawn(&self, program: &str, args: &[String]) -> RuaResult<u32> {
        self.check_shell_permission(program, args)?;
        self.host.shell_spawn(program, args).await
    }

    pub fn os_info(&self) -> OsInfo {
        self.host.os_info()
    }

    pub fn resolve_path(&self, path: &str, base_dir: Option<&str>) -> String {
        self.host.resolve_path(path, base_dir)
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::Protocol(e.to_string()))
}

/// Route a capability method called over RPC to `api`.
///
/// Returns `None` for methods that are not capability calls, so each context can
/// layer its own methods (UI control, event subscription) on top.
pub async fn dispatch(
    api: &ExtensionApi,
    method: &str,
    params: &Value,
) -> Option<Result<Value, RpcError>> {
    let p = Params::new(params);
    let outcome = match method {
        "getExtensionInfo" => to_value(api.extension_info()),
        "clipboardReadText" => call(api.clipboard_read_text().await),
        "clipboardWriteText" => match p.required::<String>(0, "text") {
            Ok(text) => call(api.clipboard_write_text(&text).await),
            Err(e) => Err(e),
        },
        "notificationShow" => match p.required::<NotificationOptions>(0, "options") {
            Ok(options) => call(api.notification_show(&options).await),
            Err(e) => Err(e),
        },
        "storageGet" => match p.required::<String>(0, "key") {
            Ok(key) => call(api.storage_get(&key).await),
            Err(e) => Err(e),
        },
        "storageSet" => match (p.required::<String>(0, "key"), p.optional::<Value>(1, "value")) {
            (Ok(key), Ok(value)) => call(api.storage_set(&key, &value.unwrap_or(Value::Null)).await),
            (Err(e), _) | (_, Err(e)) => Err(e),
        },
        "storageRemove" => match p.required::<String>(0, "key") {
            Ok(key) => call(api.storage_remove(&key).await),
            Err(e) => Err(e),
        },
        "fsReadTextFile" => match p.required::<String>(0, "path") {
            Ok(path) => call(api.fs_read_text_file(&path).await),
            Err(e) => Err(e),
        },
        "fsReadBinaryFile" => match p.required::<String>(0, "path") {
            Ok(path) => call(api.fs_read_binary_file(&path).await),
            Err(e) => Err(e),
        },
        "fsWriteTextFile" => match (p.required::<String>(0, "path"), p.required::<String>(1, "contents")) {
            (Ok(path), Ok(contents)) => call(api.fs_write_text_file(&path, &contents).await),
            (Err(e), _) | (_, Err(e)) => Err(e),
        },
        "fsWriteBinaryFile" => match (p.required::<String>(0, "path"), p.required::<Vec<u8>>(1, "contents")) {
            (Ok(path), Ok(contents)) => call(api.fs_write_binary_file(&path, &contents).await),
            (Err(e), _) | (_, Err(e)) => Err(e),
        },
        "fsReadDir" => match p.required::<String>(0, "path") {
            Ok(path) => call(api.fs_read_dir(&path).await),
            Err(e) => Err(e),
        },
        "fsExists" => match p.required::<String>(0, "path") {
            Ok(path) => call(api.fs_exists(&path).await),
            Err(e) => Err(e),
        },
        "fsStat" => match p.required::<String>(0, "path") {
            Ok(path) => call(api.fs_stat(&path).await),
            Err(e) => Err(e),
        },
        "shellExecute" => match (p.required::<String>(0, "program"), p.optional::<Vec<String>>(1, "args")) {
            (Ok(program), Ok(args)) => call(api.shell_execute(&program, &args.unwrap_or_default()).await),
            (Err(e), _) | (_, Err(e)) => Err(e),
        },
        "shellExecuteCommand" => match p.required::<String>(0, "command") {
            Ok(command) => call(api.shell_execute_command(&command).await),
            Err(e) => Err(e),
        },
        "shellSpawn" => match (p.required::<String>(0, "program"), p.optional::<Vec<String>>(1, "args")) {
            (Ok(program), Ok(args)) => call(api.shell_spawn(&program, &args.unwrap_or_default()).await),
            (Err(e), _) | (_, Err(e)) => Err(e),
        },
        "osInfo" => to_value(api.os_info()),
        "resolvePath" => match (p.required::<String>(0, "path"), p.optional::<String>(1, "baseDir")) {
            (Ok(path), Ok(base)) => Ok(json!(api.resolve_path(&path, base.as_deref()))),
            (Err(e), _) | (_, Err(e)) => Err(e),
        },
        _ => return None,
    };
    Some(outcome)
}

fn call<T: Serialize>(result: RuaResult<T>) -> Result<Value, RpcError> {
    match result {
        Ok(value) => to_value(value),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::memory::HostCall;
    use crate::capabilities::MemoryHost;
    use crate::error::RuaError;
    use crate::permissions::ParsedPermission;
    use std::path::PathBuf;

    fn env() -> PathEnv {
        PathEnv {
            home: Some(PathBuf::from("/home/ana")),
            app_data: None,
        }
    }

    fn api(info: ExtensionHostInfo) -> (ExtensionApi, Arc<MemoryHost>) {
        let host = Arc::new(MemoryHost::new().with_file("/home/ana/Documents/a.txt", "hello"));
        (ExtensionApi::new(info, host.clone()).with_path_env(env()), host)
    }

    #[tokio::test]
    async fn denial_happens_before_host_call() {
        let (api, host) = api(ExtensionHostInfo::new("e", "E", "1.0.0"));
        let err = api.clipboard_read_text().await.unwrap_err();
        assert!(matches!(err, RuaError::PermissionDenied { .. }));
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn storage_is_scoped_to_extension() {
        let (api, host) = api(ExtensionHostInfo::new("notes", "Notes", "1.0.0").with_permissions(&["storage"]));
        api.storage_set("k", &json!(1)).await.unwrap();
        assert!(host.was_called(&HostCall::StorageSet {
            extension_id: "notes".into(),
            key: "k".into()
        }));
    }

    #[tokio::test]
    async fn path_rules_gate_filesystem() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0")
            .with_permissions(&["fs:read"])
            .with_parsed(ParsedPermission::new("fs:read").with_paths(&["$HOME/Documents/**"]));
        let (api, _host) = api(info);

        assert_eq!(api.fs_read_text_file("/home/ana/Documents/a.txt").await.unwrap(), "hello");
        let err = api.fs_read_text_file("/etc/passwd").await.unwrap_err();
        assert_eq!(err.to_string(), "PERMISSION_DENIED: fs:read (/etc/passwd)");
        // fs:read does not grant writes
        assert!(api.fs_write_text_file("/home/ana/Documents/b.txt", "x").await.is_err());
    }

    #[tokio::test]
    async fn command_lines_are_checked_like_argv() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0")
            .with_permissions(&["shell"])
            .with_parsed(ParsedPermission::new("shell").with_command("git", Some(&["status"])));
        let (api, host) = api(info);

        api.shell_execute_command("git status").await.unwrap();
        assert!(api.shell_execute_command("git push").await.is_err());
        assert!(!host.was_called(&HostCall::ShellExecuteCommand("git push".into())));
    }

    #[tokio::test]
    async fn chained_command_lines_never_reach_the_host() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0")
            .with_permissions(&["shell"])
            .with_parsed(ParsedPermission::new("shell").with_command("ls", None));
        let (api, host) = api(info);

        let err = api.shell_execute_command("ls ; rm -rf /tmp/x").await.unwrap_err();
        assert!(matches!(err, RuaError::PermissionDenied { .. }));
        assert!(api.shell_execute_command("ls $(rm -rf /tmp/x)").await.is_err());
        assert!(host.calls().is_empty());

        api.shell_execute_command("ls -la").await.unwrap();
        assert!(host.was_called(&HostCall::ShellExecuteCommand("ls -la".into())));
    }

    #[tokio::test]
    async fn parent_components_do_not_escape_path_rules() {
        let info = ExtensionHostInfo::new("e", "E", "1.0.0")
            .with_permissions(&["fs:read"])
            .with_parsed(ParsedPermission::new("fs:read").with_paths(&["$HOME/Documents/**"]));
        let (api, host) = api(info);

        let err = api
            .fs_read_text_file("/home/ana/Documents/../../../etc/passwd")
            .await
            .unwrap_err();
        assert!(matches!(err, RuaError::PermissionDenied { .. }));
        assert!(host.calls().is_empty());

        // the host sees the normalized path
        let text = api.fs_read_text_file("/home/ana/Documents/x/../a.txt").await.unwrap();
        assert_eq!(text, "hello");
        assert!(host.was_called(&HostCall::FsRead("/home/ana/Documents/a.txt".into())));
    }

    #[tokio::test]
    async fn dispatch_maps_methods_and_errors() {
        let (api, _host) = api(ExtensionHostInfo::new("e", "E", "1.0.0").with_permissions(&["clipboard"]));

        let ok = dispatch(&api, "clipboardWriteText", &json!(["hi"])).await.unwrap();
        assert_eq!(ok.unwrap(), Value::Null);
        assert_eq!(
            dispatch(&api, "clipboardReadText", &json!([])).await.unwrap().unwrap(),
            json!("hi")
        );

        let denied = dispatch(&api, "storageGet", &json!(["k"])).await.unwrap().unwrap_err();
        assert!(denied.is_permission_denied());

        let bad = dispatch(&api, "clipboardWriteText", &json!([])).await.unwrap().unwrap_err();
        assert_eq!(bad.code(), crate::rpc::INVALID_PARAMS);

        assert!(dispatch(&api, "uiClose", &json!([])).await.is_none());
        let info = dispatch(&api, "getExtensionInfo", &json!([])).await.unwrap().unwrap();
        assert_eq!(info, json!({"id": "e", "name": "E", "version": "1.0.0"}));
    }
}
