use std::process::Stdio;

use tokio::process::Command;

use super::ShellResult;
use crate::error::{RuaError, RuaResult};

/// The user's default shell: explicit override, then `$SHELL`, then `sh`.
pub fn default_shell(configured: Option<&str>) -> String {
    if let Some(shell) = configured {
        return shell.to_string();
    }
    std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string())
}

/// Run a program to completion and capture its output.
pub async fn execute(program: &str, args: &[String]) -> RuaResult<ShellResult> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| RuaError::Other(format!("Failed to execute '{}': {}", program, e)))?;

    Ok(ShellResult {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
    })
}

/// Run a full command line through `shell -c`.
pub async fn execute_command(shell: &str, command: &str) -> RuaResult<ShellResult> {
    execute(shell, &["-c".to_string(), command.to_string()]).await
}

/// Spawn without waiting. The child is reaped in the background.
pub fn spawn(program: &str, args: &[String]) -> RuaResult<u32> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| RuaError::Other(format!("Failed to spawn '{}': {}", program, e)))?;

    let pid = child.id().unwrap_or_default();
    let program = program.to_string();
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => log::debug!("Spawned '{}' exited with {}", program, status),
            Err(e) => log::warn!("Failed to wait for spawned '{}': {}", program, e),
        }
    });
    Ok(pid)
}

/// Split a command line into program and arguments on whitespace.
pub fn split_command(command: &str) -> (String, Vec<String>) {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next().unwrap_or_default();
    (program, parts.collect())
}
