use anyhow::{bail, Context, Result};
use rua_host_lib::permissions::{
    has_path_permission, has_shell_permission, has_simple_permission, ExtensionHostInfo,
};
use rua_host_lib::registry::ExtensionManifest;
use std::path::Path;

fn host_info(extension: &Path) -> Result<ExtensionHostInfo> {
    let manifest = ExtensionManifest::load(extension).context("Failed to read manifest")?;
    Ok(manifest.host_info())
}

fn report(allowed: bool, what: String) -> Result<()> {
    if allowed {
        println!("ALLOWED: {what}");
        Ok(())
    } else {
        bail!("DENIED: {what}")
    }
}

pub fn run_flag(extension: &Path, permission: &str) -> Result<()> {
    let info = host_info(extension)?;
    report(
        has_simple_permission(&info.permissions, permission),
        permission.to_string(),
    )
}

pub fn run_path(extension: &Path, permission: &str, path: &str) -> Result<()> {
    let info = host_info(extension)?;
    report(
        has_path_permission(&info, permission, path),
        format!("{permission} {path}"),
    )
}

pub fn run_shell(extension: &Path, program: &str, args: &[String]) -> Result<()> {
    let info = host_info(extension)?;
    report(
        has_shell_permission(&info, program, args),
        format!("shell {} {}", program, args.join(" ")),
    )
}
