use anyhow::{Context, Result};
use rua_host_lib::view::url::{frame_source, resolve_asset_path, resolve_resource};
use std::path::Path;

pub fn run_encode(extension: &Path, entry: &str, refresh_key: u64) -> Result<()> {
    let extension = extension
        .canonicalize()
        .with_context(|| format!("Cannot resolve {}", extension.display()))?;
    println!("{}", frame_source(&extension, entry, refresh_key));
    Ok(())
}

pub fn run_decode(url: &str) -> Result<()> {
    let request = resolve_resource(url)?;
    let path = resolve_asset_path(&request)?;
    println!("{}", path.display());
    for (key, value) in &request.query {
        println!("  {key}={value}");
    }
    Ok(())
}
