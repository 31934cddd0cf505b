use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{DirEntry, FileStat};
use crate::error::RuaResult;

pub async fn read_text_file(path: &str) -> RuaResult<String> {
    Ok(tokio::fs::read_to_string(path).await?)
}

pub async fn read_binary_file(path: &str) -> RuaResult<Vec<u8>> {
    Ok(tokio::fs::read(path).await?)
}

/// Parent directories are created as needed.
pub async fn write_text_file(path: &str, contents: &str) -> RuaResult<()> {
    write_binary_file(path, contents.as_bytes()).await
}

pub async fn write_binary_file(path: &str, contents: &[u8]) -> RuaResult<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

pub async fn read_dir(path: &str) -> RuaResult<Vec<DirEntry>> {
    let mut entries = tokio::fs::read_dir(path).await?;
    let mut result = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        result.push(DirEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            is_file: metadata.is_file(),
            is_directory: metadata.is_dir(),
        });
    }
    result.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(result)
}

pub async fn exists(path: &str) -> RuaResult<bool> {
    Ok(tokio::fs::try_exists(path).await?)
}

pub async fn stat(path: &str) -> RuaResult<FileStat> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok(FileStat {
        size: metadata.len(),
        is_file: metadata.is_file(),
        is_directory: metadata.is_dir(),
        mtime: epoch_millis(metadata.modified()),
        ctime: epoch_millis(metadata.created()),
    })
}

fn epoch_millis(time: std::io::Result<SystemTime>) -> u64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
