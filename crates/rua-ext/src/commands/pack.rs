use anyhow::{Context, Result};
use rua_host_lib::registry::archive::{pack_directory, ARCHIVE_EXTENSION};
use rua_host_lib::registry::ExtensionManifest;
use std::path::{Path, PathBuf};

pub fn run(path: &Path, out: Option<&Path>) -> Result<()> {
    let manifest = ExtensionManifest::load(path).context("Failed to read manifest")?;
    let out = match out {
        Some(out) => out.to_path_buf(),
        None => PathBuf::from(format!(
            "{}-{}.{}",
            manifest.id, manifest.version, ARCHIVE_EXTENSION
        )),
    };

    let count = pack_directory(path, &out)
        .with_context(|| format!("Failed to pack {}", path.display()))?;
    println!("Packed {} files into {}", count, out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_into_requested_file() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(
            src.path().join("manifest.json"),
            r#"{"id": "notes", "name": "Notes", "version": "1.0.0", "rua": {"actions": []}}"#,
        )
        .unwrap();
        let out = tempfile::tempdir().unwrap();
        let target = out.path().join("notes.rua");
        run(src.path(), Some(&target)).unwrap();
        assert!(target.is_file());
    }
}
