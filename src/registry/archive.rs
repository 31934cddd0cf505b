//! `.rua` packages: zip archives with `manifest.json` at the root.

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::manifest::{ExtensionManifest, MANIFEST_FILE};
use crate::error::{RuaError, RuaResult};

pub const ARCHIVE_EXTENSION: &str = "rua";

pub fn read_manifest<R: Read + Seek>(reader: R) -> RuaResult<ExtensionManifest> {
    let mut archive = ZipArchive::new(reader)?;
    let mut entry = archive
        .by_name(MANIFEST_FILE)
        .map_err(|_| RuaError::InvalidManifest(format!("Archive has no {} at its root", MANIFEST_FILE)))?;
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    ExtensionManifest::from_json(&content)
}

/// Extract every entry under `dest`. Entries that would land outside `dest`
/// fail the whole extraction.
pub fn extract<R: Read + Seek>(reader: R, dest: &Path) -> RuaResult<usize> {
    let mut archive = ZipArchive::new(reader)?;
    std::fs::create_dir_all(dest)?;
    let mut files = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            RuaError::Archive(format!("Unsafe path in archive: {}", entry.name()))
        })?;
        let out = dest.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&out)?;
        std::io::copy(&mut entry, &mut file)?;
        files += 1;
    }
    Ok(files)
}

pub fn read_manifest_from_file(path: &Path) -> RuaResult<ExtensionManifest> {
    read_manifest(File::open(path)?)
}

pub fn extract_file(path: &Path, dest: &Path) -> RuaResult<usize> {
    extract(File::open(path)?, dest)
}

/// Zip an extension directory into a `.rua` package. Returns the file count.
pub fn pack_directory(src: &Path, out: &Path) -> RuaResult<usize> {
    let manifest = ExtensionManifest::load(src)?;
    manifest.validate()?;

    let file = File::create(out)?;
    let out_canonical = out.canonicalize().ok();
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut files = 0;

    for entry in walkdir::WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|e| RuaError::Archive(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| RuaError::Archive(e.to_string()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        // Skip the package being written when it sits inside the source tree.
        if out_canonical.is_some() && entry.path().canonicalize().ok() == out_canonical {
            continue;
        }
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else {
            writer.start_file(name, options)?;
            let data = std::fs::read(entry.path())?;
            writer.write_all(&data)?;
            files += 1;
        }
    }
    writer.finish()?;
    log::info!("Packed '{}' {} into {}", manifest.id, manifest.version, out.display());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn write_extension(dir: &Path) {
        std::fs::write(
            dir.join(MANIFEST_FILE),
            r#"{"id": "clock", "name": "Clock", "version": "1.0.0"}"#,
        )
        .unwrap();
        std::fs::create_dir_all(dir.join("dist")).unwrap();
        std::fs::write(dir.join("dist/index.html"), "<html></html>").unwrap();
    }

    #[test]
    fn pack_then_extract() {
        let src = tempfile::tempdir().unwrap();
        write_extension(src.path());
        let out_dir = tempfile::tempdir().unwrap();
        let package = out_dir.path().join("clock.rua");

        assert_eq!(pack_directory(src.path(), &package).unwrap(), 2);
        assert_eq!(read_manifest_from_file(&package).unwrap().id, "clock");

        let dest = tempfile::tempdir().unwrap();
        extract_file(&package, dest.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(dest.path().join("dist/index.html")).unwrap(),
            "<html></html>"
        );
    }

    #[test]
    fn traversal_entries_are_refused() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut buf);
            writer
                .start_file("../escape.txt", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"x").unwrap();
            writer.finish().unwrap();
        }
        let dest = tempfile::tempdir().unwrap();
        buf.set_position(0);
        assert!(matches!(extract(buf, dest.path()), Err(RuaError::Archive(_))));
        assert!(!dest.path().parent().unwrap().join("escape.txt").exists());
    }

    #[test]
    fn archive_without_manifest() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut buf);
            writer.start_file("index.html", SimpleFileOptions::default()).unwrap();
            writer.write_all(b"x").unwrap();
            writer.finish().unwrap();
        }
        buf.set_position(0);
        assert!(matches!(read_manifest(buf), Err(RuaError::InvalidManifest(_))));
    }
}
