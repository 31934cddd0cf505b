use std::io;
use std::path::Path;

/// Atomic file write: writes data to a temporary sibling file, then renames
/// into place. Rename is atomic on POSIX when src and dst are on the same
/// filesystem, which holds here since the temp file is a sibling.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

/// Whether `id` is usable as a single directory name under a host-owned root.
pub fn is_safe_dir_name(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && !id.contains("..")
        && !id.contains('/')
        && !id.contains('\\')
        && !id.contains('\0')
}

/// Recursively copy a directory tree.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.json");

        atomic_write(&path, b"hello").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "hello");

        // Temp file should not linger
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn atomic_write_creates_missing_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("state.json");

        atomic_write(&path, b"{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn safe_dir_names() {
        assert!(is_safe_dir_name("com.example.weather"));
        assert!(is_safe_dir_name("my-ext_2"));
        assert!(!is_safe_dir_name(""));
        assert!(!is_safe_dir_name(".."));
        assert!(!is_safe_dir_name("a/b"));
        assert!(!is_safe_dir_name("..\\x"));
    }

    #[test]
    fn copy_dir_copies_nested_files() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("dist/assets")).unwrap();
        std::fs::write(src.path().join("manifest.json"), "{}").unwrap();
        std::fs::write(src.path().join("dist/assets/app.js"), "1").unwrap();

        let target = dst.path().join("copy");
        copy_dir_recursive(src.path(), &target).unwrap();

        assert_eq!(std::fs::read_to_string(target.join("manifest.json")).unwrap(), "{}");
        assert_eq!(
            std::fs::read_to_string(target.join("dist/assets/app.js")).unwrap(),
            "1"
        );
    }
}
