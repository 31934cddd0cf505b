use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::archive;
use super::manifest::ExtensionManifest;
use super::source::{InstallSource, LocalSource};
use super::storage::RegistryStore;
use crate::error::{RuaError, RuaResult};
use crate::permissions::ExtensionHostInfo;
use crate::util;

const STAGING_PREFIX: &str = ".installing-";

/// One known extension, loaded or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub enabled: bool,
    /// Last load or activation failure.
    pub error: Option<String>,
    /// Loaded from the dev-mode override path.
    pub dev: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ExtensionManifest>,
}

impl ExtensionRecord {
    fn from_manifest(manifest: ExtensionManifest, path: &Path, enabled: bool, dev: bool) -> Self {
        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            path: path.to_path_buf(),
            enabled,
            error: None,
            dev,
            manifest: Some(manifest),
        }
    }

    /// A directory whose manifest is unusable. Listed, disabled, with the error.
    fn broken(dir_name: &str, path: &Path, error: String) -> Self {
        Self {
            id: dir_name.to_string(),
            name: dir_name.to_string(),
            version: String::new(),
            path: path.to_path_buf(),
            enabled: false,
            error: Some(error),
            dev: false,
            manifest: None,
        }
    }

    pub fn host_info(&self) -> Option<ExtensionHostInfo> {
        self.manifest.as_ref().map(ExtensionManifest::host_info)
    }

    pub fn background_entry(&self) -> Option<&str> {
        self.manifest.as_ref().and_then(|m| m.background_entry())
    }

    pub fn ui_entry(&self) -> Option<&str> {
        self.manifest.as_ref().and_then(|m| m.ui_entry())
    }

    /// Enabled with a usable manifest.
    pub fn is_runnable(&self) -> bool {
        self.enabled && self.manifest.is_some()
    }
}

fn load_valid_manifest(dir: &Path) -> RuaResult<ExtensionManifest> {
    let manifest = ExtensionManifest::load(dir)?;
    manifest.validate()?;
    Ok(manifest)
}

/// Installed extensions on disk plus the optional dev-mode override.
pub struct ExtensionManager {
    extensions_dir: PathBuf,
    store: RegistryStore,
    records: BTreeMap<String, ExtensionRecord>,
    dev: Option<ExtensionRecord>,
}

impl ExtensionManager {
    pub fn open(extensions_dir: &Path) -> RuaResult<Self> {
        std::fs::create_dir_all(extensions_dir)?;
        let mut manager = Self {
            extensions_dir: extensions_dir.to_path_buf(),
            store: RegistryStore::load(extensions_dir),
            records: BTreeMap::new(),
            dev: None,
        };
        manager.scan()?;
        Ok(manager)
    }

    pub fn extensions_dir(&self) -> &Path {
        &self.extensions_dir
    }

    /// Rebuild the installed list from the extensions directory.
    pub fn scan(&mut self) -> RuaResult<()> {
        let mut records = BTreeMap::new();
        for entry in std::fs::read_dir(&self.extensions_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().to_string();
            if dir_name.starts_with('.') {
                continue;
            }
            let record = self.read_installed(&dir_name);
            records.insert(record.id.clone(), record);
        }
        self.records = records;
        log::info!("Found {} installed extensions", self.records.len());
        Ok(())
    }

    fn read_installed(&self, dir_name: &str) -> ExtensionRecord {
        let path = self.extensions_dir.join(dir_name);
        match load_valid_manifest(&path) {
            Ok(manifest) if manifest.id != dir_name => {
                let message = format!(
                    "manifest id '{}' does not match directory '{}'",
                    manifest.id, dir_name
                );
                log::warn!("Extension '{}': {}", dir_name, message);
                ExtensionRecord::broken(dir_name, &path, message)
            }
            Ok(manifest) => {
                let enabled = self.store.is_enabled(&manifest.id);
                ExtensionRecord::from_manifest(manifest, &path, enabled, false)
            }
            Err(e) => {
                log::warn!("Extension '{}' failed to load: {}", dir_name, e);
                ExtensionRecord::broken(dir_name, &path, e.to_string())
            }
        }
    }

    /// Installed extensions, with the dev override shadowing its id.
    pub fn list(&self) -> Vec<ExtensionRecord> {
        let mut records: Vec<ExtensionRecord> = self
            .records
            .values()
            .filter(|r| self.dev.as_ref().map_or(true, |d| d.id != r.id))
            .cloned()
            .collect();
        if let Some(dev) = &self.dev {
            records.push(dev.clone());
            records.sort_by(|a, b| a.id.cmp(&b.id));
        }
        records
    }

    /// The effective record for `id` (dev override first).
    pub fn get(&self, id: &str) -> Option<&ExtensionRecord> {
        match &self.dev {
            Some(dev) if dev.id == id => Some(dev),
            _ => self.records.get(id),
        }
    }

    pub fn installed(&self, id: &str) -> Option<&ExtensionRecord> {
        self.records.get(id)
    }

    pub fn dev_extension(&self) -> Option<&ExtensionRecord> {
        self.dev.as_ref()
    }

    pub async fn install(&mut self, source: InstallSource) -> RuaResult<ExtensionRecord> {
        let local = source.fetch().await?;
        self.install_local(local)
    }

    /// Install a package that is already on hand. Callers that share the
    /// manager fetch first so no download runs under their lock.
    pub fn install_local(&mut self, source: LocalSource) -> RuaResult<ExtensionRecord> {
        match source {
            LocalSource::Directory(path) => self.install_directory(&path),
            LocalSource::ArchiveBytes(bytes) => self.install_archive_bytes(bytes),
        }
    }

    /// Copy an extension directory into the extensions directory.
    pub fn install_directory(&mut self, src: &Path) -> RuaResult<ExtensionRecord> {
        let manifest = load_valid_manifest(src)?;
        let target = self.extensions_dir.join(&manifest.id);
        if src.canonicalize().ok() == target.canonicalize().ok() && target.exists() {
            return Err(RuaError::Other(format!(
                "'{}' is already the installed copy",
                src.display()
            )));
        }

        let staging = self.staging_dir(&manifest.id);
        util::copy_dir_recursive(src, &staging)?;
        self.commit(&manifest, &staging)
    }

    pub fn install_archive_bytes(&mut self, bytes: Vec<u8>) -> RuaResult<ExtensionRecord> {
        let manifest = archive::read_manifest(Cursor::new(&bytes))?;
        manifest.validate()?;
        let staging = self.staging_dir(&manifest.id);
        if let Err(e) = archive::extract(Cursor::new(&bytes), &staging) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }
        self.commit(&manifest, &staging)
    }

    fn staging_dir(&self, id: &str) -> PathBuf {
        let staging = self.extensions_dir.join(format!("{}{}", STAGING_PREFIX, id));
        if staging.exists() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        staging
    }

    /// Swap a staged copy into place and record it. Replaces any prior install.
    fn commit(&mut self, manifest: &ExtensionManifest, staging: &Path) -> RuaResult<ExtensionRecord> {
        let target = self.extensions_dir.join(&manifest.id);
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        std::fs::rename(staging, &target)?;
        self.store.upsert(&manifest.id, &manifest.version)?;

        let record = self.read_installed(&manifest.id);
        self.records.insert(record.id.clone(), record.clone());
        log::info!("Installed extension '{}' {}", manifest.id, manifest.version);
        Ok(record)
    }

    pub fn uninstall(&mut self, id: &str) -> RuaResult<ExtensionRecord> {
        if !util::is_safe_dir_name(id) {
            return Err(RuaError::ExtensionNotFound(id.to_string()));
        }
        let record = self
            .records
            .remove(id)
            .ok_or_else(|| RuaError::ExtensionNotFound(id.to_string()))?;
        if record.path.exists() {
            std::fs::remove_dir_all(&record.path)?;
        }
        self.store.remove(id)?;
        log::info!("Uninstalled extension '{}'", id);
        Ok(record)
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> RuaResult<ExtensionRecord> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| RuaError::ExtensionNotFound(id.to_string()))?;
        if record.manifest.is_none() && enabled {
            return Err(RuaError::InvalidManifest(
                record.error.clone().unwrap_or_else(|| "manifest unavailable".into()),
            ));
        }
        self.store.set_enabled(id, enabled)?;
        record.enabled = enabled;
        Ok(record.clone())
    }

    /// Re-read the effective manifest for `id` from disk.
    pub fn refresh(&mut self, id: &str) -> RuaResult<ExtensionRecord> {
        if let Some(dev) = self.dev.as_mut().filter(|d| d.id == id) {
            let manifest = load_valid_manifest(&dev.path)?;
            *dev = ExtensionRecord::from_manifest(manifest, &dev.path.clone(), true, true);
            return Ok(dev.clone());
        }
        if !self.records.contains_key(id) {
            return Err(RuaError::ExtensionNotFound(id.to_string()));
        }
        let record = self.read_installed(id);
        self.records.insert(id.to_string(), record.clone());
        Ok(record)
    }

    pub fn set_error(&mut self, id: &str, error: Option<String>) {
        let record = match self.dev.as_mut() {
            Some(dev) if dev.id == id => Some(dev),
            _ => self.records.get_mut(id),
        };
        if let Some(record) = record {
            record.error = error;
        }
    }

    /// Load an extension from a working directory, shadowing any installed
    /// copy with the same id. Replaces a previous dev extension.
    pub fn start_dev(&mut self, path: &Path) -> RuaResult<(ExtensionRecord, Option<ExtensionRecord>)> {
        let manifest = load_valid_manifest(path)?;
        let record = ExtensionRecord::from_manifest(manifest, path, true, true);
        log::info!("Dev mode: '{}' from {}", record.id, path.display());
        let previous = self.dev.replace(record.clone());
        Ok((record, previous))
    }

    pub fn stop_dev(&mut self) -> Option<ExtensionRecord> {
        let previous = self.dev.take();
        if let Some(dev) = &previous {
            log::info!("Dev mode stopped for '{}'", dev.id);
        }
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_extension(dir: &Path, id: &str, version: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join("manifest.json"),
            format!(
                r#"{{"id": "{}", "name": "{}", "version": "{}", "permissions": ["storage"],
                    "rua": {{"ui": {{"entry": "index.html"}}, "actions": []}}}}"#,
                id, id, version
            ),
        )
        .unwrap();
        std::fs::write(dir.join("index.html"), "<html></html>").unwrap();
    }

    #[tokio::test]
    async fn install_directory_and_reinstall_replaces() {
        let root = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        write_extension(src.path(), "notes", "1.0.0");

        let mut manager = ExtensionManager::open(&root.path().join("extensions")).unwrap();
        let record = manager
            .install(InstallSource::Directory(src.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(record.version, "1.0.0");
        assert!(record.path.join("index.html").exists());

        write_extension(src.path(), "notes", "1.1.0");
        manager.install_directory(src.path()).unwrap();
        assert_eq!(manager.list().len(), 1);
        assert_eq!(manager.get("notes").unwrap().version, "1.1.0");

        // survives a fresh open
        let reopened = ExtensionManager::open(&root.path().join("extensions")).unwrap();
        assert_eq!(reopened.get("notes").unwrap().version, "1.1.0");
    }

    #[test]
    fn broken_extensions_stay_listed() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("broken");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("manifest.json"), "{ nope").unwrap();

        let manager = ExtensionManager::open(root.path()).unwrap();
        let listed = manager.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "broken");
        assert!(!listed[0].enabled);
        assert!(listed[0].error.is_some());
    }

    #[test]
    fn disable_persists() {
        let root = tempfile::tempdir().unwrap();
        write_extension(&root.path().join("notes"), "notes", "1.0.0");
        let mut manager = ExtensionManager::open(root.path()).unwrap();
        assert!(manager.get("notes").unwrap().enabled);

        manager.set_enabled("notes", false).unwrap();
        let reopened = ExtensionManager::open(root.path()).unwrap();
        assert!(!reopened.get("notes").unwrap().enabled);
        assert!(manager.set_enabled("ghost", true).is_err());
    }

    #[test]
    fn uninstall_removes_files_and_entry() {
        let root = tempfile::tempdir().unwrap();
        write_extension(&root.path().join("notes"), "notes", "1.0.0");
        let mut manager = ExtensionManager::open(root.path()).unwrap();
        manager.uninstall("notes").unwrap();
        assert!(!root.path().join("notes").exists());
        assert!(manager.get("notes").is_none());
        assert!(matches!(manager.uninstall("notes"), Err(RuaError::ExtensionNotFound(_))));
        assert!(manager.uninstall("../etc").is_err());
    }

    #[test]
    fn dev_mode_shadows_without_uninstalling() {
        let root = tempfile::tempdir().unwrap();
        write_extension(&root.path().join("notes"), "notes", "1.0.0");
        let work = tempfile::tempdir().unwrap();
        write_extension(work.path(), "notes", "2.0.0-dev");

        let mut manager = ExtensionManager::open(root.path()).unwrap();
        manager.start_dev(work.path()).unwrap();
        assert_eq!(manager.list().len(), 1);
        let effective = manager.get("notes").unwrap();
        assert!(effective.dev);
        assert_eq!(effective.version, "2.0.0-dev");
        assert_eq!(manager.installed("notes").unwrap().version, "1.0.0");

        manager.stop_dev();
        assert!(!manager.get("notes").unwrap().dev);
        assert!(root.path().join("notes").exists());
    }

    #[test]
    fn mismatched_directory_name_is_an_error_record() {
        let root = tempfile::tempdir().unwrap();
        write_extension(&root.path().join("renamed"), "notes", "1.0.0");
        let manager = ExtensionManager::open(root.path()).unwrap();
        let record = manager.get("renamed").unwrap();
        assert!(record.error.as_deref().unwrap().contains("does not match"));
    }
}
