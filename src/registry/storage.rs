use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RuaResult;

pub const REGISTRY_FILE: &str = "registry.json";
const REGISTRY_VERSION: u32 = 1;

/// Persisted install record for one extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub id: String,
    pub enabled: bool,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: String,
}

/// `registry.json` inside the extensions directory.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistryStore {
    version: u32,
    extensions: BTreeMap<String, RegistryEntry>,
    #[serde(skip)]
    path: PathBuf,
}

impl RegistryStore {
    /// Missing or unreadable files start an empty registry.
    pub fn load(extensions_dir: &Path) -> Self {
        let path = extensions_dir.join(REGISTRY_FILE);
        if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|data| serde_json::from_str::<RegistryStore>(&data).map_err(|e| e.to_string()))
            {
                Ok(mut store) => {
                    store.path = path;
                    return store;
                }
                Err(e) => log::warn!("Ignoring unreadable {}: {}", path.display(), e),
            }
        }
        RegistryStore {
            version: REGISTRY_VERSION,
            extensions: BTreeMap::new(),
            path,
        }
    }

    pub fn save(&self) -> RuaResult<()> {
        let data = serde_json::to_string_pretty(self)?;
        crate::util::atomic_write(&self.path, data.as_bytes())?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&RegistryEntry> {
        self.extensions.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.extensions.values()
    }

    /// Record an install or re-install. Keeps the original install time and
    /// enabled flag of an existing entry.
    pub fn upsert(&mut self, id: &str, version: &str) -> RuaResult<RegistryEntry> {
        let now = Utc::now();
        let entry = self
            .extensions
            .entry(id.to_string())
            .and_modify(|e| {
                e.version = version.to_string();
                e.updated_at = now;
            })
            .or_insert_with(|| RegistryEntry {
                id: id.to_string(),
                enabled: true,
                installed_at: now,
                updated_at: now,
                version: version.to_string(),
            })
            .clone();
        self.save()?;
        Ok(entry)
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> RuaResult<()> {
        let now = Utc::now();
        let entry = self
            .extensions
            .entry(id.to_string())
            .or_insert_with(|| RegistryEntry {
                id: id.to_string(),
                enabled,
                installed_at: now,
                updated_at: now,
                version: String::new(),
            });
        entry.enabled = enabled;
        entry.updated_at = now;
        self.save()
    }

    pub fn remove(&mut self, id: &str) -> RuaResult<Option<RegistryEntry>> {
        let removed = self.extensions.remove(id);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    /// Extensions without an entry are enabled.
    pub fn is_enabled(&self, id: &str) -> bool {
        self.extensions.get(id).map(|e| e.enabled).unwrap_or(true)
    }
}
