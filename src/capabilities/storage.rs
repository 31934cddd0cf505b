//! Per-extension key/value storage.
//!
//! Each extension owns one `storage.json` map under
//! `<data_dir>/extension_data/<extension_id>/`. Values are the JSON text of
//! whatever the extension stored (see `encode_stored_value`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::sync::Mutex;

use super::{decode_stored_value, encode_stored_value};
use crate::error::{RuaError, RuaResult};
use crate::util;

const MAX_KEY_LEN: usize = 256;

pub struct ExtensionStorage {
    root: PathBuf,
    /// Serializes read-modify-write cycles across all extensions.
    lock: Mutex<()>,
}

impl ExtensionStorage {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("extension_data"),
            lock: Mutex::new(()),
        }
    }

    fn storage_path(&self, extension_id: &str) -> RuaResult<PathBuf> {
        if !util::is_safe_dir_name(extension_id) {
            return Err(RuaError::Other(format!(
                "Invalid extension id for storage: '{}'",
                extension_id
            )));
        }
        Ok(self.root.join(extension_id).join("storage.json"))
    }

    fn load(&self, extension_id: &str) -> RuaResult<HashMap<String, Value>> {
        let path = self.storage_path(extension_id)?;
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, extension_id: &str, data: &HashMap<String, Value>) -> RuaResult<()> {
        let path = self.storage_path(extension_id)?;
        let content = serde_json::to_string_pretty(data)?;
        util::atomic_write(&path, content.as_bytes())?;
        Ok(())
    }

    pub async fn get(&self, extension_id: &str, key: &str) -> RuaResult<Option<Value>> {
        validate_key(key)?;
        let _guard = self.lock.lock().await;
        let data = self.load(extension_id)?;
        Ok(data.get(key).map(decode_stored_value))
    }

    pub async fn set(&self, extension_id: &str, key: &str, value: &Value) -> RuaResult<()> {
        validate_key(key)?;
        let encoded = encode_stored_value(value)?;
        let _guard = self.lock.lock().await;
        let mut data = self.load(extension_id)?;
        data.insert(key.to_string(), encoded);
        self.save(extension_id, &data)
    }

    pub async fn remove(&self, extension_id: &str, key: &str) -> RuaResult<()> {
        validate_key(key)?;
        let _guard = self.lock.lock().await;
        let mut data = self.load(extension_id)?;
        if data.remove(key).is_some() {
            self.save(extension_id, &data)?;
        }
        Ok(())
    }

    /// Delete all storage for an extension. Called during uninstall.
    pub fn remove_extension(&self, extension_id: &str) {
        if !util::is_safe_dir_name(extension_id) {
            return;
        }
        let dir = self.root.join(extension_id);
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                log::warn!("Failed to remove storage for '{}': {}", extension_id, e);
            }
        }
    }
}

fn validate_key(key: &str) -> RuaResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN || key.chars().any(char::is_control) {
        return Err(RuaError::Other(format!("Invalid storage key: '{}'", key)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ExtensionStorage::new(dir.path());

        assert_eq!(storage.get("weather", "city").await.unwrap(), None);

        storage.set("weather", "city", &json!({"name": "Porto"})).await.unwrap();
        assert_eq!(
            storage.get("weather", "city").await.unwrap(),
            Some(json!({"name": "Porto"}))
        );

        storage.remove("weather", "city").await.unwrap();
        assert_eq!(storage.get("weather", "city").await.unwrap(), None);
    }

    #[tokio::test]
    async fn extensions_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ExtensionStorage::new(dir.path());

        storage.set("a", "k", &json!(1)).await.unwrap();
        assert_eq!(storage.get("b", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn legacy_raw_entries_are_returned_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ExtensionStorage::new(dir.path());
        let path = dir.path().join("extension_data/notes/storage.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"draft": "plain text, not json"}"#).unwrap();

        assert_eq!(
            storage.get("notes", "draft").await.unwrap(),
            Some(json!("plain text, not json"))
        );
    }

    #[tokio::test]
    async fn stored_file_holds_json_text() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ExtensionStorage::new(dir.path());
        storage.set("e", "list", &json!([1, 2])).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("extension_data/e/storage.json")).unwrap();
        let map: HashMap<String, Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(map["list"], json!("[1,2]"));
    }

    #[tokio::test]
    async fn rejects_bad_keys_and_ids() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ExtensionStorage::new(dir.path());
        assert!(storage.set("e", "", &json!(1)).await.is_err());
        assert!(storage.set("e", "a\nb", &json!(1)).await.is_err());
        assert!(storage.set("../escape", "k", &json!(1)).await.is_err());
    }

    #[tokio::test]
    async fn remove_extension_deletes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ExtensionStorage::new(dir.path());
        storage.set("e", "k", &json!(true)).await.unwrap();

        storage.remove_extension("e");
        assert!(!dir.path().join("extension_data/e").exists());
    }
}
