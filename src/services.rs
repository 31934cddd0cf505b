//! The host service object.
//!
//! Owns the registry, the background host, the active view slot, and the
//! per-extension refresh keys. The embedding application creates one and
//! passes it to whatever needs it.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::actions::ActionSink;
use crate::background::{BackgroundHost, BackgroundScriptStatus, ProcessScriptLoader, ScriptLoader};
use crate::capabilities::storage::ExtensionStorage;
use crate::capabilities::{HostCapabilities, NativeHost};
use crate::config::HostConfig;
use crate::error::{RuaError, RuaResult};
use crate::lifecycle_events::{self, LifecycleEvent, LifecycleSink};
use crate::permissions::PathEnv;
use crate::registry::{ExtensionManager, ExtensionRecord, InstallSource};
use crate::view::{
    push_to_client, ActiveViewSlot, ExtensionView, ViewCallbacks, ViewOptions,
    CLIENT_ON_SEARCH_CHANGE, CLIENT_ON_THEME_CHANGE,
};

pub const EXTENSIONS_DIR: &str = "extensions";

pub struct HostServicesBuilder {
    data_dir: PathBuf,
    config: Option<HostConfig>,
    host: Option<Arc<dyn HostCapabilities>>,
    loader: Option<Arc<dyn ScriptLoader>>,
    actions: Option<Arc<dyn ActionSink>>,
    lifecycle: Option<Arc<dyn LifecycleSink>>,
    path_env: Option<PathEnv>,
}

impl HostServicesBuilder {
    /// Use this config instead of reading `settings.json`.
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn host(mut self, host: Arc<dyn HostCapabilities>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn ScriptLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn actions(mut self, actions: Arc<dyn ActionSink>) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn lifecycle(mut self, lifecycle: Arc<dyn LifecycleSink>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn path_env(mut self, env: PathEnv) -> Self {
        self.path_env = Some(env);
        self
    }

    pub fn build(self) -> RuaResult<HostServices> {
        std::fs::create_dir_all(&self.data_dir)?;
        let config = match self.config {
            Some(config) => config,
            None => HostConfig::load(&self.data_dir)?,
        };
        let host = self
            .host
            .unwrap_or_else(|| Arc::new(NativeHost::new(&self.data_dir, config.shell.clone())));
        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(ProcessScriptLoader::new(config.script_interpreters.clone())));

        let mut background = BackgroundHost::new(loader, host.clone(), self.actions.clone())
            .with_load_timeout(config.background_load_timeout());
        if let Some(env) = &self.path_env {
            background = background.with_path_env(env.clone());
        }
        let manager = ExtensionManager::open(&self.data_dir.join(EXTENSIONS_DIR))?;

        Ok(HostServices {
            data_dir: self.data_dir,
            manager: RwLock::new(manager),
            background,
            host,
            actions: self.actions,
            lifecycle: self.lifecycle,
            path_env: self.path_env,
            active_view: Arc::new(ActiveViewSlot::new()),
            refresh_keys: Mutex::new(HashMap::new()),
            config: Mutex::new(config),
        })
    }
}

pub struct HostServices {
    data_dir: PathBuf,
    manager: RwLock<ExtensionManager>,
    background: BackgroundHost,
    host: Arc<dyn HostCapabilities>,
    actions: Option<Arc<dyn ActionSink>>,
    lifecycle: Option<Arc<dyn LifecycleSink>>,
    path_env: Option<PathEnv>,
    active_view: Arc<ActiveViewSlot>,
    refresh_keys: Mutex<HashMap<String, u64>>,
    config: Mutex<HostConfig>,
}

impl HostServices {
    pub fn builder(data_dir: &Path) -> HostServicesBuilder {
        HostServicesBuilder {
            data_dir: data_dir.to_path_buf(),
            config: None,
            host: None,
            loader: None,
            actions: None,
            lifecycle: None,
            path_env: None,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> HostConfig {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn active_view(&self) -> Arc<ActiveViewSlot> {
        self.active_view.clone()
    }

    fn emit(&self, event: LifecycleEvent) {
        lifecycle_events::emit(self.lifecycle.as_ref(), event);
    }

    /// Re-apply a persisted dev override and load every enabled background script.
    pub async fn start(&self) -> RuaResult<()> {
        let dev_path = self.config().dev_extension_path;
        if let Some(path) = dev_path {
            let started = self.manager.write().await.start_dev(&path);
            if let Err(e) = started {
                log::warn!("Dev extension at {} could not be loaded: {}", path.display(), e);
                self.persist_dev_path(None);
            }
        }

        let records = self.manager.read().await.list();
        for record in records.iter().filter(|r| r.is_runnable()) {
            self.refresh_keys_entry(&record.id);
            if record.background_entry().is_some() {
                let _ = self.load_background(record).await;
            }
        }
        log::info!("Extension host started with {} extensions", records.len());
        Ok(())
    }

    pub fn shutdown(&self) {
        self.background.cleanup_all();
        self.active_view.clear();
        log::info!("Extension host shut down");
    }

    pub async fn extensions(&self) -> Vec<ExtensionRecord> {
        self.manager.read().await.list()
    }

    pub async fn extension(&self, id: &str) -> Option<ExtensionRecord> {
        self.manager.read().await.get(id).cloned()
    }

    pub fn background_status(&self, id: &str) -> Option<BackgroundScriptStatus> {
        self.background.status(id)
    }

    /// Install from a directory path, a `.rua` archive, or `github:owner/repo[@tag]`.
    pub async fn install(&self, spec: &str) -> RuaResult<ExtensionRecord> {
        let local = InstallSource::parse(spec)?.fetch().await?;
        let record = self.manager.write().await.install_local(local)?;
        self.reinitialize(&record.id).await;
        self.emit(LifecycleEvent::ExtensionInstalled {
            ext_id: record.id.clone(),
            version: record.version.clone(),
        });
        Ok(record)
    }

    /// Remove the installed copy. While dev mode holds the same id, the dev
    /// copy keeps running along with its storage.
    pub async fn uninstall(&self, id: &str) -> RuaResult<()> {
        let still_shadowed = {
            let mut manager = self.manager.write().await;
            manager.uninstall(id)?;
            manager.get(id).is_some()
        };
        if !still_shadowed {
            self.background.cleanup_extension(id);
            self.active_view.unregister(id);
            self.refresh_keys
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(id);
            ExtensionStorage::new(&self.data_dir).remove_extension(id);
        }
        self.emit(LifecycleEvent::ExtensionRemoved {
            ext_id: id.to_string(),
        });
        Ok(())
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> RuaResult<ExtensionRecord> {
        let record = self.manager.write().await.set_enabled(id, enabled)?;
        self.reinitialize(id).await;
        self.emit(if enabled {
            LifecycleEvent::ExtensionEnabled { ext_id: id.to_string() }
        } else {
            LifecycleEvent::ExtensionDisabled { ext_id: id.to_string() }
        });
        Ok(record)
    }

    /// Re-read one extension from disk and reset both hosts for it.
    pub async fn reload(&self, id: &str) -> RuaResult<u64> {
        self.manager.write().await.refresh(id)?;
        let refresh_key = self.reinitialize(id).await;
        self.emit(LifecycleEvent::ExtensionReloaded {
            ext_id: id.to_string(),
            refresh_key,
        });
        Ok(refresh_key)
    }

    /// Rescan the extensions directory and reset every affected extension,
    /// including ones that disappeared.
    pub async fn reload_all(&self) -> RuaResult<()> {
        let mut affected: BTreeSet<String> = self.background.extension_ids().into_iter().collect();
        {
            let mut manager = self.manager.write().await;
            affected.extend(manager.list().into_iter().map(|r| r.id));
            manager.scan()?;
            if let Some(dev) = manager.dev_extension().map(|d| d.id.clone()) {
                if let Err(e) = manager.refresh(&dev) {
                    log::warn!("Dev extension '{}' failed to reload: {}", dev, e);
                    manager.set_error(&dev, Some(e.to_string()));
                }
            }
            affected.extend(manager.list().into_iter().map(|r| r.id));
        }
        for id in affected {
            let refresh_key = self.reinitialize(&id).await;
            self.emit(LifecycleEvent::ExtensionReloaded {
                ext_id: id,
                refresh_key,
            });
        }
        Ok(())
    }

    /// Load an extension from a working directory. It shadows any installed
    /// copy with the same id until dev mode stops.
    pub async fn start_dev_mode(&self, path: &Path) -> RuaResult<ExtensionRecord> {
        let (record, previous) = self.manager.write().await.start_dev(path)?;
        if let Some(previous) = previous.filter(|p| p.id != record.id) {
            self.reinitialize(&previous.id).await;
            self.emit(LifecycleEvent::DevStopped { ext_id: previous.id });
        }
        self.reinitialize(&record.id).await;
        self.persist_dev_path(Some(path.to_path_buf()));
        self.emit(LifecycleEvent::DevStarted {
            ext_id: record.id.clone(),
            path: path.display().to_string(),
        });
        Ok(record)
    }

    /// Drop the dev override; the installed copy (if any) takes over again.
    pub async fn stop_dev_mode(&self) -> Option<ExtensionRecord> {
        let previous = self.manager.write().await.stop_dev();
        self.persist_dev_path(None);
        if let Some(dev) = &previous {
            self.reinitialize(&dev.id).await;
            self.emit(LifecycleEvent::DevStopped { ext_id: dev.id.clone() });
        }
        previous
    }

    fn persist_dev_path(&self, path: Option<PathBuf>) {
        let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        config.dev_extension_path = path;
        if let Err(e) = config.save() {
            log::debug!("Settings not persisted: {}", e);
        }
    }

    /// Build the view for an extension's UI entry at its current refresh key.
    pub async fn open_view(
        &self,
        id: &str,
        callbacks: Arc<dyn ViewCallbacks>,
    ) -> RuaResult<ExtensionView> {
        let record = self
            .extension(id)
            .await
            .ok_or_else(|| RuaError::ExtensionNotFound(id.to_string()))?;
        if !record.is_runnable() {
            return Err(RuaError::Other(format!("Extension '{}' is disabled", id)));
        }
        let (Some(info), Some(ui_entry)) = (record.host_info(), record.ui_entry()) else {
            return Err(RuaError::Other(format!("Extension '{}' has no UI entry", id)));
        };

        let options = ViewOptions {
            info,
            extension_path: record.path.clone(),
            ui_entry: ui_entry.to_string(),
            retry: self.config().activate_retry,
        };
        let mut view = ExtensionView::new(options, self.host.clone(), callbacks)
            .with_active_slot(self.active_view.clone())
            .with_refresh_key(self.refresh_keys_entry(id));
        if let Some(actions) = &self.actions {
            view = view.with_action_sink(actions.clone());
        }
        if let Some(env) = &self.path_env {
            view = view.with_path_env(env.clone());
        }
        Ok(view)
    }

    pub fn refresh_key(&self, id: &str) -> u64 {
        self.refresh_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    fn refresh_keys_entry(&self, id: &str) -> u64 {
        *self
            .refresh_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id.to_string())
            .or_insert(0)
    }

    fn bump_refresh_key(&self, id: &str) -> u64 {
        let mut keys = self.refresh_keys.lock().unwrap_or_else(|e| e.into_inner());
        let key = keys.entry(id.to_string()).or_insert(0);
        *key += 1;
        *key
    }

    /// Reset both hosts for `id` against its current effective record.
    async fn reinitialize(&self, id: &str) -> u64 {
        let record = self.extension(id).await;
        self.background.cleanup_extension(id);
        let refresh_key = self.bump_refresh_key(id);
        match record {
            Some(record) if record.is_runnable() => {
                if record.background_entry().is_some() {
                    let _ = self.load_background(&record).await;
                }
            }
            _ => {
                self.active_view.unregister(id);
            }
        }
        refresh_key
    }

    async fn load_background(&self, record: &ExtensionRecord) -> RuaResult<()> {
        let (Some(info), Some(entry)) = (record.host_info(), record.background_entry()) else {
            return Ok(());
        };
        match self
            .background
            .execute_background_script(info, &record.path, entry)
            .await
        {
            Ok(()) => {
                self.manager.write().await.set_error(&record.id, None);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.manager
                    .write()
                    .await
                    .set_error(&record.id, Some(message.clone()));
                self.emit(LifecycleEvent::ExtensionError {
                    ext_id: record.id.clone(),
                    action: "background".to_string(),
                    message,
                });
                Err(e)
            }
        }
    }

    pub async fn notify_activate(&self) {
        self.background.notify_activate().await;
    }

    pub async fn notify_deactivate(&self) {
        self.background.notify_deactivate().await;
    }

    pub async fn notify_action_triggered(&self, extension_id: &str, action_id: &str, context: Value) {
        self.background
            .notify_action_triggered(extension_id, action_id, context)
            .await;
    }

    pub async fn push_search_change(&self, query: &str) {
        if let Some(client) = self.active_view.client() {
            push_to_client(&client, CLIENT_ON_SEARCH_CHANGE, json!([query])).await;
        }
    }

    pub async fn push_theme_change(&self, theme: Value) {
        if let Some(client) = self.active_view.client() {
            push_to_client(&client, CLIENT_ON_THEME_CHANGE, json!([theme])).await;
        }
    }
}
