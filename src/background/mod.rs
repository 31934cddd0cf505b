//! Background Script Host.
//!
//! Runs at most one privileged script per extension. Each load gets a
//! [`BackgroundContext`] carrying its capability-checked API and the means to
//! subscribe to lifecycle events and register palette actions. State for a load
//! is created before the script runs so cleanup can always find it.

pub mod process;
pub mod script;

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::{namespace_actions, namespaced_id, ActionSink, DynamicAction};
use crate::api::ExtensionApi;
use crate::capabilities::HostCapabilities;
use crate::error::{RuaError, RuaResult, SCRIPT_LOAD_TIMEOUT};
use crate::permissions::{ExtensionHostInfo, PathEnv};

pub use process::ProcessScriptLoader;
pub use script::{script_fn, BackgroundScript, FnScript, ScriptFactory, ScriptLoader, StaticScriptLoader};

pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_millis(5000);

pub type CallbackId = u64;
pub type CallbackFuture = BoxFuture<'static, RuaResult<()>>;
pub type LifecycleCallback = Arc<dyn Fn() -> CallbackFuture + Send + Sync>;
pub type ActionCallback = Arc<dyn Fn(ActionTriggeredData) -> CallbackFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackgroundEvent {
    Activate,
    Deactivate,
    ActionTriggered,
}

impl BackgroundEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackgroundEvent::Activate => "activate",
            BackgroundEvent::Deactivate => "deactivate",
            BackgroundEvent::ActionTriggered => "action-triggered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "activate" => Some(BackgroundEvent::Activate),
            "deactivate" => Some(BackgroundEvent::Deactivate),
            "action-triggered" => Some(BackgroundEvent::ActionTriggered),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionTriggeredData {
    pub action_id: String,
    #[serde(default)]
    pub context: Value,
}

struct BackgroundScriptState {
    script_path: String,
    generation: u64,
    loaded: bool,
    error: Option<String>,
    activate: HashMap<CallbackId, LifecycleCallback>,
    deactivate: HashMap<CallbackId, LifecycleCallback>,
    action_triggered: HashMap<CallbackId, ActionCallback>,
    registered_actions: Vec<String>,
    script: Option<Arc<dyn BackgroundScript>>,
}

impl BackgroundScriptState {
    fn new(script_path: &str, generation: u64) -> Self {
        Self {
            script_path: script_path.to_string(),
            generation,
            loaded: false,
            error: None,
            activate: HashMap::new(),
            deactivate: HashMap::new(),
            action_triggered: HashMap::new(),
            registered_actions: Vec::new(),
            script: None,
        }
    }
}

/// Snapshot of one extension's background state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundScriptStatus {
    pub extension_id: String,
    pub script_path: String,
    pub loaded: bool,
    pub error: Option<String>,
    pub activate_callbacks: usize,
    pub deactivate_callbacks: usize,
    pub action_triggered_callbacks: usize,
    pub registered_actions: Vec<String>,
}

struct Shared {
    states: Mutex<HashMap<String, BackgroundScriptState>>,
    actions: Option<Arc<dyn ActionSink>>,
    next_callback: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, BackgroundScriptState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` on the state only if it still belongs to load `generation`.
    fn with_state<R>(
        &self,
        extension_id: &str,
        generation: u64,
        f: impl FnOnce(&mut BackgroundScriptState) -> R,
    ) -> Option<R> {
        let mut states = self.lock();
        match states.get_mut(extension_id) {
            Some(state) if state.generation == generation => Some(f(state)),
            _ => None,
        }
    }
}

/// Per-load handle given to a background script.
///
/// Registrations made through a context from a superseded load (after a reload
/// or cleanup) are dropped.
#[derive(Clone)]
pub struct BackgroundContext {
    extension_id: String,
    generation: u64,
    api: Arc<ExtensionApi>,
    shared: Arc<Shared>,
}

impl BackgroundContext {
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    pub fn api(&self) -> &ExtensionApi {
        &self.api
    }

    pub fn api_handle(&self) -> Arc<ExtensionApi> {
        self.api.clone()
    }

    /// Whether this context's load is still the extension's current one.
    pub fn is_current(&self) -> bool {
        self.shared
            .with_state(&self.extension_id, self.generation, |_| ())
            .is_some()
    }

    fn next_id(&self) -> CallbackId {
        self.shared.next_callback.fetch_add(1, Ordering::Relaxed)
    }

    fn subscribe(&self, event: BackgroundEvent, insert: impl FnOnce(&mut BackgroundScriptState, CallbackId)) -> CallbackId {
        let id = self.next_id();
        if self
            .shared
            .with_state(&self.extension_id, self.generation, |state| insert(state, id))
            .is_none()
        {
            log::debug!(
                "Ignoring '{}' subscription from stale load of '{}'",
                event.as_str(),
                self.extension_id
            );
        }
        id
    }

    pub fn on_activate<F, Fut>(&self, callback: F) -> CallbackId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RuaResult<()>> + Send + 'static,
    {
        let callback: LifecycleCallback = Arc::new(move || callback().boxed());
        self.subscribe(BackgroundEvent::Activate, |state, id| {
            state.activate.insert(id, callback);
        })
    }

    pub fn on_deactivate<F, Fut>(&self, callback: F) -> CallbackId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RuaResult<()>> + Send + 'static,
    {
        let callback: LifecycleCallback = Arc::new(move || callback().boxed());
        self.subscribe(BackgroundEvent::Deactivate, |state, id| {
            state.deactivate.insert(id, callback);
        })
    }

    pub fn on_action_triggered<F, Fut>(&self, callback: F) -> CallbackId
    where
        F: Fn(ActionTriggeredData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RuaResult<()>> + Send + 'static,
    {
        let callback: ActionCallback = Arc::new(move |data| callback(data).boxed());
        self.subscribe(BackgroundEvent::ActionTriggered, |state, id| {
            state.action_triggered.insert(id, callback);
        })
    }

    /// Remove a subscription. Returns whether anything was removed.
    pub fn off(&self, event: BackgroundEvent, id: CallbackId) -> bool {
        self.shared
            .with_state(&self.extension_id, self.generation, |state| match event {
                BackgroundEvent::Activate => state.activate.remove(&id).is_some(),
                BackgroundEvent::Deactivate => state.deactivate.remove(&id).is_some(),
                BackgroundEvent::ActionTriggered => state.action_triggered.remove(&id).is_some(),
            })
            .unwrap_or(false)
    }

    /// Register actions in the palette. Returns the namespaced ids.
    pub fn register_actions(&self, actions: Vec<DynamicAction>) -> Vec<String> {
        let actions = namespace_actions(&self.extension_id, actions);
        let ids: Vec<String> = actions.iter().map(|a| a.id.clone()).collect();
        let accepted = self
            .shared
            .with_state(&self.extension_id, self.generation, |state| {
                for id in &ids {
                    if !state.registered_actions.contains(id) {
                        state.registered_actions.push(id.clone());
                    }
                }
            })
            .is_some();
        if !accepted {
            log::debug!("Ignoring action registration from stale load of '{}'", self.extension_id);
            return Vec::new();
        }
        if let Some(sink) = &self.shared.actions {
            sink.register(&self.extension_id, actions);
        }
        ids
    }

    /// Unregister actions this extension registered. Raw or namespaced ids.
    pub fn unregister_actions(&self, action_ids: &[String]) {
        let ids: Vec<String> = action_ids
            .iter()
            .map(|id| namespaced_id(&self.extension_id, id))
            .collect();
        let removed = self
            .shared
            .with_state(&self.extension_id, self.generation, |state| {
                let removed: Vec<String> = ids
                    .iter()
                    .filter(|id| state.registered_actions.contains(id))
                    .cloned()
                    .collect();
                state.registered_actions.retain(|id| !removed.contains(id));
                removed
            })
            .unwrap_or_default();
        if removed.is_empty() {
            return;
        }
        if let Some(sink) = &self.shared.actions {
            sink.unregister(&self.extension_id, &removed);
        }
    }
}

pub struct BackgroundHost {
    shared: Arc<Shared>,
    loader: Arc<dyn ScriptLoader>,
    host: Arc<dyn HostCapabilities>,
    load_timeout: Duration,
    path_env: Option<PathEnv>,
    next_generation: AtomicU64,
}

impl BackgroundHost {
    pub fn new(
        loader: Arc<dyn ScriptLoader>,
        host: Arc<dyn HostCapabilities>,
        actions: Option<Arc<dyn ActionSink>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                states: Mutex::new(HashMap::new()),
                actions,
                next_callback: AtomicU64::new(1),
            }),
            loader,
            host,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            path_env: None,
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn with_path_env(mut self, env: PathEnv) -> Self {
        self.path_env = Some(env);
        self
    }

    /// Load (or reload) the background script of one extension.
    ///
    /// Any previous state for the extension is cleaned up first. Failures are
    /// recorded on the state and returned; they never leave half-registered
    /// callbacks from an earlier load behind.
    pub async fn execute_background_script(
        &self,
        info: ExtensionHostInfo,
        extension_path: &Path,
        script_path: &str,
    ) -> RuaResult<()> {
        let extension_id = info.id.clone();
        self.cleanup_extension(&extension_id);

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.shared.lock().insert(
            extension_id.clone(),
            BackgroundScriptState::new(script_path, generation),
        );
        log::info!("Loading background script for '{}' ({})", extension_id, script_path);

        let script = match self.loader.instantiate(&extension_id, extension_path, script_path) {
            Ok(script) => script,
            Err(e) => {
                let message = e.to_string();
                self.record_failure(&extension_id, generation, &message);
                return Err(RuaError::ScriptRuntime(message));
            }
        };
        self.shared.with_state(&extension_id, generation, |state| {
            state.script = Some(script.clone());
        });

        let mut api = ExtensionApi::new(info, self.host.clone());
        if let Some(env) = &self.path_env {
            api = api.with_path_env(env.clone());
        }
        let ctx = BackgroundContext {
            extension_id: extension_id.clone(),
            generation,
            api: Arc::new(api),
            shared: self.shared.clone(),
        };

        let task = tokio::spawn({
            let script = script.clone();
            async move { script.load(ctx).await }
        });
        let abort = task.abort_handle();

        match tokio::time::timeout(self.load_timeout, task).await {
            Ok(Ok(Ok(()))) => {
                self.shared.with_state(&extension_id, generation, |state| {
                    state.loaded = true;
                    state.error = None;
                });
                log::info!("Background script for '{}' loaded", extension_id);
                Ok(())
            }
            Ok(Ok(Err(e))) => {
                let message = match e {
                    RuaError::ScriptRuntime(message) => message,
                    other => other.to_string(),
                };
                log::error!("Background script for '{}' failed: {}", extension_id, message);
                self.record_failure(&extension_id, generation, &message);
                Err(RuaError::ScriptRuntime(message))
            }
            Ok(Err(join)) => {
                let message = if join.is_panic() {
                    "Background script panicked during load".to_string()
                } else {
                    join.to_string()
                };
                log::error!("Background script for '{}' failed: {}", extension_id, message);
                self.record_failure(&extension_id, generation, &message);
                Err(RuaError::ScriptRuntime(message))
            }
            Err(_) => {
                abort.abort();
                script.shutdown();
                log::warn!(
                    "Background script for '{}' timed out after {}ms",
                    extension_id,
                    self.load_timeout.as_millis()
                );
                self.record_failure(&extension_id, generation, SCRIPT_LOAD_TIMEOUT);
                Err(RuaError::ScriptLoadTimeout)
            }
        }
    }

    fn record_failure(&self, extension_id: &str, generation: u64, message: &str) {
        self.shared.with_state(extension_id, generation, |state| {
            state.loaded = false;
            state.error = Some(message.to_string());
        });
    }

    /// Drop everything one extension's background script registered.
    /// No-op for extensions without state.
    pub fn cleanup_extension(&self, extension_id: &str) {
        let Some(state) = self.shared.lock().remove(extension_id) else {
            return;
        };
        if !state.registered_actions.is_empty() {
            if let Some(sink) = &self.shared.actions {
                sink.unregister(extension_id, &state.registered_actions);
            }
        }
        if let Some(script) = &state.script {
            script.shutdown();
        }
        log::info!("Cleaned up background script for '{}'", extension_id);
    }

    pub fn cleanup_all(&self) {
        for extension_id in self.extension_ids() {
            self.cleanup_extension(&extension_id);
        }
    }

    pub async fn notify_activate(&self) {
        self.broadcast(BackgroundEvent::Activate).await;
    }

    pub async fn notify_deactivate(&self) {
        self.broadcast(BackgroundEvent::Deactivate).await;
    }

    /// Run every loaded extension's callbacks for `event` concurrently and wait
    /// for all of them. Failures are logged per callback.
    async fn broadcast(&self, event: BackgroundEvent) {
        let callbacks: Vec<(String, LifecycleCallback)> = {
            let states = self.shared.lock();
            states
                .iter()
                .filter(|(_, state)| state.loaded)
                .flat_map(|(id, state)| {
                    let set = match event {
                        BackgroundEvent::Deactivate => &state.deactivate,
                        _ => &state.activate,
                    };
                    set.values().map(move |cb| (id.clone(), cb.clone()))
                })
                .collect()
        };

        let tasks = callbacks.into_iter().map(|(extension_id, callback)| {
            let handle = tokio::spawn(async move { callback().await });
            async move { (extension_id, handle.await) }
        });
        report(event, join_all(tasks).await);
    }

    /// Deliver an action trigger to one extension. No-op if it is not loaded.
    pub async fn notify_action_triggered(&self, extension_id: &str, action_id: &str, context: Value) {
        let callbacks: Vec<ActionCallback> = {
            let states = self.shared.lock();
            match states.get(extension_id) {
                Some(state) if state.loaded => state.action_triggered.values().cloned().collect(),
                _ => {
                    log::debug!(
                        "Action '{}' triggered for '{}' which has no loaded background script",
                        action_id,
                        extension_id
                    );
                    return;
                }
            }
        };

        let data = ActionTriggeredData {
            action_id: action_id.to_string(),
            context,
        };
        let tasks = callbacks.into_iter().map(|callback| {
            let data = data.clone();
            let extension_id = extension_id.to_string();
            let handle = tokio::spawn(async move { callback(data).await });
            async move { (extension_id, handle.await) }
        });
        report(BackgroundEvent::ActionTriggered, join_all(tasks).await);
    }

    pub fn status(&self, extension_id: &str) -> Option<BackgroundScriptStatus> {
        let states = self.shared.lock();
        states.get(extension_id).map(|state| BackgroundScriptStatus {
            extension_id: extension_id.to_string(),
            script_path: state.script_path.clone(),
            loaded: state.loaded,
            error: state.error.clone(),
            activate_callbacks: state.activate.len(),
            deactivate_callbacks: state.deactivate.len(),
            action_triggered_callbacks: state.action_triggered.len(),
            registered_actions: state.registered_actions.clone(),
        })
    }

    pub fn is_loaded(&self, extension_id: &str) -> bool {
        self.shared
            .lock()
            .get(extension_id)
            .map(|s| s.loaded)
            .unwrap_or(false)
    }

    pub fn extension_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn report(
    event: BackgroundEvent,
    outcomes: Vec<(String, Result<RuaResult<()>, tokio::task::JoinError>)>,
) {
    for (extension_id, outcome) in outcomes {
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!(
                "'{}' callback of '{}' failed: {}",
                event.as_str(),
                extension_id,
                e
            ),
            Err(e) => log::error!(
                "'{}' callback of '{}' panicked: {}",
                event.as_str(),
                extension_id,
                e
            ),
        }
    }
}
