//! Extension View Host.
//!
//! An [`ExtensionView`] follows one extension frame through its lifecycle. The
//! embedding UI owns the actual frame and feeds the view its events: refresh
//! key changes, frame load (with the frame's message transport) and frame
//! errors. The view owns the RPC channel and guarantees no stale channel is
//! reachable after a remount.

pub mod api;
pub mod url;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::actions::ActionSink;
use crate::api::ExtensionApi;
use crate::capabilities::HostCapabilities;
use crate::config::RetryPolicy;
use crate::permissions::{ExtensionHostInfo, PathEnv};
use crate::rpc::{RpcChannel, RpcError, Transport};

pub use api::{NoViewCallbacks, ViewApi, ViewCallbacks};

/// Client callbacks the host may invoke on the frame.
pub const CLIENT_ON_ACTIVATE: &str = "onActivate";
pub const CLIENT_ON_THEME_CHANGE: &str = "onThemeChange";
pub const CLIENT_ON_SEARCH_CHANGE: &str = "onSearchChange";

/// Call `onActivate` on the frame, retrying while its handlers are not ready.
///
/// The delay is applied before each attempt. Stops early once the channel is
/// torn down. Returns whether the frame acknowledged.
pub async fn notify_activate_with_retry(channel: &RpcChannel, policy: &RetryPolicy, label: &str) -> bool {
    for attempt in 0..policy.attempts {
        tokio::time::sleep(policy.delay_for(attempt)).await;
        if !channel.is_live() {
            log::debug!("View '{}' torn down before activation", label);
            return false;
        }
        match channel.call(CLIENT_ON_ACTIVATE, json!([])).await {
            Ok(_) => return true,
            Err(RpcError::Closed) => return false,
            Err(e) => log::debug!(
                "Activation attempt {} for '{}' failed: {}",
                attempt + 1,
                label,
                e
            ),
        }
    }
    log::warn!(
        "Giving up on activating view '{}' after {} attempts",
        label,
        policy.attempts
    );
    false
}

/// How long a search or theme push waits for the frame.
pub const CLIENT_PUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Call a client callback the extension may not have registered. Missing
/// handlers and closed channels are ignored. A frame that does not answer
/// within [`CLIENT_PUSH_TIMEOUT`] is skipped.
pub async fn push_to_client(channel: &RpcChannel, method: &str, params: Value) {
    match channel.call_timeout(method, params, CLIENT_PUSH_TIMEOUT).await {
        Ok(_) | Err(RpcError::Closed) => {}
        Err(e) if e.is_method_not_found() => {}
        Err(RpcError::Timeout(ms)) => {
            log::warn!("Client callback '{}' got no answer within {}ms", method, ms)
        }
        Err(e) => log::debug!("Client callback '{}' failed: {}", method, e),
    }
}

struct ActiveView {
    extension_id: String,
    client: RpcChannel,
}

/// The single view currently on screen. Last registration wins; unregister
/// only clears the slot for its current owner.
#[derive(Default)]
pub struct ActiveViewSlot {
    slot: Mutex<Option<ActiveView>>,
}

impl ActiveViewSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, extension_id: &str, client: RpcChannel) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.as_ref() {
            if previous.extension_id != extension_id {
                log::debug!("Active view '{}' replaced by '{}'", previous.extension_id, extension_id);
            }
        }
        *slot = Some(ActiveView {
            extension_id: extension_id.to_string(),
            client,
        });
    }

    /// Clear the slot if `extension_id` still owns it. Returns whether it did.
    pub fn unregister(&self, extension_id: &str) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(active) if active.extension_id == extension_id => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn active_extension(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|a| a.extension_id.clone())
    }

    pub fn client(&self) -> Option<RpcChannel> {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|a| a.client.is_live())
            .map(|a| a.client.clone())
    }

    pub fn clear(&self) {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewStatus {
    pub refresh_key: u64,
    pub loading: bool,
    pub error: Option<String>,
    pub title: Option<String>,
}

/// What a view needs to know about its extension.
#[derive(Debug, Clone)]
pub struct ViewOptions {
    pub info: ExtensionHostInfo,
    pub extension_path: PathBuf,
    pub ui_entry: String,
    pub retry: RetryPolicy,
}

pub struct ExtensionView {
    options: ViewOptions,
    host: Arc<dyn HostCapabilities>,
    callbacks: Arc<dyn ViewCallbacks>,
    actions: Option<Arc<dyn ActionSink>>,
    active: Option<Arc<ActiveViewSlot>>,
    path_env: Option<PathEnv>,

    refresh_key: u64,
    loading: bool,
    error: Option<String>,
    channel: Option<RpcChannel>,
    view_api: Option<Arc<ViewApi>>,
    activation: Option<JoinHandle<bool>>,
}

impl ExtensionView {
    pub fn new(
        options: ViewOptions,
        host: Arc<dyn HostCapabilities>,
        callbacks: Arc<dyn ViewCallbacks>,
    ) -> Self {
        Self {
            options,
            host,
            callbacks,
            actions: None,
            active: None,
            path_env: None,
            refresh_key: 0,
            loading: true,
            error: None,
            channel: None,
            view_api: None,
            activation: None,
        }
    }

    pub fn with_action_sink(mut self, actions: Arc<dyn ActionSink>) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn with_active_slot(mut self, slot: Arc<ActiveViewSlot>) -> Self {
        self.active = Some(slot);
        self
    }

    pub fn with_path_env(mut self, env: PathEnv) -> Self {
        self.path_env = Some(env);
        self
    }

    pub fn with_refresh_key(mut self, refresh_key: u64) -> Self {
        self.refresh_key = refresh_key;
        self
    }

    pub fn extension_id(&self) -> &str {
        &self.options.info.id
    }

    pub fn refresh_key(&self) -> u64 {
        self.refresh_key
    }

    /// The frame source for the current refresh generation.
    pub fn frame_source(&self) -> String {
        url::frame_source(&self.options.extension_path, &self.options.ui_entry, self.refresh_key)
    }

    pub fn status(&self) -> ViewStatus {
        ViewStatus {
            refresh_key: self.refresh_key,
            loading: self.loading,
            error: self.error.clone(),
            title: self.view_api.as_ref().and_then(|v| v.title()),
        }
    }

    pub fn channel(&self) -> Option<&RpcChannel> {
        self.channel.as_ref()
    }

    /// Remount on a new refresh key: tear down and reset. Same key is a no-op.
    pub fn set_refresh_key(&mut self, refresh_key: u64) {
        if refresh_key == self.refresh_key {
            return;
        }
        self.teardown();
        self.refresh_key = refresh_key;
        self.loading = true;
        self.error = None;
    }

    /// The frame finished loading: open its channel and start activation.
    pub fn on_frame_load(&mut self, transport: Transport) -> RpcChannel {
        self.teardown();

        let mut api = ExtensionApi::new(self.options.info.clone(), self.host.clone());
        if let Some(env) = &self.path_env {
            api = api.with_path_env(env.clone());
        }
        let view_api = Arc::new(ViewApi::new(
            Arc::new(api),
            self.callbacks.clone(),
            self.actions.clone(),
        ));
        let label = format!("view:{}#{}", self.options.info.id, self.refresh_key);
        let channel = RpcChannel::open(&label, transport, view_api.clone());

        if let Some(active) = &self.active {
            active.register(&self.options.info.id, channel.clone());
        }

        let retry = self.options.retry.clone();
        let activation_channel = channel.clone();
        self.activation = Some(tokio::spawn(async move {
            notify_activate_with_retry(&activation_channel, &retry, &label).await
        }));

        self.loading = false;
        self.error = None;
        self.view_api = Some(view_api);
        self.channel = Some(channel.clone());
        log::debug!("View for '{}' loaded (refresh {})", self.options.info.id, self.refresh_key);
        channel
    }

    /// The frame itself failed to load. Terminal until the next refresh.
    pub fn on_frame_error(&mut self, message: &str) {
        log::error!("View for '{}' failed to load: {}", self.options.info.id, message);
        self.teardown();
        self.loading = false;
        self.error = Some(message.to_string());
    }

    pub async fn push_theme_change(&self, theme: Value) {
        if let Some(channel) = self.live_channel() {
            push_to_client(&channel, CLIENT_ON_THEME_CHANGE, json!([theme])).await;
        }
    }

    pub async fn push_search_change(&self, query: &str) {
        if let Some(channel) = self.live_channel() {
            push_to_client(&channel, CLIENT_ON_SEARCH_CHANGE, json!([query])).await;
        }
    }

    fn live_channel(&self) -> Option<RpcChannel> {
        self.channel.as_ref().filter(|c| c.is_live()).cloned()
    }

    /// Destroy the channel and drop every handle to it. Idempotent.
    pub fn teardown(&mut self) {
        if let Some(activation) = self.activation.take() {
            activation.abort();
        }
        if let Some(channel) = self.channel.take() {
            channel.destroy();
        }
        if let Some(view_api) = self.view_api.take() {
            view_api.release_actions();
        }
        if let Some(active) = &self.active {
            active.unregister(&self.options.info.id);
        }
    }

    /// Await the activation attempt of the current mount.
    pub async fn activation_finished(&mut self) -> bool {
        match self.activation.take() {
            Some(handle) => handle.await.unwrap_or(false),
            None => false,
        }
    }
}

impl Drop for ExtensionView {
    fn drop(&mut self) {
        self.teardown();
    }
}
