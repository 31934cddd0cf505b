use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::actions::{namespace_actions, namespaced_id, ActionSink, DynamicAction};
use crate::api::{self, ExtensionApi};
use crate::rpc::{Params, RpcError, RpcHandler};

/// UI hooks supplied by whatever renders the view. Every hook is optional;
/// the defaults do nothing.
pub trait ViewCallbacks: Send + Sync {
    fn hide_input(&self) {}
    fn show_input(&self) {}
    fn close(&self) {}
    fn set_title(&self, _title: &str) {}
}

pub struct NoViewCallbacks;

impl ViewCallbacks for NoViewCallbacks {}

/// Server side of a view's RPC channel: the capability API plus UI control.
pub struct ViewApi {
    api: Arc<ExtensionApi>,
    callbacks: Arc<dyn ViewCallbacks>,
    actions: Option<Arc<dyn ActionSink>>,
    registered: Mutex<Vec<String>>,
    title: Mutex<Option<String>>,
}

impl ViewApi {
    pub fn new(
        api: Arc<ExtensionApi>,
        callbacks: Arc<dyn ViewCallbacks>,
        actions: Option<Arc<dyn ActionSink>>,
    ) -> Self {
        Self {
            api,
            callbacks,
            actions,
            registered: Mutex::new(Vec::new()),
            title: Mutex::new(None),
        }
    }

    pub fn extension_id(&self) -> &str {
        self.api.extension_id()
    }

    pub fn title(&self) -> Option<String> {
        self.title.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn registered_actions(&self) -> Vec<String> {
        self.registered.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn register_actions(&self, actions: Vec<DynamicAction>) -> Vec<String> {
        let actions = namespace_actions(self.extension_id(), actions);
        let ids: Vec<String> = actions.iter().map(|a| a.id.clone()).collect();
        {
            let mut registered = self.registered.lock().unwrap_or_else(|e| e.into_inner());
            for id in &ids {
                if !registered.contains(id) {
                    registered.push(id.clone());
                }
            }
        }
        if let Some(sink) = &self.actions {
            sink.register(self.extension_id(), actions);
        }
        ids
    }

    fn unregister_actions(&self, action_ids: &[String]) {
        let ids: Vec<String> = action_ids
            .iter()
            .map(|id| namespaced_id(self.extension_id(), id))
            .collect();
        self.registered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|id| !ids.contains(id));
        if let Some(sink) = &self.actions {
            sink.unregister(self.extension_id(), &ids);
        }
    }

    /// Withdraw every action this view registered.
    pub fn release_actions(&self) {
        let ids: Vec<String> = std::mem::take(&mut *self.registered.lock().unwrap_or_else(|e| e.into_inner()));
        if ids.is_empty() {
            return;
        }
        if let Some(sink) = &self.actions {
            sink.unregister(self.extension_id(), &ids);
        }
    }
}

#[async_trait]
impl RpcHandler for ViewApi {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let p = Params::new(&params);
        match method {
            "uiHideInput" => {
                self.callbacks.hide_input();
                Ok(Value::Null)
            }
            "uiShowInput" => {
                self.callbacks.show_input();
                Ok(Value::Null)
            }
            "uiClose" => {
                self.callbacks.close();
                Ok(Value::Null)
            }
            "uiSetTitle" => {
                let title: String = p.required(0, "title")?;
                self.callbacks.set_title(&title);
                *self.title.lock().unwrap_or_else(|e| e.into_inner()) = Some(title);
                Ok(Value::Null)
            }
            "actionsRegister" => {
                let actions: Vec<DynamicAction> = p.required(0, "actions")?;
                Ok(json!(self.register_actions(actions)))
            }
            "actionsUnregister" => {
                let ids: Vec<String> = p.required(0, "actionIds")?;
                self.unregister_actions(&ids);
                Ok(Value::Null)
            }
            _ => match api::dispatch(&self.api, method, &params).await {
                Some(outcome) => outcome,
                None => Err(RpcError::method_not_found(method)),
            },
        }
    }
}
