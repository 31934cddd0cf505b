//! Background scripts running as child processes.
//!
//! The child speaks newline-delimited JSON-RPC 2.0 on stdio. The host sends
//! `initialize` and later `onActivate` / `onDeactivate` / `onActionTriggered`
//! for events the script subscribed to with `on`. The script calls the same
//! capability methods a view can, plus `on`, `off`, `actionsRegister` and
//! `actionsUnregister`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use super::script::{BackgroundScript, ScriptLoader};
use super::{ActionTriggeredData, BackgroundContext, BackgroundEvent};
use crate::actions::DynamicAction;
use crate::api;
use crate::error::{RuaError, RuaResult};
use crate::registry::manifest::entry_path;
use crate::rpc::{stdio, Params, RpcChannel, RpcError, RpcHandler};

/// Launches background entries with an interpreter chosen by file extension.
/// Files with no configured interpreter are executed directly.
pub struct ProcessScriptLoader {
    interpreters: HashMap<String, String>,
}

impl ProcessScriptLoader {
    pub fn new(interpreters: HashMap<String, String>) -> Self {
        Self { interpreters }
    }

    fn command_for(&self, script: &Path) -> (String, Vec<String>) {
        let script_arg = script.to_string_lossy().to_string();
        let interpreter = script
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.interpreters.get(e));
        match interpreter {
            Some(program) => (program.clone(), vec![script_arg]),
            None => (script_arg, Vec::new()),
        }
    }
}

impl ScriptLoader for ProcessScriptLoader {
    fn instantiate(
        &self,
        extension_id: &str,
        extension_path: &Path,
        script_path: &str,
    ) -> RuaResult<Arc<dyn BackgroundScript>> {
        let script = entry_path(extension_path, script_path).ok_or_else(|| {
            RuaError::ScriptRuntime(format!(
                "Background script '{}' is outside the extension directory",
                script_path
            ))
        })?;
        if !script.is_file() {
            return Err(RuaError::ScriptRuntime(format!(
                "Background script not found: {}",
                script.display()
            )));
        }
        let (program, args) = self.command_for(&script);
        Ok(Arc::new(ProcessScript {
            extension_id: extension_id.to_string(),
            cwd: extension_path.to_path_buf(),
            program,
            args,
            child: Mutex::new(None),
            channel: Mutex::new(None),
        }))
    }
}

pub struct ProcessScript {
    extension_id: String,
    cwd: PathBuf,
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
    channel: Mutex<Option<RpcChannel>>,
}

#[async_trait]
impl BackgroundScript for ProcessScript {
    async fn load(&self, ctx: BackgroundContext) -> RuaResult<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RuaError::ScriptRuntime(format!(
                    "Failed to spawn background script for '{}': {}",
                    self.extension_id, e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuaError::ScriptRuntime("Failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuaError::ScriptRuntime("Failed to capture stdout".into()))?;

        // Keep the pipe drained so the script never blocks on a full stderr.
        if let Some(stderr) = child.stderr.take() {
            let ext_id = self.extension_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.is_empty() {
                        log::debug!("[ext:{}] {}", ext_id, line);
                    }
                }
            });
        }

        let label = format!("bg:{}", self.extension_id);
        let channel_slot = Arc::new(OnceLock::new());
        let handler = Arc::new(ScriptRpcHandler {
            ctx: ctx.clone(),
            channel: channel_slot.clone(),
        });
        let channel = RpcChannel::open(&label, stdio::line_transport(&label, stdout, stdin), handler);
        let _ = channel_slot.set(channel.clone());

        *self.child.lock().unwrap_or_else(|e| e.into_inner()) = Some(child);
        *self.channel.lock().unwrap_or_else(|e| e.into_inner()) = Some(channel.clone());

        let info = ctx.api().extension_info();
        channel
            .call(
                "initialize",
                json!({
                    "extensionId": info.id,
                    "name": info.name,
                    "version": info.version,
                }),
            )
            .await
            .map_err(|e| {
                RuaError::ScriptRuntime(format!(
                    "Background script for '{}' failed to initialize: {}",
                    self.extension_id, e
                ))
            })?;

        log::info!("Started background process for '{}'", self.extension_id);
        Ok(())
    }

    fn shutdown(&self) {
        if let Some(channel) = self.channel.lock().unwrap_or_else(|e| e.into_inner()).take() {
            channel.destroy();
        }
        if let Some(mut child) = self.child.lock().unwrap_or_else(|e| e.into_inner()).take() {
            if let Err(e) = child.start_kill() {
                log::debug!("Background process for '{}' already gone: {}", self.extension_id, e);
            }
            log::info!("Stopped background process for '{}'", self.extension_id);
        }
    }
}

struct ScriptRpcHandler {
    ctx: BackgroundContext,
    channel: Arc<OnceLock<RpcChannel>>,
}

impl ScriptRpcHandler {
    fn subscribe(&self, event: BackgroundEvent) -> Result<u64, RpcError> {
        let channel = self
            .channel
            .get()
            .cloned()
            .ok_or(RpcError::Closed)?;
        let id = match event {
            BackgroundEvent::Activate => self.ctx.on_activate(move || {
                let channel = channel.clone();
                async move {
                    channel.call("onActivate", json!([])).await?;
                    Ok(())
                }
            }),
            BackgroundEvent::Deactivate => self.ctx.on_deactivate(move || {
                let channel = channel.clone();
                async move {
                    channel.call("onDeactivate", json!([])).await?;
                    Ok(())
                }
            }),
            BackgroundEvent::ActionTriggered => {
                self.ctx.on_action_triggered(move |data: ActionTriggeredData| {
                    let channel = channel.clone();
                    async move {
                        let payload = serde_json::to_value(&data)?;
                        channel.call("onActionTriggered", json!([payload])).await?;
                        Ok(())
                    }
                })
            }
        };
        Ok(id)
    }
}

fn parse_event(params: &Params<'_>) -> Result<BackgroundEvent, RpcError> {
    let name: String = params.required(0, "event")?;
    BackgroundEvent::parse(&name)
        .ok_or_else(|| RpcError::invalid_params(format!("Unknown event '{}'", name)))
}

#[async_trait]
impl RpcHandler for ScriptRpcHandler {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let p = Params::new(&params);
        match method {
            "on" => {
                let event = parse_event(&p)?;
                Ok(json!(self.subscribe(event)?))
            }
            "off" => {
                let event = parse_event(&p)?;
                let id: u64 = p.required(1, "id")?;
                Ok(json!(self.ctx.off(event, id)))
            }
            "actionsRegister" => {
                let actions: Vec<DynamicAction> = p.required(0, "actions")?;
                Ok(json!(self.ctx.register_actions(actions)))
            }
            "actionsUnregister" => {
                let ids: Vec<String> = p.required(0, "actionIds")?;
                self.ctx.unregister_actions(&ids);
                Ok(Value::Null)
            }
            _ => match api::dispatch(self.ctx.api(), method, &params).await {
                Some(outcome) => outcome,
                None => Err(RpcError::method_not_found(method)),
            },
        }
    }
}
