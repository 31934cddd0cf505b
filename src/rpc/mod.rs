//! Bidirectional JSON-RPC 2.0 over a message transport.
//!
//! Both ends of a channel can call and serve. A view frame and a process-backed
//! background script each get one channel: the host side serves the extension
//! API and calls the extension's client callbacks (`onActivate`, ...).

pub mod stdio;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::RuaError;

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const SERVER_ERROR: i64 = -32000;
/// Capability call refused by the permission engine.
pub const PERMISSION_DENIED: i64 = -32001;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    #[error("{message}")]
    Remote { code: i64, message: String },

    #[error("RPC channel closed")]
    Closed,

    #[error("RPC protocol error: {0}")]
    Protocol(String),

    #[error("RPC call timed out after {0}ms")]
    Timeout(u64),
}

impl RpcError {
    pub fn method_not_found(method: &str) -> Self {
        RpcError::Remote {
            code: METHOD_NOT_FOUND,
            message: format!("Method not found: {}", method),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        RpcError::Remote {
            code: INVALID_PARAMS,
            message: message.into(),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            RpcError::Remote { code, .. } => *code,
            RpcError::Closed | RpcError::Protocol(_) | RpcError::Timeout(_) => INTERNAL_ERROR,
        }
    }

    pub fn is_method_not_found(&self) -> bool {
        matches!(self, RpcError::Remote { code, .. } if *code == METHOD_NOT_FOUND)
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, RpcError::Remote { code, .. } if *code == PERMISSION_DENIED)
    }
}

impl From<RuaError> for RpcError {
    fn from(err: RuaError) -> Self {
        let code = match err {
            RuaError::PermissionDenied { .. } => PERMISSION_DENIED,
            _ => SERVER_ERROR,
        };
        RpcError::Remote {
            code,
            message: err.to_string(),
        }
    }
}

impl From<RpcError> for RuaError {
    fn from(err: RpcError) -> Self {
        RuaError::Transport(err.to_string())
    }
}

/// One end of a message pipe. Each message is one serialized JSON-RPC object.
pub struct Transport {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

impl Transport {
    /// Two connected in-memory ends.
    pub fn pair() -> (Transport, Transport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Transport {
                outgoing: a_tx,
                incoming: b_rx,
            },
            Transport {
                outgoing: b_tx,
                incoming: a_rx,
            },
        )
    }
}

/// Server side of a channel: answers requests arriving from the peer.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// Serves nothing; every request is method-not-found.
pub struct NoHandler;

#[async_trait]
impl RpcHandler for NoHandler {
    async fn handle(&self, method: &str, _params: Value) -> Result<Value, RpcError> {
        Err(RpcError::method_not_found(method))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireError {
    code: i64,
    message: String,
}

/// Any JSON-RPC 2.0 message. Requests carry `method`; responses carry
/// `result` or `error`; notifications are requests without `id`.
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<WireError>,
}

impl WireMessage {
    fn request(id: Option<u64>, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: id.map(Value::from),
            method: Some(method.to_string()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    fn response(id: Value, outcome: Result<Value, RpcError>) -> Self {
        let (result, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(e) => (
                None,
                Some(WireError {
                    code: e.code(),
                    message: e.to_string(),
                }),
            ),
        };
        Self {
            jsonrpc: "2.0".into(),
            id: Some(id),
            method: None,
            params: None,
            result,
            error,
        }
    }
}

type Pending = HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>;

struct ChannelInner {
    label: String,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
    live: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelInner {
    fn send(&self, message: &WireMessage) -> Result<(), RpcError> {
        let text = serde_json::to_string(message).map_err(|e| RpcError::Protocol(e.to_string()))?;
        let guard = self.outgoing.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(text).map_err(|_| RpcError::Closed),
            None => Err(RpcError::Closed),
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<String>> {
        self.outgoing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn fail_pending(&self) {
        let drained: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (_, tx) in drained {
            let _ = tx.send(Err(RpcError::Closed));
        }
    }

    fn close(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.outgoing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.fail_pending();
    }
}

/// A live JSON-RPC channel. Cloning shares the same channel.
#[derive(Clone)]
pub struct RpcChannel {
    inner: Arc<ChannelInner>,
}

impl RpcChannel {
    /// Start serving `handler` on `transport`. Must be called inside a tokio runtime.
    pub fn open(label: &str, transport: Transport, handler: Arc<dyn RpcHandler>) -> Self {
        let inner = Arc::new(ChannelInner {
            label: label.to_string(),
            outgoing: Mutex::new(Some(transport.outgoing)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            live: AtomicBool::new(true),
            reader: Mutex::new(None),
        });

        let reader = tokio::spawn(read_loop(inner.clone(), transport.incoming, handler));
        *inner.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(reader);

        Self { inner }
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Call `method` on the peer and wait for its response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let (_, rx) = self.start_call(method, params)?;
        rx.await.unwrap_or(Err(RpcError::Closed))
    }

    /// Like [`call`](Self::call), but gives up after `limit`. A response
    /// arriving later is dropped as late.
    pub async fn call_timeout(
        &self,
        method: &str,
        params: Value,
        limit: Duration,
    ) -> Result<Value, RpcError> {
        let (id, rx) = self.start_call(method, params)?;
        match tokio::time::timeout(limit, rx).await {
            Ok(reply) => reply.unwrap_or(Err(RpcError::Closed)),
            Err(_) => {
                self.forget(id);
                Err(RpcError::Timeout(limit.as_millis() as u64))
            }
        }
    }

    fn start_call(
        &self,
        method: &str,
        params: Value,
    ) -> Result<(u64, oneshot::Receiver<Result<Value, RpcError>>), RpcError> {
        if !self.is_live() {
            return Err(RpcError::Closed);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        if let Err(e) = self.inner.send(&WireMessage::request(Some(id), method, params)) {
            self.forget(id);
            return Err(e);
        }
        Ok((id, rx))
    }

    fn forget(&self, id: u64) {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    #[cfg(test)]
    fn pending_calls(&self) -> usize {
        self.inner.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Fire-and-forget notification (no response expected).
    pub fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        if !self.is_live() {
            return Err(RpcError::Closed);
        }
        self.inner.send(&WireMessage::request(None, method, params))
    }

    /// Tear the channel down. Pending calls fail with `Closed`. Idempotent.
    pub fn destroy(&self) {
        if !self.inner.live.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(reader) = self
            .inner
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            reader.abort();
        }
        self.inner.close();
        log::debug!("RPC channel '{}' destroyed", self.inner.label);
    }
}

async fn read_loop(
    inner: Arc<ChannelInner>,
    mut incoming: mpsc::UnboundedReceiver<String>,
    handler: Arc<dyn RpcHandler>,
) {
    while let Some(text) = incoming.recv().await {
        let message: WireMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("RPC channel '{}': unparseable message: {}", inner.label, e);
                let _ = inner.send(&WireMessage::response(
                    Value::Null,
                    Err(RpcError::Remote {
                        code: PARSE_ERROR,
                        message: format!("Parse error: {}", e),
                    }),
                ));
                continue;
            }
        };

        match message.method {
            Some(method) => {
                let params = message.params.unwrap_or(Value::Null);
                let id = message.id;
                let handler = handler.clone();
                let sender = inner.sender();
                let label = inner.label.clone();
                tokio::spawn(async move {
                    let outcome = handler.handle(&method, params).await;
                    let (Some(id), Some(sender)) = (id, sender) else {
                        if let Err(e) = outcome {
                            log::debug!("RPC '{}': notification '{}' failed: {}", label, method, e);
                        }
                        return;
                    };
                    match serde_json::to_string(&WireMessage::response(id, outcome)) {
                        Ok(text) => {
                            let _ = sender.send(text);
                        }
                        Err(e) => log::error!("RPC '{}': cannot encode response: {}", label, e),
                    }
                });
            }
            None => {
                let Some(id) = message.id.as_ref().and_then(Value::as_u64) else {
                    log::debug!("RPC channel '{}': response without usable id", inner.label);
                    continue;
                };
                let waiter = inner
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                let Some(waiter) = waiter else {
                    log::debug!("RPC channel '{}': late response {}", inner.label, id);
                    continue;
                };
                let outcome = match message.error {
                    Some(err) => Err(RpcError::Remote {
                        code: err.code,
                        message: err.message,
                    }),
                    None => Ok(message.result.unwrap_or(Value::Null)),
                };
                let _ = waiter.send(outcome);
            }
        }
    }

    // Peer went away.
    inner.close();
    log::debug!("RPC channel '{}' closed by peer", inner.label);
}

/// Positional (`[a, b]`) or named (`{"a": .., "b": ..}`) parameter access.
pub struct Params<'a> {
    value: &'a Value,
}

impl<'a> Params<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self { value }
    }

    fn raw(&self, index: usize, name: &str) -> Option<&'a Value> {
        match self.value {
            Value::Array(items) => items.get(index),
            Value::Object(map) => map.get(name),
            // A lone scalar is the first positional argument.
            Value::Null => None,
            other if index == 0 => Some(other),
            _ => None,
        }
    }

    pub fn required<T: serde::de::DeserializeOwned>(&self, index: usize, name: &str) -> Result<T, RpcError> {
        let raw = self
            .raw(index, name)
            .ok_or_else(|| RpcError::invalid_params(format!("Missing parameter '{}'", name)))?;
        serde_json::from_value(raw.clone())
            .map_err(|e| RpcError::invalid_params(format!("Invalid parameter '{}': {}", name, e)))
    }

    pub fn optional<T: serde::de::DeserializeOwned>(&self, index: usize, name: &str) -> Result<Option<T>, RpcError> {
        match self.raw(index, name) {
            None | Some(Value::Null) => Ok(None),
            Some(raw) => serde_json::from_value(raw.clone())
                .map(Some)
                .map_err(|e| RpcError::invalid_params(format!("Invalid parameter '{}': {}", name, e))),
        }
    }
}
