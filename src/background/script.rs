use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::BackgroundContext;
use crate::error::{RuaError, RuaResult};

/// One extension's privileged background script.
#[async_trait]
pub trait BackgroundScript: Send + Sync {
    /// Module initialisation. Subscriptions and action registrations made
    /// through `ctx` belong to this load. Bounded by the load timeout.
    async fn load(&self, ctx: BackgroundContext) -> RuaResult<()>;

    /// Release anything the script holds outside the host (processes, pipes).
    fn shutdown(&self) {}
}

/// A script whose load is a closure. Handy for built-in extensions.
pub struct FnScript<F>(F);

#[async_trait]
impl<F, Fut> BackgroundScript for FnScript<F>
where
    F: Fn(BackgroundContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RuaResult<()>> + Send + 'static,
{
    async fn load(&self, ctx: BackgroundContext) -> RuaResult<()> {
        (self.0)(ctx).await
    }
}

pub fn script_fn<F, Fut>(load: F) -> Arc<dyn BackgroundScript>
where
    F: Fn(BackgroundContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RuaResult<()>> + Send + 'static,
{
    Arc::new(FnScript(load))
}

/// Turns a manifest's background entry into a runnable script.
pub trait ScriptLoader: Send + Sync {
    fn instantiate(
        &self,
        extension_id: &str,
        extension_path: &Path,
        script_path: &str,
    ) -> RuaResult<Arc<dyn BackgroundScript>>;
}

pub type ScriptFactory = Arc<dyn Fn() -> Arc<dyn BackgroundScript> + Send + Sync>;

/// Scripts compiled into the embedding application, keyed by extension id.
#[derive(Default)]
pub struct StaticScriptLoader {
    factories: HashMap<String, ScriptFactory>,
    fallback: Option<Arc<dyn ScriptLoader>>,
}

impl StaticScriptLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, extension_id: &str, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn BackgroundScript> + Send + Sync + 'static,
    {
        self.factories
            .insert(extension_id.to_string(), Arc::new(factory));
        self
    }

    /// Loader used for extensions without a registered factory.
    pub fn with_fallback(mut self, fallback: Arc<dyn ScriptLoader>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl ScriptLoader for StaticScriptLoader {
    fn instantiate(
        &self,
        extension_id: &str,
        extension_path: &Path,
        script_path: &str,
    ) -> RuaResult<Arc<dyn BackgroundScript>> {
        if let Some(factory) = self.factories.get(extension_id) {
            return Ok(factory());
        }
        match &self.fallback {
            Some(fallback) => fallback.instantiate(extension_id, extension_path, script_path),
            None => Err(RuaError::ScriptRuntime(format!(
                "No background script registered for '{}' ({})",
                extension_id, script_path
            ))),
        }
    }
}
