pub mod actions;
pub mod api;
pub mod background;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod lifecycle_events;
pub mod permissions;
pub mod registry;
pub mod rpc;
pub mod services;
pub(crate) mod util;
pub mod view;

pub use actions::{ActionRegistry, ActionSink, DynamicAction};
pub use api::{ExtensionApi, ExtensionInfo};
pub use background::{BackgroundContext, BackgroundHost, BackgroundScript, ScriptLoader};
pub use capabilities::{HostCapabilities, MemoryHost, NativeHost};
pub use config::HostConfig;
pub use error::{RuaError, RuaResult};
pub use lifecycle_events::{LifecycleEvent, LifecycleSink};
pub use registry::{ExtensionManager, ExtensionManifest, ExtensionRecord};
pub use rpc::{RpcChannel, RpcError, Transport};
pub use services::{HostServices, HostServicesBuilder};
pub use view::{ActiveViewSlot, ExtensionView, ViewCallbacks};
