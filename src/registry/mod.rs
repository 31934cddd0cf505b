//! Extension Registry / Manager: what is installed, enabled, broken, or
//! overridden by dev mode.

pub mod archive;
pub mod manager;
pub mod manifest;
pub mod source;
pub mod storage;

pub use manager::{ExtensionManager, ExtensionRecord};
pub use manifest::{ExtensionManifest, ManifestAction, PermissionEntry};
pub use source::{InstallSource, LocalSource};
pub use storage::{RegistryEntry, RegistryStore};
