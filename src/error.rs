use serde::Serialize;

/// Prefix carried by every permission denial so consumers on the far side of an
/// RPC boundary can detect the category without matching the full message.
pub const PERMISSION_DENIED_PREFIX: &str = "PERMISSION_DENIED: ";

/// Recorded on a background script state when its load exceeds the timeout.
pub const SCRIPT_LOAD_TIMEOUT: &str = "Background script load timed out";

#[derive(Debug, thiserror::Error)]
pub enum RuaError {
    #[error(
        "{prefix}{permission}{suffix}",
        prefix = PERMISSION_DENIED_PREFIX,
        suffix = .detail.as_deref().map(|d| format!(" ({d})")).unwrap_or_default()
    )]
    PermissionDenied {
        permission: String,
        detail: Option<String>,
    },

    #[error("{}", SCRIPT_LOAD_TIMEOUT)]
    ScriptLoadTimeout,

    #[error("Background script error: {0}")]
    ScriptRuntime(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Extension not found: {0}")]
    ExtensionNotFound(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("{0}")]
    Other(String),
}

impl RuaError {
    /// Build a permission denial. `detail` names the path or command that was refused.
    pub fn permission_denied(permission: &str, detail: Option<String>) -> Self {
        RuaError::PermissionDenied {
            permission: permission.to_string(),
            detail,
        }
    }

    /// Whether an error message (typically received over RPC) is a permission denial.
    pub fn is_permission_denied(message: &str) -> bool {
        message.starts_with(PERMISSION_DENIED_PREFIX)
    }
}

impl Serialize for RuaError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<zip::result::ZipError> for RuaError {
    fn from(err: zip::result::ZipError) -> Self {
        RuaError::Archive(err.to_string())
    }
}

pub type RuaResult<T> = Result<T, RuaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_has_parseable_prefix() {
        let err = RuaError::permission_denied("clipboard", None);
        assert_eq!(err.to_string(), "PERMISSION_DENIED: clipboard");
        assert!(RuaError::is_permission_denied(&err.to_string()));
    }

    #[test]
    fn permission_denied_includes_detail() {
        let err = RuaError::permission_denied("fs:read", Some("/etc/passwd".into()));
        assert_eq!(err.to_string(), "PERMISSION_DENIED: fs:read (/etc/passwd)");
    }

    #[test]
    fn timeout_is_distinct_from_runtime_error() {
        let timeout = RuaError::ScriptLoadTimeout.to_string();
        let runtime = RuaError::ScriptRuntime("boom".into()).to_string();
        assert_eq!(timeout, SCRIPT_LOAD_TIMEOUT);
        assert_ne!(timeout, runtime);
        assert!(!RuaError::is_permission_denied(&runtime));
    }

    #[test]
    fn serializes_as_display_string() {
        let err = RuaError::ExtensionNotFound("weather".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!("Extension not found: weather"));
    }
}
