//! System clipboard access via arboard.
//!
//! arboard calls block (X11 round-trips on Linux, pasteboard on macOS), so both
//! operations run on the blocking pool.

use crate::error::{RuaError, RuaResult};

pub async fn read_text() -> RuaResult<String> {
    tokio::task::spawn_blocking(|| {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| RuaError::Clipboard(e.to_string()))?;
        clipboard
            .get_text()
            .map_err(|e| RuaError::Clipboard(e.to_string()))
    })
    .await
    .map_err(|e| RuaError::Clipboard(format!("clipboard task failed: {}", e)))?
}

pub async fn write_text(text: String) -> RuaResult<()> {
    tokio::task::spawn_blocking(move || {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| RuaError::Clipboard(e.to_string()))?;
        clipboard
            .set_text(text)
            .map_err(|e| RuaError::Clipboard(e.to_string()))
    })
    .await
    .map_err(|e| RuaError::Clipboard(format!("clipboard task failed: {}", e)))?
}
