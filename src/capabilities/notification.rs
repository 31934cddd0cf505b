//! Cross-platform native OS notifications via notify-rust.
//!
//! - macOS: NSUserNotificationCenter (via mac-notification-sys)
//! - Windows: WinRT toast notifications
//! - Linux: freedesktop D-Bus notifications

use super::NotificationOptions;
use crate::error::{RuaError, RuaResult};

/// Set the application identity for notifications. Call once at startup.
pub fn init() {
    #[cfg(target_os = "macos")]
    {
        // Without this, notifications appear under "Terminal" in Notification Center.
        let bundle_id = "com.rua.launcher";
        if let Err(e) = notify_rust::set_application(bundle_id) {
            log::warn!("[notification] failed to set application identity: {e}");
        }
    }
}

pub async fn show(options: NotificationOptions) -> RuaResult<()> {
    tokio::task::spawn_blocking(move || {
        let mut notification = notify_rust::Notification::new();
        notification.summary(&options.title);
        if let Some(body) = &options.body {
            notification.body(body);
        }
        notification
            .show()
            .map(|_| ())
            .map_err(|e| RuaError::Notification(e.to_string()))
    })
    .await
    .map_err(|e| RuaError::Notification(format!("notification task failed: {}", e)))?
}
