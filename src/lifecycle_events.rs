use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Extension lifecycle notifications for the embedding UI (refresh keys, error badges).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum LifecycleEvent {
    #[serde(rename = "extension:installed")]
    ExtensionInstalled { ext_id: String, version: String },

    #[serde(rename = "extension:removed")]
    ExtensionRemoved { ext_id: String },

    #[serde(rename = "extension:enabled")]
    ExtensionEnabled { ext_id: String },

    #[serde(rename = "extension:disabled")]
    ExtensionDisabled { ext_id: String },

    #[serde(rename = "extension:reloaded")]
    ExtensionReloaded { ext_id: String, refresh_key: u64 },

    #[serde(rename = "extension:error")]
    ExtensionError {
        ext_id: String,
        action: String,
        message: String,
    },

    #[serde(rename = "dev:started")]
    DevStarted { ext_id: String, path: String },

    #[serde(rename = "dev:stopped")]
    DevStopped { ext_id: String },
}

pub trait LifecycleSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// Emit if a sink is wired; otherwise only log.
pub fn emit(sink: Option<&Arc<dyn LifecycleSink>>, event: LifecycleEvent) {
    log::debug!("Lifecycle event: {:?}", event);
    if let Some(sink) = sink {
        sink.emit(event);
    }
}

/// Sink that keeps every event, for headless embedders and tests.
#[derive(Default)]
pub struct RecordingLifecycleSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingLifecycleSink {
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl LifecycleSink for RecordingLifecycleSink {
    fn emit(&self, event: LifecycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_by_kind() {
        let event = LifecycleEvent::ExtensionReloaded {
            ext_id: "weather".into(),
            refresh_key: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "extension:reloaded");
        assert_eq!(json["ext_id"], "weather");
        assert_eq!(json["refresh_key"], 2);
    }

    #[test]
    fn recording_sink_keeps_order() {
        let recording = Arc::new(RecordingLifecycleSink::default());
        let sink: Arc<dyn LifecycleSink> = recording.clone();
        emit(Some(&sink), LifecycleEvent::ExtensionEnabled { ext_id: "a".into() });
        emit(None, LifecycleEvent::ExtensionEnabled { ext_id: "ignored".into() });
        emit(Some(&sink), LifecycleEvent::ExtensionDisabled { ext_id: "a".into() });
        assert_eq!(
            recording.events(),
            vec![
                LifecycleEvent::ExtensionEnabled { ext_id: "a".into() },
                LifecycleEvent::ExtensionDisabled { ext_id: "a".into() },
            ]
        );
    }
}
