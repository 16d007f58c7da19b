//! In-process event bus for source updates.
//!
//! Provides a lightweight broadcast channel for WebSocket subscribers.

use serde::Serialize;
use source_hub_types::PluginStatus;
use tokio::sync::broadcast;

/// Server event payloads published by plugins and the source registry.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HubEvent {
    PluginStatus(PluginStatus),
    #[serde(rename_all = "camelCase")]
    ActiveSourceChanged { source: Option<String> },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HubEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus with a bounded broadcast channel.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }

    /// Publish a plugin status snapshot.
    pub fn plugin_status(&self, status: PluginStatus) {
        let _ = self.sender.send(HubEvent::PluginStatus(status));
    }

    /// Notify subscribers that the active source changed.
    pub fn active_source_changed(&self, source: Option<String>) {
        let _ = self.sender.send(HubEvent::ActiveSourceChanged { source });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.active_source_changed(Some("snapclient".to_string()));
    }

    #[test]
    fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.active_source_changed(None);
        bus.plugin_status(PluginStatus {
            source: "snapclient".to_string(),
            ..PluginStatus::default()
        });

        assert_eq!(rx.try_recv().unwrap(), HubEvent::ActiveSourceChanged { source: None });
        match rx.try_recv().unwrap() {
            HubEvent::PluginStatus(status) => assert_eq!(status.source, "snapclient"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn events_serialize_as_tagged_json() {
        let value = serde_json::to_value(HubEvent::ActiveSourceChanged {
            source: Some("snapclient".to_string()),
        })
        .unwrap();
        assert_eq!(value["type"], "active_source_changed");
        assert_eq!(value["data"]["source"], "snapclient");
    }
}
