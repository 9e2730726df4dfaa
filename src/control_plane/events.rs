//! Commit-then-publish event bus (§4.6, §9 redesign flag).
//!
//! The teacher's gateway inferred broadcast-worthiness by sniffing the
//! HTTP response status after the fact; per the redesign note, this
//! control plane instead has the repository layer call [`publish`]
//! itself immediately after a transaction commits, so a failed mutation
//! can never emit an event in the first place.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

static SEQ: AtomicI64 = AtomicI64::new(0);

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<String>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(512);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Publish `event_type` with `payload` merged in, stamping a
    /// monotonic `timestamp` (§4.6: "every event carries a server-assigned
    /// monotonic timestamp").
    pub fn publish(&self, event_type: &str, payload: Value) {
        let seq = SEQ.fetch_add(1, Ordering::Relaxed) + 1;
        let mut event = payload;
        if let Value::Object(ref mut map) = event {
            map.insert("type".to_string(), json!(event_type));
            map.insert("timestamp".to_string(), json!(seq));
        }
        if let Ok(text) = serde_json::to_string(&event) {
            let _ = self.tx.send(text);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct ProxyStatusSnapshot {
    pub running: bool,
    pub port: u16,
    pub uptime_secs: u64,
    pub providers_total: i64,
    pub providers_enabled: i64,
    pub models_total: i64,
    pub has_credentials: bool,
    pub credentials_valid: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_stamps_type_and_monotonic_timestamp() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish("providers:updated", json!({"action": "created", "providerId": "p1"}));
        let msg = rx.try_recv().unwrap();
        let parsed: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["type"], "providers:updated");
        assert!(parsed["timestamp"].as_i64().unwrap() > 0);
    }
}
