//! The SSE Broadcaster: fan-out of orchestration events to connected
//! `/events/stream` clients.
//!
//! One bounded `mpsc` channel per connected client, registered in a
//! `Mutex<Vec<_>>`; broadcasting is `try_send` to every queue, dropping
//! (and forgetting) any queue whose receiver has gone away or whose buffer
//! is full — a slow client loses events rather than stalling every other
//! client or the broadcaster itself.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;

const QUEUE_CAPACITY: usize = 100;
const PING_TIMEOUT_SECS: u64 = 25;

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<Value>,
}

/// Fan-out broadcaster for SSE frames.
pub struct Broadcaster {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: Mutex<u64>,
    agent_status: Mutex<HashMap<String, String>>,
    thinking_active: Mutex<bool>,
}

/// A live subscription handle returned by [`Broadcaster::subscribe`].
pub struct Subscription {
    id: u64,
    pub receiver: mpsc::Receiver<Value>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
            agent_status: Mutex::new(HashMap::new()),
            thinking_active: Mutex::new(false),
        }
    }

    /// Register a new subscriber and return its queue plus an `init` frame
    /// snapshotting current agent status — the same payload `/events/stream`
    /// sends as its first frame and `/agent_status` returns on demand.
    pub fn subscribe(&self) -> (Subscription, Value) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let id = {
            let mut next_id = self.next_id.lock().unwrap();
            let id = *next_id;
            *next_id += 1;
            id
        };
        self.subscribers.lock().unwrap().push(Subscriber { id, sender: tx });

        let init_frame = serde_json::json!({
            "type": "init",
            "agents": self.agent_status_snapshot(),
            "thinking": *self.thinking_active.lock().unwrap(),
        });

        (Subscription { id, receiver: rx }, init_frame)
    }

    /// Drop a subscriber explicitly (normally triggered by the transport
    /// layer on client disconnect).
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.subscribers.lock().unwrap().retain(|s| s.id != subscription.id);
    }

    /// Broadcast a typed event to every live subscriber. Payload is merged
    /// under the event's own `type` key, matching the original's
    /// `{"type": event_type, **fields}` framing.
    pub fn broadcast(&self, event_type: &str, mut fields: Value) {
        if let Some(obj) = fields.as_object_mut() {
            obj.insert("type".to_string(), Value::String(event_type.to_string()));
        } else {
            fields = serde_json::json!({"type": event_type, "value": fields});
        }

        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|sub| sub.sender.try_send(fields.clone()).is_ok());
    }

    /// The idle-ping frame a transport should send after
    /// [`PING_TIMEOUT_SECS`] seconds of inactivity on a subscriber's queue.
    pub fn ping_frame() -> Value {
        serde_json::json!({"type": "ping"})
    }

    pub fn ping_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(PING_TIMEOUT_SECS)
    }

    pub fn set_agent_status(&self, agent: &str, status: &str) {
        self.agent_status
            .lock()
            .unwrap()
            .insert(agent.to_string(), status.to_string());
        self.broadcast(
            "agent_status",
            serde_json::json!({"agent": agent, "status": status}),
        );
    }

    pub fn set_thinking(&self, active: bool) {
        *self.thinking_active.lock().unwrap() = active;
    }

    pub fn agent_status_snapshot(&self) -> HashMap<String, String> {
        self.agent_status.lock().unwrap().clone()
    }

    pub fn is_thinking(&self) -> bool {
        *self.thinking_active.lock().unwrap()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}
