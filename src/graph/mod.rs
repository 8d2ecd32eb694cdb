//! Graph runtime boundary
//!
//! The dataflow runtime that hosts the graph under test is an external
//! collaborator. The engine depends only on the traits here: a way to
//! inject messages ([`GraphRuntime::inject`]) and the three lifecycle
//! hook slots ([`FlowHooks`]) the runtime drives as messages move.

pub mod sim;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::common::Result;

/// A message flowing between graph nodes
///
/// Messages are free-form JSON objects keyed by `payload` at minimum,
/// addressable with dotted property paths (`payload.user.name`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(pub serde_json::Map<String, Value>);

impl Message {
    /// Create a message carrying the given payload
    pub fn with_payload(value: Value) -> Self {
        let mut map = serde_json::Map::new();
        map.insert("payload".to_string(), value);
        Self(map)
    }

    /// The `payload` property, if present
    pub fn payload(&self) -> Option<&Value> {
        self.0.get("payload")
    }

    /// Resolve a dotted property path against this message
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Write a value at a dotted property path, creating intermediate
    /// objects as needed. Overwrites non-object intermediates.
    pub fn set_path(&mut self, path: &str, value: Value) {
        let mut parts: Vec<&str> = path.split('.').collect();
        let last = parts.pop().expect("property path is never empty");

        let mut current = &mut self.0;
        for part in parts {
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(serde_json::Map::new());
            }
            current = entry.as_object_mut().expect("just ensured object");
        }
        current.insert(last.to_string(), value);
    }
}

/// One emission within a send batch: a source node and the message it sent
#[derive(Debug, Clone)]
pub struct SendEvent {
    pub source: String,
    pub msg: Message,
}

/// Signal returned from the pre-route hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteControl {
    /// Perform default downstream routing
    Continue,
    /// Scripted behavior replaces the node's routing; skip delivery
    Suppress,
}

/// The three lifecycle hook slots the runtime drives
///
/// The runtime must await each callback before continuing (receive and
/// pre-route gate routing; a send batch chains independently of it).
#[async_trait]
pub trait FlowHooks: Send + Sync {
    /// A message was delivered to `node` (fires after default delivery)
    async fn on_receive(&self, node: &str, msg: &Message);

    /// `node` is about to forward a message onward
    async fn on_pre_route(&self, node: &str, msg: &Message) -> RouteControl;

    /// A batch of simultaneous emissions occurred
    async fn on_send(&self, batch: &[SendEvent]);
}

/// The narrow contract a host graph runtime must satisfy
#[async_trait]
pub trait GraphRuntime: Send + Sync {
    /// Deliver a payload to a named node as an inbound message
    async fn inject(&self, target: &str, msg: Message) -> Result<()>;

    /// Install the lifecycle hooks (replaces any previous set)
    fn install_hooks(&self, hooks: Arc<dyn FlowHooks>);

    /// Remove the lifecycle hooks
    fn remove_hooks(&self);
}
