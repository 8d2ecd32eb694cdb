//! Named context stores
//!
//! `set` actions can write to the message, to a flow-scoped store, or the
//! global store. Store keys may embed a message-property reference
//! (`count[msg.topic]`) that is resolved against the current message
//! before the write.

use serde_json::Value;
use std::collections::HashMap;

use crate::common::{Error, Result};
use crate::graph::Message;

/// Global and flow-scoped key/value stores for one run
#[derive(Debug, Default)]
pub struct ContextStore {
    global: HashMap<String, Value>,
    flows: HashMap<String, HashMap<String, Value>>,
}

/// Default flow scope used when no flow id is in play
const DEFAULT_FLOW: &str = "_flow_";

impl ContextStore {
    pub fn set_global(&mut self, key: &str, value: Value) {
        self.global.insert(key.to_string(), value);
    }

    pub fn get_global(&self, key: &str) -> Option<&Value> {
        self.global.get(key)
    }

    pub fn set_flow(&mut self, flow: Option<&str>, key: &str, value: Value) {
        self.flows
            .entry(flow.unwrap_or(DEFAULT_FLOW).to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn get_flow(&self, flow: Option<&str>, key: &str) -> Option<&Value> {
        self.flows
            .get(flow.unwrap_or(DEFAULT_FLOW))?
            .get(key)
    }

    pub fn clear(&mut self) {
        self.global.clear();
        self.flows.clear();
    }
}

/// Resolve a context key that may contain a `[msg.<prop>]` reference
///
/// `count[msg.topic]` with `msg.topic == "a"` resolves to `count.a`.
/// Keys without a reference pass through untouched.
pub fn resolve_key(key: &str, msg: Option<&Message>) -> Result<String> {
    let Some(open) = key.find("[msg.") else {
        return Ok(key.to_string());
    };
    let close = key[open..]
        .find(']')
        .map(|i| open + i)
        .ok_or_else(|| Error::malformed("set", format!("unterminated reference in key '{}'", key)))?;

    let prop = &key[open + 1 + 4..close]; // path after "msg."
    let msg = msg.ok_or_else(|| {
        Error::malformed("set", format!("key '{}' references msg but no message is current", key))
    })?;
    let value = msg.get_path(prop).ok_or_else(|| {
        Error::malformed("set", format!("message property '{}' not found for key '{}'", prop, key))
    })?;

    let part = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => {
            return Err(Error::malformed(
                "set",
                format!("message property '{}' is not a scalar key part: {}", prop, other),
            ))
        }
    };

    let mut resolved = String::new();
    resolved.push_str(&key[..open]);
    if !resolved.is_empty() && !resolved.ends_with('.') {
        resolved.push('.');
    }
    resolved.push_str(&part);
    resolved.push_str(&key[close + 1..]);
    Ok(resolved)
}
