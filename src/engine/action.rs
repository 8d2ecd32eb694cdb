//! Action model
//!
//! Actions arrive over the wire as loosely-typed specs (`kind` string plus
//! free-form params) and are converted at registration into the closed
//! [`ActionKind`] enum. Unknown kind strings become [`ActionKind::Addon`]
//! and resolve against the addon registry at dispatch time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::common::{Error, Result};

/// Reserved node key for actions not scoped to any node
pub const GLOBAL_NODE: &str = "_global_";

/// The five event categories actions can be registered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Setup,
    Cleanup,
    Recv,
    Stub,
    Send,
}

impl FromStr for EventCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "setup" => Ok(Self::Setup),
            "cleanup" => Ok(Self::Cleanup),
            "recv" => Ok(Self::Recv),
            "stub" => Ok(Self::Stub),
            "send" => Ok(Self::Send),
            other => Err(Error::UnknownEvent(other.to_string())),
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Cleanup => write!(f, "cleanup"),
            Self::Recv => write!(f, "recv"),
            Self::Stub => write!(f, "stub"),
            Self::Send => write!(f, "send"),
        }
    }
}

/// Wire form of an action, as found in test-case files and the
/// `register_actions` command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Action kind tag (built-in name or addon name)
    pub kind: String,

    /// Whether this action's outcome counts toward the expected checks
    /// (`match` actions always do)
    #[serde(default)]
    pub check: bool,

    /// Kind-specific payload fields
    #[serde(flatten)]
    pub params: serde_json::Map<String, Value>,
}

impl ActionSpec {
    /// Shorthand constructor used by tests and the ad hoc command path
    pub fn new(kind: &str, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            kind: kind.to_string(),
            check: false,
            params,
        }
    }

    fn field(&self, name: &str) -> Result<&Value> {
        self.params
            .get(name)
            .ok_or_else(|| Error::malformed(&self.kind, format!("missing field '{}'", name)))
    }

    fn str_field(&self, name: &str) -> Result<String> {
        self.field(name)?
            .as_str()
            .map(String::from)
            .ok_or_else(|| Error::malformed(&self.kind, format!("field '{}' must be a string", name)))
    }

    fn u64_field(&self, name: &str) -> Result<u64> {
        self.field(name)?
            .as_u64()
            .ok_or_else(|| Error::malformed(&self.kind, format!("field '{}' must be an integer", name)))
    }

    /// Convert the wire form into a typed kind plus its perform-check flag
    pub fn parse_kind(&self) -> Result<(ActionKind, bool)> {
        let kind = match self.kind.as_str() {
            "send" => ActionKind::Send {
                target: self.str_field("target")?,
                value: self.field("value")?.clone(),
            },
            "click" => ActionKind::Click {
                node: self.str_field("node")?,
            },
            "log" => ActionKind::Log {
                value: self.field("value")?.clone(),
            },
            "set" => ActionKind::Set {
                target: parse_set_target(self.field("target")?)?,
                source: parse_set_source(self.field("source")?)?,
            },
            "match" => ActionKind::Match {
                expected: self.field("value")?.clone(),
            },
            "wait" => ActionKind::Wait {
                ms: self.u64_field("ms")?,
            },
            "function" => ActionKind::Function {
                code: self.str_field("code")?,
            },
            // Anything else is deferred to the addon registry
            other => ActionKind::Addon {
                name: other.to_string(),
                params: self.params.clone(),
            },
        };

        let perform_check = matches!(kind, ActionKind::Match { .. }) || self.check;
        Ok((kind, perform_check))
    }
}

/// Destination of a `set` action
#[derive(Debug, Clone, PartialEq)]
pub enum SetTarget {
    /// A property of the current message
    Msg(String),
    /// A key in the flow-scoped context store
    Flow(String),
    /// A key in the global context store
    Global(String),
}

/// Typed source of a `set` action, coerced at execution time
#[derive(Debug, Clone, PartialEq)]
pub enum SetSource {
    Str(String),
    Num(f64),
    Bool(bool),
    Json(String),
    Bin(String),
    Re(String),
    Date,
    Env(String),
    Expr(String),
}

/// Parse a `{"type": ..., "value": ...}` destination
pub fn parse_set_target(value: &Value) -> Result<SetTarget> {
    let (kind, val) = typed_pair(value, "set")?;
    let key = val
        .as_str()
        .ok_or_else(|| Error::malformed("set", "destination value must be a string key"))?
        .to_string();
    match kind {
        "msg" => Ok(SetTarget::Msg(key)),
        "flow" => Ok(SetTarget::Flow(key)),
        "global" => Ok(SetTarget::Global(key)),
        other => Err(Error::UnexpectedValueType(other.to_string())),
    }
}

/// Parse a `{"type": ..., "value": ...}` source
pub fn parse_set_source(value: &Value) -> Result<SetSource> {
    let (kind, val) = typed_pair(value, "set")?;
    let as_string = || -> Result<String> {
        val.as_str()
            .map(String::from)
            .ok_or_else(|| Error::malformed("set", format!("source '{}' value must be a string", kind)))
    };

    match kind {
        "str" => Ok(SetSource::Str(as_string()?)),
        "num" => {
            let n = match val {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.parse::<f64>().ok(),
                _ => None,
            };
            n.map(SetSource::Num)
                .ok_or_else(|| Error::malformed("set", "source 'num' value is not a number"))
        }
        "bool" => {
            let b = match val {
                Value::Bool(b) => Some(*b),
                Value::String(s) => s.parse::<bool>().ok(),
                _ => None,
            };
            b.map(SetSource::Bool)
                .ok_or_else(|| Error::malformed("set", "source 'bool' value is not a boolean"))
        }
        "json" => Ok(SetSource::Json(as_string()?)),
        "bin" => Ok(SetSource::Bin(as_string()?)),
        "re" => Ok(SetSource::Re(as_string()?)),
        "date" => Ok(SetSource::Date),
        "env" => Ok(SetSource::Env(as_string()?)),
        "expr" => Ok(SetSource::Expr(as_string()?)),
        other => Err(Error::UnexpectedValueType(other.to_string())),
    }
}

fn typed_pair<'a>(value: &'a Value, action: &str) -> Result<(&'a str, &'a Value)> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::malformed(action, "expected a {type, value} object"))?;
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::malformed(action, "missing 'type' tag"))?;
    // `date` has no meaningful value; default it to null
    let val = obj.get("value").unwrap_or(&Value::Null);
    Ok((kind, val))
}

/// A typed action kind: the closed built-in set plus the addon escape hatch
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    Send { target: String, value: Value },
    Click { node: String },
    Log { value: Value },
    Set { target: SetTarget, source: SetSource },
    Match { expected: Value },
    Wait { ms: u64 },
    Function { code: String },
    Addon { name: String, params: serde_json::Map<String, Value> },
}

impl ActionKind {
    /// The kind tag as it appears on the wire
    pub fn tag(&self) -> &str {
        match self {
            Self::Send { .. } => "send",
            Self::Click { .. } => "click",
            Self::Log { .. } => "log",
            Self::Set { .. } => "set",
            Self::Match { .. } => "match",
            Self::Wait { .. } => "wait",
            Self::Function { .. } => "function",
            Self::Addon { name, .. } => name,
        }
    }
}

/// A registered action with its run-assigned metadata
#[derive(Debug, Clone)]
pub struct Action {
    /// Zero-based index, unique within the run's registration batch
    pub index: usize,
    pub suite_id: String,
    pub test_id: String,
    pub perform_check: bool,
    pub kind: ActionKind,
}

/// Per-event, per-node ordered action lists, rebuilt each run
///
/// BTreeMap keys give the deterministic node-group iteration order the
/// setup/cleanup phases rely on.
#[derive(Debug, Default)]
pub struct ActionMap {
    groups: BTreeMap<EventCategory, BTreeMap<String, Vec<Action>>>,
}

impl ActionMap {
    /// Append an action to the list for `event`/`node`
    pub fn register(&mut self, event: EventCategory, node: &str, action: Action) {
        self.groups
            .entry(event)
            .or_default()
            .entry(node.to_string())
            .or_default()
            .push(action);
    }

    /// The ordered action list for one event/node pair
    pub fn lookup(&self, event: EventCategory, node: &str) -> Option<&[Action]> {
        self.groups
            .get(&event)?
            .get(node)
            .map(Vec::as_slice)
    }

    /// All node groups for an event: the global group first, then
    /// node-scoped groups in key order
    pub fn groups_for(&self, event: EventCategory) -> Vec<(String, Vec<Action>)> {
        let Some(nodes) = self.groups.get(&event) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        if let Some(global) = nodes.get(GLOBAL_NODE) {
            out.push((GLOBAL_NODE.to_string(), global.clone()));
        }
        for (node, actions) in nodes {
            if node != GLOBAL_NODE {
                out.push((node.clone(), actions.clone()));
            }
        }
        out
    }

    /// Total actions flagged perform-check across every event and node
    pub fn expected_checks(&self) -> usize {
        self.groups
            .values()
            .flat_map(|nodes| nodes.values())
            .flatten()
            .filter(|a| a.perform_check)
            .count()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}
