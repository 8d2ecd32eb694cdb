//! Addon registry
//!
//! Addons extend the fixed action-kind vocabulary. Each addon supplies a
//! set of named action definitions; the engine resolves unknown kind
//! names here at dispatch time and never learns addon internals.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::common::Result;
use crate::graph::Message;

/// Everything an addon action sees when it runs
pub struct AddonContext<'a> {
    /// Kind-specific payload fields from the registered action
    pub params: &'a serde_json::Map<String, Value>,
    /// Target node, absent for global/setup actions
    pub node: Option<&'a str>,
    /// Current message, absent for setup/cleanup
    pub msg: Option<&'a Message>,
}

/// An externally supplied action definition
///
/// `execute` success/failure converts to a check result when the action
/// is check-performing. The lifecycle callbacks run once per test run for
/// every addon engaged by that run's registered actions.
#[async_trait]
pub trait AddonAction: Send + Sync {
    /// The kind name this addon handles (e.g. `addon:example1`)
    fn name(&self) -> &str;

    async fn execute(&self, ctx: AddonContext<'_>) -> Result<()>;

    async fn on_test_start(&self) -> Result<()> {
        Ok(())
    }

    async fn on_test_end(&self) -> Result<()> {
        Ok(())
    }
}

/// Name → provider registry
///
/// Startup enumeration and later incremental additions both go through
/// [`register`](Self::register); new addons may appear at any time.
#[derive(Default)]
pub struct AddonRegistry {
    addons: RwLock<HashMap<String, Arc<dyn AddonAction>>>,
}

impl AddonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an addon action; a later registration under the same name
    /// replaces the earlier one
    pub fn register(&self, addon: Arc<dyn AddonAction>) {
        let name = addon.name().to_string();
        tracing::info!(addon = %name, "Registering addon action");
        self.addons.write().unwrap().insert(name, addon);
    }

    /// Resolve an action kind name to its provider
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn AddonAction>> {
        self.addons.read().unwrap().get(name).cloned()
    }

    /// Providers for the given kind names, deduplicated, skipping
    /// built-ins and unknown names
    pub fn engaged(&self, names: &[String]) -> Vec<Arc<dyn AddonAction>> {
        let addons = self.addons.read().unwrap();
        let mut seen = Vec::new();
        let mut out: Vec<Arc<dyn AddonAction>> = Vec::new();
        for name in names {
            if seen.contains(name) {
                continue;
            }
            seen.push(name.clone());
            if let Some(addon) = addons.get(name) {
                out.push(addon.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAddon {
        name: String,
        executed: AtomicUsize,
    }

    #[async_trait]
    impl AddonAction for CountingAddon {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, ctx: AddonContext<'_>) -> Result<()> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            if ctx.params.get("fail").is_some() {
                return Err(Error::Addon {
                    name: self.name.clone(),
                    reason: "told to fail".to_string(),
                });
            }
            Ok(())
        }
    }

    fn addon(name: &str) -> Arc<CountingAddon> {
        Arc::new(CountingAddon {
            name: name.to_string(),
            executed: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn register_and_resolve() {
        let registry = AddonRegistry::new();
        assert!(registry.resolve("addon:x").is_none());

        registry.register(addon("addon:x"));
        let resolved = registry.resolve("addon:x").unwrap();

        let params = serde_json::Map::new();
        resolved
            .execute(AddonContext {
                params: &params,
                node: None,
                msg: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn execute_failure_propagates_as_addon_error() {
        let registry = AddonRegistry::new();
        registry.register(addon("addon:x"));

        let mut params = serde_json::Map::new();
        params.insert("fail".to_string(), json!(true));

        let err = registry
            .resolve("addon:x")
            .unwrap()
            .execute(AddonContext {
                params: &params,
                node: None,
                msg: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Addon { .. }));
    }

    #[test]
    fn engaged_deduplicates_and_skips_unknown() {
        let registry = AddonRegistry::new();
        registry.register(addon("addon:a"));
        registry.register(addon("addon:b"));

        let names = vec![
            "addon:a".to_string(),
            "match".to_string(),
            "addon:a".to_string(),
            "addon:missing".to_string(),
            "addon:b".to_string(),
        ];
        let engaged = registry.engaged(&names);
        assert_eq!(engaged.len(), 2);
        assert_eq!(engaged[0].name(), "addon:a");
        assert_eq!(engaged[1].name(), "addon:b");
    }
}
