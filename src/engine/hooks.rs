//! Hook interception layer
//!
//! Bridges the graph runtime's lifecycle hooks into the action engine.
//! The runtime owns the hook slots; the engine side holds only a weak
//! back-reference so tearing down the orchestrator breaks the cycle.

use async_trait::async_trait;
use std::sync::{Arc, Weak};

use crate::graph::{FlowHooks, Message, RouteControl, SendEvent};

use super::action::EventCategory;
use super::exec::Engine;

/// The engine's implementation of the three hook slots
pub struct EngineHooks {
    engine: Weak<Engine>,
}

impl EngineHooks {
    pub fn new(engine: &Arc<Engine>) -> Arc<Self> {
        Arc::new(Self {
            engine: Arc::downgrade(engine),
        })
    }
}

#[async_trait]
impl FlowHooks for EngineHooks {
    async fn on_receive(&self, node: &str, msg: &Message) {
        if let Some(engine) = self.engine.upgrade() {
            engine.run_event(EventCategory::Recv, node, Some(msg)).await;
        }
    }

    async fn on_pre_route(&self, node: &str, msg: &Message) -> RouteControl {
        let Some(engine) = self.engine.upgrade() else {
            return RouteControl::Continue;
        };
        // Stub actions replace the node's default routing
        if engine.has_event(EventCategory::Stub, node).await {
            engine.run_event(EventCategory::Stub, node, Some(msg)).await;
            RouteControl::Suppress
        } else {
            RouteControl::Continue
        }
    }

    async fn on_send(&self, batch: &[SendEvent]) {
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        // Node action lists chain sequentially in the batch's event
        // order: A's full sequence completes before B's begins
        for event in batch {
            engine
                .run_event(EventCategory::Send, &event.source, Some(&event.msg))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::action::ActionSpec;
    use crate::graph::sim::SimGraph;
    use crate::graph::GraphRuntime;
    use serde_json::json;

    async fn setup() -> (Arc<SimGraph>, Arc<Engine>) {
        let graph = Arc::new(SimGraph::new());
        graph.add_node("up", &["n1"]);
        graph.add_node("n1", &["down"]);
        graph.add_node("down", &[]);

        let engine = Engine::new(graph.clone());
        engine.reset(100).await;
        graph.install_hooks(EngineHooks::new(&engine));
        (graph, engine)
    }

    #[tokio::test]
    async fn recv_hook_runs_registered_actions() {
        let (graph, engine) = setup().await;
        engine
            .register(
                EventCategory::Recv,
                &[("n1".to_string(), vec![ActionSpec::new("match", json!({"value": "ok"}))])],
                "s",
                "t",
            )
            .await
            .unwrap();
        engine.finalize_registration().await;

        graph
            .inject("up", Message::with_payload(json!("ok")))
            .await
            .unwrap();

        let result = engine.snapshot_result().await;
        assert_eq!(result.success_count(), 1);
    }

    #[tokio::test]
    async fn stub_actions_suppress_default_routing() {
        let (graph, engine) = setup().await;
        // A stub on n1 plus a recv matcher downstream; the matcher must
        // never fire because routing is suppressed at n1
        engine
            .register(
                EventCategory::Stub,
                &[("n1".to_string(), vec![ActionSpec::new("log", json!({"value": "stubbed"}))])],
                "s",
                "t",
            )
            .await
            .unwrap();
        engine
            .register(
                EventCategory::Recv,
                &[("down".to_string(), vec![ActionSpec::new("match", json!({"value": "x"}))])],
                "s",
                "t",
            )
            .await
            .unwrap();
        engine.finalize_registration().await;

        graph
            .inject("up", Message::with_payload(json!("x")))
            .await
            .unwrap();

        let result = engine.snapshot_result().await;
        assert_eq!(result.all(), 0);
    }

    #[tokio::test]
    async fn send_hook_sees_emissions() {
        let (graph, engine) = setup().await;
        engine
            .register(
                EventCategory::Send,
                &[("n1".to_string(), vec![ActionSpec::new("match", json!({"value": "v"}))])],
                "s",
                "t",
            )
            .await
            .unwrap();
        engine.finalize_registration().await;

        graph
            .inject("up", Message::with_payload(json!("v")))
            .await
            .unwrap();

        let result = engine.snapshot_result().await;
        assert_eq!(result.success_count(), 1);
    }

    #[tokio::test]
    async fn send_batch_chains_node_lists_in_event_order() {
        let (_graph, engine) = setup().await;
        let mut notifications = engine.notifier().subscribe();
        engine
            .register(
                EventCategory::Send,
                &[
                    (
                        "a".to_string(),
                        vec![
                            ActionSpec::new("log", json!({"value": "a1"})),
                            ActionSpec::new("log", json!({"value": "a2"})),
                        ],
                    ),
                    ("b".to_string(), vec![ActionSpec::new("log", json!({"value": "b1"}))]),
                ],
                "s",
                "t",
            )
            .await
            .unwrap();
        engine.finalize_registration().await;

        // Two nodes emit in the same batch, b first
        let hooks = EngineHooks::new(&engine);
        let batch = vec![
            SendEvent {
                source: "b".to_string(),
                msg: Message::with_payload(json!(1)),
            },
            SendEvent {
                source: "a".to_string(),
                msg: Message::with_payload(json!(2)),
            },
        ];
        hooks.on_send(&batch).await;

        let mut order = Vec::new();
        while let Ok(notification) = notifications.try_recv() {
            if let crate::engine::Notification::Log { text } = notification {
                order.push(text);
            }
        }
        // b's full list runs to completion before a's begins
        assert_eq!(order, vec!["b1", "a1", "a2"]);
    }

    #[tokio::test]
    async fn dropped_engine_leaves_hooks_inert() {
        let (graph, engine) = setup().await;
        drop(engine);
        // The weak reference is dead; injection must still route cleanly
        graph
            .inject("up", Message::with_payload(json!(1)))
            .await
            .unwrap();
    }
}
