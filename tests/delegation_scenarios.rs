//! End-to-end scenarios E1-E6 wiring the Agent Registry, Delegation Engine,
//! and Canvas Store together the way the Startup Orchestrator does, rather
//! than exercising each component in isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::tempdir;

use timus_orchestrator::agent_registry::{AgentFactory, AgentInstance};
use timus_orchestrator::canvas::{CanvasStore, ViewFilter};
use timus_orchestrator::AgentRegistry;

struct EchoAgent;

#[async_trait]
impl AgentInstance for EchoAgent {
    async fn run(&self, task: &str) -> Result<String, String> {
        Ok(format!("ok:{}", task))
    }
}

fn echo_factory() -> Arc<dyn AgentFactory> {
    Arc::new(|_: &str, _: &Value| -> Arc<dyn AgentInstance> { Arc::new(EchoAgent) })
}

/// Registers a spec whose `run` re-delegates to `next_target`, letting tests
/// build chains/cycles without hand-writing an agent per scenario.
struct RelayAgent {
    registry: Arc<AgentRegistry>,
    self_name: &'static str,
    next_target: &'static str,
}

#[async_trait]
impl AgentInstance for RelayAgent {
    async fn run(&self, task: &str) -> Result<String, String> {
        Ok(self
            .registry
            .delegate(self.self_name, self.next_target, task, None)
            .await)
    }
}

fn relay_factory(
    registry: Arc<AgentRegistry>,
    self_name: &'static str,
    next_target: &'static str,
) -> Arc<dyn AgentFactory> {
    Arc::new(move |_: &str, _: &Value| -> Arc<dyn AgentInstance> {
        Arc::new(RelayAgent {
            registry: registry.clone(),
            self_name,
            next_target,
        })
    })
}

/// E1. Unknown target.
#[tokio::test]
async fn e1_unknown_target_logs_agent_not_registered() {
    let dir = tempdir().unwrap();
    let canvas = Arc::new(CanvasStore::open(Some(dir.path().join("canvas_store.json"))));
    let home = canvas.create_canvas("Live Canvas", "", Value::Null);
    canvas.attach_session(&home.id, "s1").unwrap();

    let registry = Arc::new(AgentRegistry::new(Some(canvas.clone())));
    registry.register_spec("executor", "executor", vec![], echo_factory(), Value::Null);

    let result = registry
        .delegate("meta", "unknown", "hi", Some("s1".to_string()))
        .await;
    assert!(result.starts_with("FEHLER: Agent 'unknown' nicht registriert"));

    let view = canvas
        .get_canvas_view(&home.id, &ViewFilter::new())
        .unwrap();
    let delegation_events: Vec<_> = view
        .canvas
        .events
        .iter()
        .filter(|e| e.event_type == "delegation" && e.status == "error")
        .collect();
    assert_eq!(delegation_events.len(), 1);
    assert_eq!(
        delegation_events[0].payload.get("reason").and_then(|v| v.as_str()),
        Some("agent_not_registered")
    );
}

/// E2. Linear chain at the limit: a -> b -> c -> d is depth 3 (allowed
/// because it's the fourth agent pushed... the chain a->b->c->d pushes b,
/// c, d onto the stack, hitting MAX_DELEGATION_DEPTH on d's onward call).
#[tokio::test]
async fn e2_linear_chain_refused_past_max_depth() {
    let dir = tempdir().unwrap();
    let canvas = Arc::new(CanvasStore::open(Some(dir.path().join("canvas_store.json"))));
    let home = canvas.create_canvas("Live Canvas", "", Value::Null);
    canvas.attach_session(&home.id, "s1").unwrap();

    let registry = Arc::new(AgentRegistry::new(Some(canvas.clone())));
    registry.register_spec("a", "a", vec![], relay_factory(registry.clone(), "a", "b"), Value::Null);
    registry.register_spec("b", "b", vec![], relay_factory(registry.clone(), "b", "c"), Value::Null);
    registry.register_spec("c", "c", vec![], relay_factory(registry.clone(), "c", "d"), Value::Null);
    registry.register_spec("d", "d", vec![], echo_factory(), Value::Null);

    let result = registry
        .delegate("root", "a", "task", Some("s1".to_string()))
        .await;
    assert_eq!(result, "FEHLER: Max Delegation-Tiefe (3) erreicht");

    let view = canvas
        .get_canvas_view(&home.id, &ViewFilter::new())
        .unwrap();
    let running = view
        .canvas
        .events
        .iter()
        .filter(|e| e.event_type == "delegation" && e.status == "running")
        .count();
    let errors: Vec<_> = view
        .canvas
        .events
        .iter()
        .filter(|e| e.event_type == "delegation" && e.status == "error")
        .collect();
    assert_eq!(running, 3);
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].payload.get("reason").and_then(|v| v.as_str()),
        Some("max_depth")
    );
}

/// E3. Cycle: a delegates to b, b delegates back to a.
#[tokio::test]
async fn e3_cycle_is_detected() {
    let registry = Arc::new(AgentRegistry::new(None));
    registry.register_spec("a", "a", vec![], relay_factory(registry.clone(), "a", "b"), Value::Null);
    registry.register_spec("b", "b", vec![], relay_factory(registry.clone(), "b", "a"), Value::Null);

    let result = registry.delegate("root", "a", "task", None).await;
    assert_eq!(result, "FEHLER: Zirkulaere Delegation (a -> b -> a)");
}

/// E4. Parallel turns sharing one agent never cross-contaminate the
/// delegation stack or the agent's `conversation_session_id` slot.
#[tokio::test]
async fn e4_parallel_delegations_to_shared_agent_stay_isolated() {
    struct SlowAgent {
        session: std::sync::RwLock<Option<String>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AgentInstance for SlowAgent {
        async fn run(&self, task: &str) -> Result<String, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(format!("ok:{}", task))
        }

        fn conversation_session_id(&self) -> Option<String> {
            self.session.read().unwrap().clone()
        }

        fn set_conversation_session_id(&self, session_id: Option<String>) -> Option<String> {
            let mut guard = self.session.write().unwrap();
            let previous = guard.clone();
            *guard = session_id;
            previous
        }
    }

    let registry = Arc::new(AgentRegistry::new(None));
    let factory: Arc<dyn AgentFactory> = Arc::new(|_: &str, _: &Value| -> Arc<dyn AgentInstance> {
        Arc::new(SlowAgent {
            session: std::sync::RwLock::new(None),
            calls: AtomicUsize::new(0),
        })
    });
    registry.register_spec("research", "research", vec![], factory, Value::Null);

    let r1 = registry.clone();
    let r2 = registry.clone();
    let (a, b) = tokio::join!(
        r1.delegate("meta", "research", "a", Some("sess-a".to_string())),
        r2.delegate("meta", "research", "b", Some("sess-b".to_string())),
    );

    assert_eq!(a, "ok:a");
    assert_eq!(b, "ok:b");
}

/// E5. Filtered view: errors-only surfaces exactly the erroring event/node.
#[tokio::test]
async fn e5_only_errors_view_isolates_the_failing_agent() {
    let dir = tempdir().unwrap();
    let canvas = CanvasStore::open(Some(dir.path().join("canvas_store.json")));
    let c = canvas.create_canvas("Test", "", Value::Null);
    canvas.attach_session(&c.id, "s1").unwrap();
    canvas.attach_session(&c.id, "s2").unwrap();

    canvas
        .record_agent_event("s1", "executor", "completed", "done", Value::Null, true)
        .unwrap();
    canvas
        .record_agent_event("s2", "research", "error", "boom", Value::Null, true)
        .unwrap();

    let mut filter = ViewFilter::new();
    filter.only_errors = true;
    let view = canvas.get_canvas_view(&c.id, &filter).unwrap();

    assert_eq!(view.canvas.events.len(), 1);
    assert_eq!(view.canvas.events[0].agent, "research");
    assert_eq!(view.canvas.nodes.len(), 1);
    assert!(view.canvas.nodes.contains_key("agent:research"));
    assert_eq!(view.canvas.edges.len(), 0);
}

/// E6. Persistence and reload: a fresh store instance pointed at the same
/// file sees identical canvas and session mapping state.
#[tokio::test]
async fn e6_persistence_round_trips_across_store_instances() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("canvas_store.json");

    let canvas_id;
    {
        let canvas = CanvasStore::open(Some(path.clone()));
        let c = canvas.create_canvas("Test", "", Value::Null);
        canvas_id = c.id.clone();
        canvas.attach_session(&c.id, "s1").unwrap();
        for i in 0..5 {
            canvas
                .add_event(&c.id, "tick", "", "", "", &format!("{}", i), "s1", Value::Null)
                .unwrap();
        }
    }

    let reopened = CanvasStore::open(Some(path));
    let fetched = reopened.get_canvas(&canvas_id).unwrap();
    assert_eq!(fetched.events.len(), 5);
    assert_eq!(reopened.get_canvas_id_for_session("s1").as_deref(), Some(canvas_id.as_str()));
}
