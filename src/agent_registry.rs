//! The Agent Registry & Delegation Engine.
//!
//! Agents are registered as [`AgentSpec`] blueprints and instantiated lazily,
//! on first delegation. Delegation itself never raises: failures come back
//! as an LLM-facing `"FEHLER: ..."` string, matching the convention the
//! agents themselves use for tool-call results, so a delegating agent can
//! read a failure the same way it reads any other tool output.
//!
//! Loop prevention uses a per-task delegation stack. The original holds this
//! in a `contextvars.ContextVar` so concurrent requests on the same process
//! never see each other's stack; `tokio::task_local!` is the async-Rust
//! equivalent — scoped to the lifetime of the future it wraps, inherited by
//! whatever that future awaits, invisible to sibling tasks.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::canvas::CanvasStore;
use crate::error::CoreError;
use crate::tool_registry::{ToolCategory, ToolHandler, ToolParameter, ToolParameterType};

/// Maximum delegation chain length before a request is refused.
pub const MAX_DELEGATION_DEPTH: usize = 3;

tokio::task_local! {
    static DELEGATION_STACK: Vec<String>;
}

/// An instantiated agent, as seen by the delegation engine.
#[async_trait]
pub trait AgentInstance: Send + Sync {
    /// Run `task` to completion and return its textual result.
    async fn run(&self, task: &str) -> Result<String, String>;

    /// The session id this instance is currently bound to, if any.
    fn conversation_session_id(&self) -> Option<String> {
        None
    }

    /// Rebind this instance's session id, returning the previous value.
    /// Instances that don't track a session id are a no-op and return
    /// `None`.
    fn set_conversation_session_id(&self, _session_id: Option<String>) -> Option<String> {
        None
    }
}

/// Builds an [`AgentInstance`] from a tools-description string and any
/// per-agent extra construction parameters.
pub trait AgentFactory: Send + Sync {
    fn create(&self, tools_description: &str, extra_kwargs: &Value) -> Arc<dyn AgentInstance>;
}

impl<F> AgentFactory for F
where
    F: Fn(&str, &Value) -> Arc<dyn AgentInstance> + Send + Sync + 'static,
{
    fn create(&self, tools_description: &str, extra_kwargs: &Value) -> Arc<dyn AgentInstance> {
        self(tools_description, extra_kwargs)
    }
}

/// A registered agent blueprint, not yet instantiated.
pub struct AgentSpec {
    pub name: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub factory: Arc<dyn AgentFactory>,
    pub extra_kwargs: Value,
}

/// Summary info about a registered agent, as returned by [`AgentRegistry::agent_info`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub instantiated: bool,
}

/// Central registry for agent-to-agent delegation.
pub struct AgentRegistry {
    specs: RwLock<HashMap<String, AgentSpec>>,
    instances: RwLock<HashMap<String, Arc<dyn AgentInstance>>>,
    tools_description: RwLock<Option<String>>,
    canvas: Option<Arc<CanvasStore>>,
}

fn default_aliases() -> HashMap<&'static str, &'static str> {
    let mut m = HashMap::new();
    m.insert("development", "developer");
    m.insert("dev", "developer");
    m.insert("researcher", "research");
    m.insert("analyst", "reasoning");
    m.insert("vision", "visual");
    m
}

fn python_list_repr(items: &[String]) -> String {
    let inner = items
        .iter()
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{}]", inner)
}

impl AgentRegistry {
    pub fn new(canvas: Option<Arc<CanvasStore>>) -> Self {
        Self {
            specs: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            tools_description: RwLock::new(None),
            canvas,
        }
    }

    /// Provide the tools-description text handed to every [`AgentFactory`]
    /// on first instantiation. The original fetches this lazily over HTTP
    /// from its own tool gateway (`GET /get_tool_descriptions`); this crate
    /// has no HTTP client dependency, so the caller supplies it directly
    /// (typically by querying its own [`crate::tool_registry::ToolRegistry`]).
    pub fn set_tools_description(&self, description: impl Into<String>) {
        *self.tools_description.write().unwrap() = Some(description.into());
    }

    /// Normalize an agent name: lowercase, trim, resolve aliases.
    pub fn normalize_agent_name(&self, name: &str) -> String {
        let normalized = name.trim().to_lowercase();
        let aliases = default_aliases();
        aliases
            .get(normalized.as_str())
            .map(|s| s.to_string())
            .unwrap_or(normalized)
    }

    /// The currently-delegated agent on this task's delegation stack, if any.
    pub fn current_agent_name(&self) -> Option<String> {
        DELEGATION_STACK
            .try_with(|stack| stack.last().cloned())
            .unwrap_or(None)
    }

    pub fn register_spec(
        &self,
        name: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: Vec<String>,
        factory: Arc<dyn AgentFactory>,
        extra_kwargs: Value,
    ) {
        let name = name.into();
        log::info!("AgentSpec registriert: {} (capabilities={:?})", name, capabilities);
        self.specs.write().unwrap().insert(
            name.clone(),
            AgentSpec {
                name,
                agent_type: agent_type.into(),
                capabilities,
                factory,
                extra_kwargs,
            },
        );
    }

    pub fn list_agents(&self) -> Vec<String> {
        self.specs.read().unwrap().keys().cloned().collect()
    }

    pub fn agent_info(&self, name: &str) -> Option<AgentInfo> {
        let specs = self.specs.read().unwrap();
        let spec = specs.get(name)?;
        Some(AgentInfo {
            name: spec.name.clone(),
            agent_type: spec.agent_type.clone(),
            capabilities: spec.capabilities.clone(),
            instantiated: self.instances.read().unwrap().contains_key(name),
        })
    }

    pub fn find_by_capability(&self, capability: &str) -> Vec<String> {
        let capability = capability.trim().to_lowercase();
        self.specs
            .read()
            .unwrap()
            .values()
            .filter(|spec| spec.capabilities.iter().any(|c| c.to_lowercase() == capability))
            .map(|spec| spec.name.clone())
            .collect()
    }

    fn resolve_effective_session_id(&self, from_agent: &str, session_id: Option<String>) -> Option<String> {
        if let Some(sid) = session_id {
            if !sid.is_empty() {
                return Some(sid);
            }
        }
        self.instances
            .read()
            .unwrap()
            .get(from_agent)
            .and_then(|instance| instance.conversation_session_id())
    }

    fn get_or_create(&self, name: &str) -> Result<Arc<dyn AgentInstance>, String> {
        if let Some(existing) = self.instances.read().unwrap().get(name) {
            return Ok(existing.clone());
        }
        let (factory, extra_kwargs) = {
            let specs = self.specs.read().unwrap();
            let spec = specs.get(name).ok_or_else(|| format!("no spec for '{}'", name))?;
            (spec.factory.clone(), spec.extra_kwargs.clone())
        };
        let tools_desc = self.tools_description.read().unwrap().clone().unwrap_or_default();
        let instance = factory.create(&tools_desc, &extra_kwargs);
        self.instances.write().unwrap().insert(name.to_string(), instance.clone());
        log::info!("Agent instanziiert: {}", name);
        Ok(instance)
    }

    fn log_canvas_delegation(
        &self,
        from_agent: &str,
        to_agent: &str,
        session_id: Option<&str>,
        status: &str,
        task: &str,
        message: &str,
        mut payload: serde_json::Map<String, Value>,
    ) {
        let Some(canvas) = &self.canvas else { return };
        let Some(session_id) = session_id else { return };
        if session_id.is_empty() {
            return;
        }
        let canvas_id = match canvas.get_canvas_id_for_session(session_id) {
            Some(id) => id,
            None => return,
        };

        let from_node = format!("agent:{}", from_agent);
        let to_node = format!("agent:{}", to_agent);

        let _ = canvas.upsert_node(
            &canvas_id,
            &from_node,
            "agent",
            from_agent,
            if status == "running" { "running" } else { "completed" },
            None,
            Some(serde_json::json!({"last_session_id": session_id})),
        );
        let _ = canvas.upsert_node(
            &canvas_id,
            &to_node,
            "agent",
            to_agent,
            status,
            None,
            Some(serde_json::json!({"last_session_id": session_id})),
        );
        let edge = canvas.add_edge(
            &canvas_id,
            &from_node,
            &to_node,
            "delegate_to_agent",
            "delegation",
            serde_json::json!({"session_id": session_id}),
        );

        payload.insert("from_agent".to_string(), Value::String(from_agent.to_string()));
        payload.insert("to_agent".to_string(), Value::String(to_agent.to_string()));
        payload.insert(
            "task_preview".to_string(),
            Value::String(task.chars().take(200).collect()),
        );
        if let Ok(edge) = edge {
            payload.insert("edge_id".to_string(), Value::String(edge.id));
        }

        let final_message = if message.is_empty() {
            format!("{} -> {}", from_agent, to_agent)
        } else {
            message.to_string()
        };

        let _ = canvas.add_event(
            &canvas_id,
            "delegation",
            status,
            from_agent,
            &to_node,
            &final_message,
            session_id,
            Value::Object(payload),
        );
    }

    /// Delegate `task` from `from_agent` to `to_agent`. Never returns `Err`:
    /// every failure mode (unknown agent, cycle, depth limit, runtime error)
    /// comes back as an LLM-readable `"FEHLER: ..."` string in `Ok`, the
    /// same contract every other tool result uses.
    pub async fn delegate(
        &self,
        from_agent: &str,
        to_agent: &str,
        task: &str,
        session_id: Option<String>,
    ) -> String {
        let from_agent = self.normalize_agent_name(from_agent);
        let to_agent = self.normalize_agent_name(to_agent);
        let effective_session_id = self.resolve_effective_session_id(&from_agent, session_id);

        if !self.specs.read().unwrap().contains_key(&to_agent) {
            let available = self.list_agents();
            self.log_canvas_delegation(
                &from_agent,
                &to_agent,
                effective_session_id.as_deref(),
                "error",
                task,
                &format!("Delegation fehlgeschlagen: Agent '{}' nicht registriert", to_agent),
                serde_json::Map::from_iter([(
                    "reason".to_string(),
                    Value::String("agent_not_registered".to_string()),
                )]),
            );
            return format!(
                "FEHLER: Agent '{}' nicht registriert. Verfuegbar: {}",
                to_agent,
                python_list_repr(&available)
            );
        }

        let stack = DELEGATION_STACK.try_with(|s| s.clone()).unwrap_or_default();

        if stack.iter().any(|a| a == &to_agent) {
            let chain = stack.join(" -> ");
            self.log_canvas_delegation(
                &from_agent,
                &to_agent,
                effective_session_id.as_deref(),
                "error",
                task,
                &format!("Zirkulaere Delegation: {} -> {}", chain, to_agent),
                serde_json::Map::from_iter([
                    ("reason".to_string(), Value::String("cycle_detected".to_string())),
                    ("chain".to_string(), Value::String(chain.clone())),
                ]),
            );
            return format!("FEHLER: Zirkulaere Delegation ({} -> {})", chain, to_agent);
        }

        if stack.len() >= MAX_DELEGATION_DEPTH {
            self.log_canvas_delegation(
                &from_agent,
                &to_agent,
                effective_session_id.as_deref(),
                "error",
                task,
                &format!("Max Delegation-Tiefe ({}) erreicht", MAX_DELEGATION_DEPTH),
                serde_json::Map::from_iter([("reason".to_string(), Value::String("max_depth".to_string()))]),
            );
            return format!("FEHLER: Max Delegation-Tiefe ({}) erreicht", MAX_DELEGATION_DEPTH);
        }

        let mut next_stack = stack.clone();
        next_stack.push(to_agent.clone());
        log::info!("Delegation: {} -> {} (Stack: {:?})", from_agent, to_agent, next_stack);
        self.log_canvas_delegation(
            &from_agent,
            &to_agent,
            effective_session_id.as_deref(),
            "running",
            task,
            &format!("Delegation gestartet: {} -> {}", from_agent, to_agent),
            serde_json::Map::from_iter([(
                "stack_depth".to_string(),
                Value::Number(next_stack.len().into()),
            )]),
        );

        DELEGATION_STACK
            .scope(
                next_stack,
                self.run_delegated(&from_agent, &to_agent, task, effective_session_id),
            )
            .await
    }

    async fn run_delegated(
        &self,
        from_agent: &str,
        to_agent: &str,
        task: &str,
        effective_session_id: Option<String>,
    ) -> String {
        let agent = match self.get_or_create(to_agent) {
            Ok(agent) => agent,
            Err(e) => {
                return format!("FEHLER: Delegation an '{}' fehlgeschlagen: {}", to_agent, e);
            }
        };

        let previous_session_id = agent.conversation_session_id();
        if let Some(sid) = &effective_session_id {
            agent.set_conversation_session_id(Some(sid.clone()));
        }

        let result = agent.run(task).await;

        agent.set_conversation_session_id(previous_session_id);

        match result {
            Ok(reply) => {
                self.log_canvas_delegation(
                    from_agent,
                    to_agent,
                    effective_session_id.as_deref(),
                    "completed",
                    task,
                    &format!("Delegation abgeschlossen: {} -> {}", from_agent, to_agent),
                    serde_json::Map::from_iter([(
                        "result_preview".to_string(),
                        Value::String(reply.chars().take(240).collect()),
                    )]),
                );
                reply
            }
            Err(e) => {
                log::error!("Delegation {} -> {} fehlgeschlagen: {}", from_agent, to_agent, e);
                self.log_canvas_delegation(
                    from_agent,
                    to_agent,
                    effective_session_id.as_deref(),
                    "error",
                    task,
                    &format!("Delegation fehlgeschlagen: {}", e),
                    serde_json::Map::from_iter([(
                        "exception".to_string(),
                        Value::String(e.chars().take(300).collect()),
                    )]),
                );
                format!("FEHLER: Delegation an '{}' fehlgeschlagen: {}", to_agent, e)
            }
        }
    }
}

/// The default known-agent roster: 7 core agent types plus 4 supplemental
/// ones the original's HTTP surface also recognizes by name
/// (`data`, `document`, `communication`, `system`) even though it ships no
/// built-in factory for them.
pub const KNOWN_AGENT_TYPES: &[&str] = &[
    "executor",
    "research",
    "reasoning",
    "creative",
    "developer",
    "visual",
    "meta",
    "data",
    "document",
    "communication",
    "system",
];

/// The 7 core agent types the default roster ships a spec for. Concrete
/// agent bodies (prompts, ReAct loops) are out of scope, so each gets a
/// trivial echo-style instance that simply reports it ran the task — a
/// placeholder a real deployment replaces with its own [`AgentFactory`].
const DEFAULT_AGENT_TYPES: &[&str] = &[
    "executor",
    "research",
    "reasoning",
    "creative",
    "developer",
    "visual",
    "meta",
];

/// A placeholder [`AgentInstance`] used by [`AgentRegistry::register_defaults`].
/// Tracks its bound session id so the delegation engine's snapshot/restore
/// dance has something real to exercise even before a concrete agent body is
/// wired in.
struct StubAgent {
    name: String,
    session: RwLock<Option<String>>,
}

#[async_trait]
impl AgentInstance for StubAgent {
    async fn run(&self, task: &str) -> Result<String, String> {
        Ok(format!("[{}] erledigt: {}", self.name, task))
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

impl AgentRegistry {
    /// Register the compiled-in default roster: the 7 core agent types,
    /// each backed by a [`StubAgent`] factory. Mirrors
    /// `register_all_agents()` in the original — a real deployment is
    /// expected to register its own [`AgentFactory`]s in place of these
    /// before traffic starts, since concrete agent bodies are out of scope
    /// here. Specs a caller already registered (e.g. with a real agent
    /// body) are left untouched — only names with no existing spec get a
    /// stub.
    pub fn register_defaults(&self) {
        for name in DEFAULT_AGENT_TYPES {
            if self.specs.read().unwrap().contains_key(*name) {
                continue;
            }
            let agent_name = name.to_string();
            let factory: Arc<dyn AgentFactory> =
                Arc::new(move |_tools_description: &str, _extra: &Value| -> Arc<dyn AgentInstance> {
                    Arc::new(StubAgent {
                        name: agent_name.clone(),
                        session: RwLock::new(None),
                    })
                });
            self.register_spec(*name, *name, vec![(*name).to_string()], factory, Value::Null);
        }
    }
}

/// A [`ToolHandler`] that routes `delegate_to_agent` tool calls into the
/// Delegation Engine, the wire-level realization of the contract described
/// in the design: "when an agent invokes the `delegate_to_agent` tool,
/// control enters the Delegation Engine."
///
/// Parameters: `to_agent` (required), `task` (required), `from_agent`
/// (optional, defaults to the currently delegated agent per
/// [`AgentRegistry::current_agent_name`], or `"unknown"` at the top
/// level), `session_id` (optional).
pub struct DelegateToAgentHandler {
    registry: Arc<AgentRegistry>,
}

impl DelegateToAgentHandler {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    /// The [`ToolParameter`] list this handler expects, for registration
    /// against a [`crate::tool_registry::ToolRegistry`].
    pub fn parameters() -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("to_agent", ToolParameterType::String)
                .required(true)
                .with_description("Canonical or alias name of the agent to delegate to."),
            ToolParameter::new("task", ToolParameterType::String)
                .required(true)
                .with_description("The task description handed to the target agent."),
            ToolParameter::new("from_agent", ToolParameterType::String)
                .required(false)
                .with_description("Name of the delegating agent; defaults to the current agent."),
            ToolParameter::new("session_id", ToolParameterType::String)
                .required(false)
                .with_description("Session id whose canvas should receive the delegation log."),
        ]
    }
}

#[async_trait]
impl ToolHandler for DelegateToAgentHandler {
    async fn call(&self, params: Value) -> Result<Value, String> {
        let to_agent = params
            .get("to_agent")
            .and_then(|v| v.as_str())
            .ok_or("missing required parameter 'to_agent'")?;
        let task = params
            .get("task")
            .and_then(|v| v.as_str())
            .ok_or("missing required parameter 'task'")?;
        let from_agent = params
            .get("from_agent")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or_else(|| self.registry.current_agent_name())
            .unwrap_or_else(|| "unknown".to_string());
        let session_id = params
            .get("session_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let reply = self.registry.delegate(&from_agent, to_agent, task, session_id).await;
        Ok(Value::String(reply))
    }
}

/// Register the `delegate_to_agent` tool against `registry`, wiring it to
/// `agents`' Delegation Engine.
pub fn register_delegate_tool(
    registry: &mut crate::tool_registry::ToolRegistry,
    agents: Arc<AgentRegistry>,
) -> Result<(), CoreError> {
    registry.register(
        "delegate_to_agent",
        "Delegate a task to another registered agent and return its reply.",
        DelegateToAgentHandler::parameters(),
        vec!["delegation".to_string()],
        ToolCategory::Delegation,
        Arc::new(DelegateToAgentHandler::new(agents)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoAgent {
        session: RwLock<Option<String>>,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AgentInstance for EchoAgent {
        async fn run(&self, task: &str) -> Result<String, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("boom".to_string())
            } else {
                Ok(format!("did: {}", task))
            }
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

    fn registry_with_echo(name: &str, fail: bool) -> AgentRegistry {
        let registry = AgentRegistry::new(None);
        let factory: Arc<dyn AgentFactory> = Arc::new(move |_: &str, _: &Value| -> Arc<dyn AgentInstance> {
            Arc::new(EchoAgent {
                session: RwLock::new(None),
                fail,
                calls: AtomicUsize::new(0),
            })
        });
        registry.register_spec(name, name, vec!["execution".to_string()], factory, Value::Null);
        registry
    }

    #[test]
    fn normalizes_aliases() {
        let registry = AgentRegistry::new(None);
        assert_eq!(registry.normalize_agent_name("Development"), "developer");
        assert_eq!(registry.normalize_agent_name(" DEV "), "developer");
        assert_eq!(registry.normalize_agent_name("Researcher"), "research");
        assert_eq!(registry.normalize_agent_name("Analyst"), "reasoning");
        assert_eq!(registry.normalize_agent_name("vision"), "visual");
        assert_eq!(registry.normalize_agent_name("executor"), "executor");
    }

    #[tokio::test]
    async fn delegate_to_unknown_agent_returns_fehler() {
        let registry = registry_with_echo("executor", false);
        let result = registry.delegate("executor", "ghost", "task", None).await;
        assert!(result.starts_with("FEHLER: Agent 'ghost' nicht registriert. Verfuegbar: ["));
    }

    #[tokio::test]
    async fn delegate_success_returns_agent_reply() {
        let registry = registry_with_echo("executor", false);
        let result = registry.delegate("meta", "executor", "do thing", None).await;
        assert_eq!(result, "did: do thing");
    }

    #[tokio::test]
    async fn delegate_propagates_runtime_error_as_fehler() {
        let registry = registry_with_echo("executor", true);
        let result = registry.delegate("meta", "executor", "do thing", None).await;
        assert_eq!(result, "FEHLER: Delegation an 'executor' fehlgeschlagen: boom");
    }

    #[tokio::test]
    async fn delegate_detects_cycle() {
        struct RedelegatingAgent {
            registry: Arc<AgentRegistry>,
        }
        #[async_trait]
        impl AgentInstance for RedelegatingAgent {
            async fn run(&self, task: &str) -> Result<String, String> {
                Ok(self.registry.delegate("a", "a", task, None).await)
            }
        }

        let registry = Arc::new(AgentRegistry::new(None));
        {
            let registry_for_factory = registry.clone();
            let factory: Arc<dyn AgentFactory> = Arc::new(move |_: &str, _: &Value| -> Arc<dyn AgentInstance> {
                Arc::new(RedelegatingAgent {
                    registry: registry_for_factory.clone(),
                })
            });
            registry.register_spec("a", "a", vec![], factory, Value::Null);
        }

        let result = registry.delegate("a", "a", "task", None).await;
        assert_eq!(result, "FEHLER: Zirkulaere Delegation (a -> a)");
    }

    #[tokio::test]
    async fn delegate_enforces_max_depth() {
        struct ChainAgent {
            registry: Arc<AgentRegistry>,
            next: &'static str,
        }
        #[async_trait]
        impl AgentInstance for ChainAgent {
            async fn run(&self, task: &str) -> Result<String, String> {
                Ok(self.registry.delegate("self", self.next, task, None).await)
            }
        }

        let registry = Arc::new(AgentRegistry::new(None));
        for (name, next) in [("a", "b"), ("b", "c"), ("c", "d"), ("d", "e")] {
            let registry_for_factory = registry.clone();
            let factory: Arc<dyn AgentFactory> = Arc::new(move |_: &str, _: &Value| -> Arc<dyn AgentInstance> {
                Arc::new(ChainAgent {
                    registry: registry_for_factory.clone(),
                    next,
                })
            });
            registry.register_spec(name, name, vec![], factory, Value::Null);
        }
        let factory_e: Arc<dyn AgentFactory> = Arc::new(|_: &str, _: &Value| -> Arc<dyn AgentInstance> {
            Arc::new(EchoAgent {
                session: RwLock::new(None),
                fail: false,
                calls: AtomicUsize::new(0),
            })
        });
        registry.register_spec("e", "e", vec![], factory_e, Value::Null);

        // a -> b -> c -> d is depth 3 (allowed); d -> e would be depth 4 (refused).
        let result = registry.delegate("root", "a", "task", None).await;
        assert_eq!(result, "FEHLER: Max Delegation-Tiefe (3) erreicht");
    }

    #[tokio::test]
    async fn session_id_restored_after_delegation() {
        // The target agent's prior session id (None, since it was never
        // bound before) is restored once delegation completes — the
        // override only holds for the duration of the delegated run.
        let registry = registry_with_echo("executor", false);
        registry
            .delegate("meta", "executor", "task", Some("sess-1".to_string()))
            .await;
        let instance = registry.get_or_create("executor").unwrap();
        assert_eq!(instance.conversation_session_id(), None);
    }

    #[test]
    fn find_by_capability_matches_case_insensitively() {
        let registry = registry_with_echo("executor", false);
        let found = registry.find_by_capability("Execution");
        assert_eq!(found, vec!["executor".to_string()]);
    }

    #[test]
    fn agent_info_reports_instantiated_flag() {
        let registry = registry_with_echo("executor", false);
        assert_eq!(registry.agent_info("executor").unwrap().instantiated, false);
        registry.get_or_create("executor").unwrap();
        assert!(registry.agent_info("executor").unwrap().instantiated);
    }

    #[test]
    fn register_defaults_seeds_the_core_roster() {
        let registry = AgentRegistry::new(None);
        registry.register_defaults();
        let mut agents = registry.list_agents();
        agents.sort();
        assert_eq!(
            agents,
            vec!["creative", "developer", "executor", "meta", "reasoning", "research", "visual"]
        );
    }

    #[test]
    fn register_defaults_does_not_clobber_a_preexisting_spec() {
        let registry = registry_with_echo("executor", true);
        registry.register_defaults();
        // The caller's own "executor" spec (which always fails) must survive;
        // only the other 6 core names get a stub.
        assert_eq!(registry.list_agents().len(), 7);
        // Re-registering defaults again is idempotent.
        registry.register_defaults();
        assert_eq!(registry.list_agents().len(), 7);
    }

    #[tokio::test]
    async fn delegate_to_agent_tool_routes_through_the_delegation_engine() {
        let registry = Arc::new(registry_with_echo("executor", false));
        let handler = DelegateToAgentHandler::new(registry);
        let result = handler
            .call(serde_json::json!({"to_agent": "executor", "task": "ship it"}))
            .await
            .unwrap();
        assert_eq!(result, Value::String("did: ship it".to_string()));
    }

    #[tokio::test]
    async fn delegate_to_agent_tool_requires_to_agent_and_task() {
        let registry = Arc::new(registry_with_echo("executor", false));
        let handler = DelegateToAgentHandler::new(registry);
        assert!(handler.call(serde_json::json!({"task": "x"})).await.is_err());
        assert!(handler.call(serde_json::json!({"to_agent": "executor"})).await.is_err());
    }

    #[test]
    fn register_delegate_tool_adds_it_to_the_tool_registry() {
        let agent_registry = Arc::new(registry_with_echo("executor", false));
        let mut tools = crate::tool_registry::ToolRegistry::new();
        register_delegate_tool(&mut tools, agent_registry).unwrap();
        assert!(tools.contains("delegate_to_agent"));
    }
}
