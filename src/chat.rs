//! The Session/Chat Surface: a minimal conversational entry point that
//! routes a free-text query to an agent and records the exchange.
//!
//! Session ids follow the original's `canvas_<8 hex chars>` shape so a
//! client that already speaks that convention sees no difference.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::agent_registry::AgentRegistry;
use crate::canvas::CanvasStore;
use crate::sse::Broadcaster;

const MAX_HISTORY: usize = 200;

/// One recorded chat exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ChatEntry {
    pub session_id: String,
    pub query: String,
    pub agent: String,
    pub reply: String,
    pub status: String,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Outcome of [`ChatSurface::chat`].
#[derive(Debug, Clone, Serialize)]
pub struct ChatResult {
    pub status: String,
    pub agent: String,
    pub reply: String,
    pub session_id: String,
}

/// Routes a query string to an agent name. The design leaves routing policy
/// an open question; the minimal compliant default routes everything to
/// `executor`, overridable via [`ChatSurface::with_router`].
pub type Router = Arc<dyn Fn(&str) -> String + Send + Sync>;

fn default_router(_query: &str) -> String {
    "executor".to_string()
}

/// The chat surface binding the Agent Registry, Canvas Store, and SSE
/// Broadcaster into a single `chat(query, session_id)` entry point.
pub struct ChatSurface {
    agents: Arc<AgentRegistry>,
    canvas: Option<Arc<CanvasStore>>,
    broadcaster: Option<Arc<Broadcaster>>,
    router: Router,
    history: Mutex<Vec<ChatEntry>>,
}

impl ChatSurface {
    pub fn new(agents: Arc<AgentRegistry>) -> Self {
        Self {
            agents,
            canvas: None,
            broadcaster: None,
            router: Arc::new(default_router),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn with_canvas(mut self, canvas: Arc<CanvasStore>) -> Self {
        self.canvas = Some(canvas);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn with_router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Generate a new session id in the `canvas_<8 hex>` shape.
    pub fn new_session_id() -> String {
        format!("canvas_{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
    }

    pub fn history(&self) -> Vec<ChatEntry> {
        self.history.lock().unwrap().clone()
    }

    /// Route `query` to an agent, run it, and record the exchange. Mirrors
    /// the original's `canvas_chat`: empty queries are rejected by the
    /// caller before this is invoked (the HTTP surface returns 400 for
    /// `query_required`); this method assumes a non-empty query.
    pub async fn chat(&self, query: &str, session_id: Option<String>) -> ChatResult {
        let session_id = session_id.unwrap_or_else(Self::new_session_id);

        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast(
                "chat_user",
                serde_json::json!({"session_id": session_id, "query": query}),
            );
        }

        let agent_name = (self.router)(query);

        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.set_agent_status(&agent_name, "thinking");
            broadcaster.set_thinking(true);
        }

        let outcome = self
            .agents
            .delegate("chat", &agent_name, query, Some(session_id.clone()))
            .await;

        let failed = outcome.starts_with("FEHLER:");
        let status = if failed { "error" } else { "completed" };

        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.set_agent_status(&agent_name, status);
            broadcaster.set_thinking(false);
            broadcaster.broadcast(
                if failed { "chat_error" } else { "chat_reply" },
                serde_json::json!({
                    "session_id": session_id,
                    "agent": agent_name,
                    "reply": outcome,
                }),
            );
        }

        if let Some(canvas) = &self.canvas {
            canvas.record_agent_event(
                &session_id,
                &agent_name,
                status,
                &outcome,
                Value::Null,
                true,
            );
        }

        self.record_history(ChatEntry {
            session_id: session_id.clone(),
            query: query.to_string(),
            agent: agent_name.clone(),
            reply: outcome.clone(),
            status: status.to_string(),
            timestamp: Utc::now(),
        });

        ChatResult {
            status: status.to_string(),
            agent: agent_name,
            reply: outcome,
            session_id,
        }
    }

    fn record_history(&self, entry: ChatEntry) {
        let mut history = self.history.lock().unwrap();
        history.push(entry);
        if history.len() > MAX_HISTORY {
            let excess = history.len() - MAX_HISTORY;
            history.drain(0..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_registry::{AgentFactory, AgentInstance};
    use async_trait::async_trait;

    struct EchoAgent;
    #[async_trait]
    impl AgentInstance for EchoAgent {
        async fn run(&self, task: &str) -> Result<String, String> {
            Ok(format!("echo: {}", task))
        }
    }

    fn surface_with_executor() -> ChatSurface {
        let registry = Arc::new(AgentRegistry::new(None));
        let factory: Arc<dyn AgentFactory> =
            Arc::new(|_: &str, _: &Value| -> Arc<dyn AgentInstance> { Arc::new(EchoAgent) });
        registry.register_spec("executor", "executor", vec!["execution".to_string()], factory, Value::Null);
        ChatSurface::new(registry)
    }

    #[tokio::test]
    async fn chat_routes_to_executor_by_default() {
        let surface = surface_with_executor();
        let result = surface.chat("do a thing", None).await;
        assert_eq!(result.agent, "executor");
        assert_eq!(result.status, "completed");
        assert_eq!(result.reply, "echo: do a thing");
        assert!(result.session_id.starts_with("canvas_"));
    }

    #[tokio::test]
    async fn chat_records_history_capped_at_200() {
        let surface = surface_with_executor();
        for i in 0..205 {
            surface.chat(&format!("task {}", i), None).await;
        }
        assert_eq!(surface.history().len(), 200);
        assert_eq!(surface.history()[0].query, "task 5");
    }

    #[tokio::test]
    async fn chat_honors_custom_router() {
        let registry = Arc::new(AgentRegistry::new(None));
        let factory: Arc<dyn AgentFactory> =
            Arc::new(|_: &str, _: &Value| -> Arc<dyn AgentInstance> { Arc::new(EchoAgent) });
        registry.register_spec("reasoning", "reasoning", vec![], factory, Value::Null);
        let surface =
            ChatSurface::new(registry).with_router(Arc::new(|_: &str| "reasoning".to_string()));
        let result = surface.chat("why?", None).await;
        assert_eq!(result.agent, "reasoning");
    }

    #[tokio::test]
    async fn chat_reuses_provided_session_id() {
        let surface = surface_with_executor();
        let result = surface.chat("hi", Some("canvas_fixedid".to_string())).await;
        assert_eq!(result.session_id, "canvas_fixedid");
    }
}
