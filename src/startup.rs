//! The Startup Orchestrator: wires config, canvas store, tool registry,
//! agent registry, SSE broadcaster, and chat surface into one running
//! [`AppState`], then spawns the background canvas mirror worker.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::agent_registry::AgentRegistry;
use crate::canvas::CanvasStore;
use crate::chat::ChatSurface;
use crate::config::Config;
use crate::gateway::ToolGateway;
use crate::policy::{AllowAll, PolicyGate};
use crate::sse::Broadcaster;
use crate::tool_registry::ToolRegistry;

const MIRROR_LOG_MIN_INTERVAL: f64 = 0.3;
const MIRROR_LOG_MAX_SEEN: usize = 25_000;

/// The fully wired, shared application state a transport layer (HTTP, or a
/// test harness) drives.
pub struct AppState {
    pub config: Config,
    pub canvas: Arc<CanvasStore>,
    pub tools: Arc<ToolRegistry>,
    pub agents: Arc<AgentRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub gateway: Arc<ToolGateway>,
    pub chat: Arc<ChatSurface>,
}

/// Build an [`AppState`] from `config`: open (and, where applicable,
/// migrate) the canvas store, auto-create a default canvas, wire the
/// registries and SSE broadcaster, and return the bundle. Does not spawn
/// the mirror worker — call [`spawn_canvas_mirror`] separately so tests can
/// construct state without a background task running.
pub fn build(config: Config, mut tools: ToolRegistry, agents: AgentRegistry) -> AppState {
    let canvas = Arc::new(CanvasStore::open(config.canvas_store_path.clone()));

    if config.canvas_store_path.is_none() {
        canvas.migrate_legacy(&[
            std::path::PathBuf::from("server").join("data").join("canvas_store.json"),
            std::path::PathBuf::from("data").join("canvas_store.json"),
        ]);
    }

    if config.canvas_auto_create && canvas.list_canvases(1).count == 0 {
        canvas.create_canvas(&config.canvas_default_title, "", Value::Null);
        log::info!("auto-created default canvas '{}'", config.canvas_default_title);
    }

    let agents = Arc::new(agents);
    agents.register_defaults();
    agents.set_tools_description(tools.get_tool_manifest());
    if let Err(e) = crate::agent_registry::register_delegate_tool(&mut tools, agents.clone()) {
        log::warn!("delegate_to_agent tool already registered: {}", e);
    }

    let tools = Arc::new(tools);
    let broadcaster = Arc::new(Broadcaster::new());
    let policy: Arc<dyn PolicyGate> = Arc::new(AllowAll);

    let gateway = Arc::new(
        ToolGateway::new(tools.clone(), policy).with_broadcaster(broadcaster.clone()),
    );

    let chat = Arc::new(
        ChatSurface::new(agents.clone())
            .with_canvas(canvas.clone())
            .with_broadcaster(broadcaster.clone()),
    );

    AppState {
        config,
        canvas,
        tools,
        agents,
        broadcaster,
        gateway,
        chat,
    }
}

/// Initialize the `log`/`env_logger` facade. Call once at process start.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}

/// Spawn the background worker that mirrors newly observed canvas events
/// and edges into the log, one line per item, without replaying history
/// already present when the worker starts.
pub fn spawn_canvas_mirror(state: &AppState) -> tokio::task::JoinHandle<()> {
    let canvas = state.canvas.clone();
    let interval = state.config.canvas_mirror_log_interval.max(MIRROR_LOG_MIN_INTERVAL);
    let enabled = state.config.canvas_mirror_log;

    tokio::spawn(async move {
        if !enabled {
            return;
        }
        let mut worker = CanvasMirrorWorker::new();
        worker.seed_baseline(&canvas);
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(interval));
        loop {
            ticker.tick().await;
            worker.tick(&canvas);
        }
    })
}

struct CanvasMirrorWorker {
    seen_event_ids: HashSet<String>,
    seen_event_order: VecDeque<String>,
    seen_edge_ids: HashSet<String>,
    seen_edge_order: VecDeque<String>,
}

impl CanvasMirrorWorker {
    fn new() -> Self {
        Self {
            seen_event_ids: HashSet::new(),
            seen_event_order: VecDeque::new(),
            seen_edge_ids: HashSet::new(),
            seen_edge_order: VecDeque::new(),
        }
    }

    fn remember_event(&mut self, id: &str) {
        remember(&mut self.seen_event_ids, &mut self.seen_event_order, id);
    }

    fn remember_edge(&mut self, id: &str) {
        remember(&mut self.seen_edge_ids, &mut self.seen_edge_order, id);
    }

    /// Seed the "seen" set from current store state so the first tick
    /// doesn't replay every pre-existing event and edge as if new.
    fn seed_baseline(&mut self, canvas: &CanvasStore) {
        for summary in canvas.list_canvases(200).items {
            if let Some(full) = canvas.get_canvas(&summary.id) {
                for event in &full.events {
                    self.remember_event(&event.id);
                }
                for edge in &full.edges {
                    self.remember_edge(&edge.id);
                }
            }
        }
    }

    fn tick(&mut self, canvas: &CanvasStore) {
        for summary in canvas.list_canvases(200).items {
            let full = match canvas.get_canvas(&summary.id) {
                Some(c) => c,
                None => continue,
            };

            let mut new_events: Vec<_> = full
                .events
                .iter()
                .filter(|e| !self.seen_event_ids.contains(&e.id))
                .collect();
            new_events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            for event in new_events {
                log::info!(
                    "canvas[{}] event {} agent={} status={} message={}",
                    full.id,
                    event.event_type,
                    event.agent,
                    event.status,
                    event.message
                );
                self.remember_event(&event.id);
            }

            let mut new_edges: Vec<_> = full
                .edges
                .iter()
                .filter(|e| !self.seen_edge_ids.contains(&e.id))
                .collect();
            new_edges.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            for edge in new_edges {
                log::info!(
                    "canvas[{}] edge {} -> {} ({})",
                    full.id,
                    edge.source,
                    edge.target,
                    edge.kind
                );
                self.remember_edge(&edge.id);
            }
        }
    }
}

fn remember(seen: &mut HashSet<String>, order: &mut VecDeque<String>, id: &str) {
    if seen.insert(id.to_string()) {
        order.push_back(id.to_string());
        if order.len() > MIRROR_LOG_MAX_SEEN {
            if let Some(oldest) = order.pop_front() {
                seen.remove(&oldest);
            }
        }
    }
}
