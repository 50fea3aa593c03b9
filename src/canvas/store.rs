//! The Canvas Store: a single-process, thread-safe, JSON-file-backed store
//! of canvases.
//!
//! Every public operation takes the internal lock, reloads from disk if the
//! file's `(mtime, size)` signature changed since the last read, applies
//! the mutation, and atomically writes back via temp-file + rename — the
//! same discipline `thought_chain.rs` uses for its own disk-backed log,
//! generalized from an append-only chain to a mutable document.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::canvas::model::{Canvas, CanvasView, Edge, Event, Node, ViewCounts, ViewFilter, ViewFilters};
use crate::error::CoreError;

const MAX_EVENTS: usize = 2000;
const EVENT_MESSAGE_LIMIT: usize = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    canvases: HashMap<String, Canvas>,
    #[serde(default)]
    session_to_canvas: HashMap<String, String>,
}

/// `(mtime_nanos, len)` signature used to detect out-of-process writes.
type StoreSignature = (i128, u64);

struct Inner {
    path: PathBuf,
    default_path_mode: bool,
    data: StoreData,
    signature: Option<StoreSignature>,
}

/// A list result from [`CanvasStore::list_canvases`].
#[derive(Debug, Clone, Serialize)]
pub struct CanvasList {
    pub items: Vec<Canvas>,
    pub count: usize,
}

/// The result of [`CanvasStore::attach_session`].
#[derive(Debug, Clone, Serialize)]
pub struct AttachResult {
    pub canvas_id: String,
    pub session_id: String,
    pub previous_canvas_id: Option<String>,
}

/// The result of [`CanvasStore::record_agent_event`].
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub canvas_id: String,
    pub event: Event,
}

/// Thread-safe, file-backed store of [`Canvas`]es.
pub struct CanvasStore {
    inner: Mutex<Inner>,
}

impl CanvasStore {
    /// Open (or create) a store at the given path. Pass `None` to use the
    /// default path (`data/canvas_store.json` under the current working
    /// directory) — only the default path is eligible for legacy-store
    /// migration.
    pub fn open(path: Option<PathBuf>) -> Self {
        let default_path_mode = path.is_none();
        let path = path.unwrap_or_else(|| PathBuf::from("data").join("canvas_store.json"));

        let mut inner = Inner {
            path,
            default_path_mode,
            data: StoreData::default(),
            signature: None,
        };
        inner.load();

        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Attempt to migrate a legacy store file into the canonical default
    /// path. Only effective when this store was opened in default-path
    /// mode and the canonical path is missing or scores lower than a
    /// legacy candidate. `legacy_candidates` lists paths to consider, in
    /// the order the original scanned them (e.g. a `server/data/...` path
    /// and a current-working-directory `data/...` path).
    pub fn migrate_legacy(&self, legacy_candidates: &[PathBuf]) {
        let mut inner = self.inner.lock().unwrap();
        inner.maybe_migrate_legacy(legacy_candidates);
    }

    pub fn list_canvases(&self, limit: usize) -> CanvasList {
        let mut inner = self.inner.lock().unwrap();
        inner.reload_if_changed();
        let limit = limit.clamp(1, 200);
        let mut canvases: Vec<Canvas> = inner.data.canvases.values().cloned().collect();
        canvases.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let count = canvases.len();
        canvases.truncate(limit);
        CanvasList {
            items: canvases,
            count,
        }
    }

    pub fn create_canvas(&self, title: &str, description: &str, metadata: Value) -> Canvas {
        let mut inner = self.inner.lock().unwrap();
        inner.reload_if_changed();
        let id = new_id("canvas");
        let now = Utc::now();
        let title = {
            let trimmed = title.trim();
            if trimmed.is_empty() {
                format!("Canvas {}", id)
            } else {
                trimmed.to_string()
            }
        };
        let canvas = Canvas {
            id: id.clone(),
            title,
            description: description.to_string(),
            metadata,
            nodes: HashMap::new(),
            edges: Vec::new(),
            events: Vec::new(),
            session_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        inner.data.canvases.insert(id, canvas.clone());
        inner.save();
        canvas
    }

    pub fn get_canvas(&self, canvas_id: &str) -> Option<Canvas> {
        let mut inner = self.inner.lock().unwrap();
        inner.reload_if_changed();
        inner.data.canvases.get(canvas_id).cloned()
    }

    fn primary_canvas_id(data: &StoreData) -> Option<String> {
        data.canvases
            .values()
            .max_by(|a, b| a.updated_at.cmp(&b.updated_at))
            .map(|c| c.id.clone())
    }

    pub fn attach_session(&self, canvas_id: &str, session_id: &str) -> Result<AttachResult, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.reload_if_changed();
        if !inner.data.canvases.contains_key(canvas_id) {
            return Err(CoreError::CanvasNotFound(canvas_id.to_string()));
        }
        let previous_canvas_id = inner.data.session_to_canvas.get(session_id).cloned();
        inner
            .data
            .session_to_canvas
            .insert(session_id.to_string(), canvas_id.to_string());

        let canvas = inner.data.canvases.get_mut(canvas_id).unwrap();
        if !canvas.session_ids.iter().any(|s| s == session_id) {
            canvas.session_ids.push(session_id.to_string());
        }
        canvas.updated_at = Utc::now();
        inner.save();

        Ok(AttachResult {
            canvas_id: canvas_id.to_string(),
            session_id: session_id.to_string(),
            previous_canvas_id,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn upsert_node(
        &self,
        canvas_id: &str,
        node_id: &str,
        node_type: &str,
        title: &str,
        status: &str,
        position: Option<Value>,
        metadata: Option<Value>,
    ) -> Result<Node, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.reload_if_changed();
        let now = Utc::now();
        let canvas = inner
            .data
            .canvases
            .get_mut(canvas_id)
            .ok_or_else(|| CoreError::CanvasNotFound(canvas_id.to_string()))?;

        let node = match canvas.nodes.get_mut(node_id) {
            None => {
                let node = Node {
                    id: node_id.to_string(),
                    node_type: node_type.to_string(),
                    title: title.to_string(),
                    status: status.to_string(),
                    position,
                    metadata: metadata.unwrap_or_else(|| Value::Object(Default::default())),
                    created_at: now,
                    updated_at: now,
                };
                canvas.nodes.insert(node_id.to_string(), node.clone());
                node
            }
            Some(existing) => {
                if !node_type.is_empty() {
                    existing.node_type = node_type.to_string();
                }
                if !title.is_empty() {
                    existing.title = title.to_string();
                }
                if !status.is_empty() {
                    existing.status = status.to_string();
                }
                if let Some(position) = position {
                    existing.position = Some(position);
                }
                if let Some(metadata) = metadata {
                    shallow_merge(&mut existing.metadata, &metadata);
                }
                existing.updated_at = now;
                existing.clone()
            }
        };

        canvas.updated_at = now;
        inner.save();
        Ok(node)
    }

    pub fn add_edge(
        &self,
        canvas_id: &str,
        source: &str,
        target: &str,
        label: &str,
        kind: &str,
        metadata: Value,
    ) -> Result<Edge, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.reload_if_changed();
        let now = Utc::now();
        let canvas = inner
            .data
            .canvases
            .get_mut(canvas_id)
            .ok_or_else(|| CoreError::CanvasNotFound(canvas_id.to_string()))?;

        if let Some(existing) = canvas.edges.iter().find(|e| {
            e.source == source && e.target == target && e.kind == kind && e.label == label
        }) {
            return Ok(existing.clone());
        }

        let edge = Edge {
            id: new_id("edge"),
            source: source.to_string(),
            target: target.to_string(),
            kind: kind.to_string(),
            label: label.to_string(),
            metadata,
            created_at: now,
        };
        canvas.edges.push(edge.clone());
        canvas.updated_at = now;
        inner.save();
        Ok(edge)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_event(
        &self,
        canvas_id: &str,
        event_type: &str,
        status: &str,
        agent: &str,
        node_id: &str,
        message: &str,
        session_id: &str,
        payload: Value,
    ) -> Result<Event, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.reload_if_changed();
        let now = Utc::now();
        let canvas = inner
            .data
            .canvases
            .get_mut(canvas_id)
            .ok_or_else(|| CoreError::CanvasNotFound(canvas_id.to_string()))?;

        let truncated_message: String = message.chars().take(EVENT_MESSAGE_LIMIT).collect();
        let event = Event {
            id: new_id("event"),
            event_type: event_type.to_string(),
            status: status.to_string(),
            agent: agent.to_string(),
            node_id: node_id.to_string(),
            message: truncated_message,
            session_id: session_id.to_string(),
            payload,
            created_at: now,
        };
        canvas.events.push(event.clone());
        if canvas.events.len() > MAX_EVENTS {
            let excess = canvas.events.len() - MAX_EVENTS;
            canvas.events.drain(0..excess);
        }
        canvas.updated_at = now;
        inner.save();
        Ok(event)
    }

    pub fn record_agent_event(
        &self,
        session_id: &str,
        agent_name: &str,
        status: &str,
        message: &str,
        payload: Value,
        auto_attach: bool,
    ) -> Option<RecordedEvent> {
        let canvas_id = {
            let mut inner = self.inner.lock().unwrap();
            inner.reload_if_changed();
            let existing = inner.data.session_to_canvas.get(session_id).cloned();
            if existing.is_some() {
                existing
            } else if auto_attach && !session_id.is_empty() {
                let fallback = Self::primary_canvas_id(&inner.data);
                if let Some(fallback_id) = fallback.clone() {
                    inner
                        .data
                        .session_to_canvas
                        .insert(session_id.to_string(), fallback_id.clone());
                    if let Some(canvas) = inner.data.canvases.get_mut(&fallback_id) {
                        if !canvas.session_ids.iter().any(|s| s == session_id) {
                            canvas.session_ids.push(session_id.to_string());
                        }
                        canvas.updated_at = Utc::now();
                    }
                    inner.save();
                }
                fallback
            } else {
                None
            }
        }?;

        let node_id = format!("agent:{}", agent_name);
        self.upsert_node(
            &canvas_id,
            &node_id,
            "agent",
            agent_name,
            status,
            None,
            Some(serde_json::json!({"last_session_id": session_id})),
        )
        .ok()?;
        let event = self
            .add_event(
                &canvas_id,
                "agent_run",
                status,
                agent_name,
                &node_id,
                message,
                session_id,
                payload,
            )
            .ok()?;
        Some(RecordedEvent { canvas_id, event })
    }

    pub fn get_canvas_id_for_session(&self, session_id: &str) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.reload_if_changed();
        inner.data.session_to_canvas.get(session_id).cloned()
    }

    pub fn get_canvas_by_session(&self, session_id: &str) -> Option<Canvas> {
        let canvas_id = self.get_canvas_id_for_session(session_id)?;
        self.get_canvas(&canvas_id)
    }

    /// Filtered, non-mutating projection of a canvas. See property 11
    /// ("view purity") in the design's testable properties.
    pub fn get_canvas_view(&self, canvas_id: &str, filter: &ViewFilter) -> Option<CanvasView> {
        let canvas = {
            let mut inner = self.inner.lock().unwrap();
            inner.reload_if_changed();
            inner.data.canvases.get(canvas_id)?.clone()
        };
        Some(apply_view_filter(canvas, filter))
    }

    pub fn get_canvas_by_session_view(&self, session_id: &str, filter: &ViewFilter) -> Option<CanvasView> {
        let canvas_id = self.get_canvas_id_for_session(session_id)?;
        let mut filter = filter.clone();
        filter.session_id = Some(session_id.to_string());
        self.get_canvas_view(&canvas_id, &filter)
    }
}

fn is_error_status(status: &str, message: &str) -> bool {
    let s = status.trim().to_lowercase();
    let m = message.trim().to_lowercase();
    s.contains("error") || s.contains("fehler") || m.contains("error") || m.contains("fehler")
}

fn matches_agent(agent_filter: &str, event_agent: &str, node_id: &str, title: &str) -> bool {
    if agent_filter.is_empty() {
        return true;
    }
    let target = agent_filter.trim().to_lowercase();
    let agent = event_agent.trim().to_lowercase();
    let node = node_id.trim().to_lowercase();
    let node_agent = node.strip_prefix("agent:").unwrap_or(&node).to_string();
    let ttl = title.trim().to_lowercase();
    target == agent || target == node_agent || target == node || target == ttl
}

fn apply_view_filter(mut canvas: Canvas, filter: &ViewFilter) -> CanvasView {
    let session_filter = filter.session_id.clone().unwrap_or_default();
    let agent_filter = filter.agent.clone().unwrap_or_default();
    let status_filter = filter.status.clone().unwrap_or_default().to_lowercase();
    let limit = filter.event_limit.clamp(1, 1000);

    let mut filtered_events: Vec<Event> = canvas
        .events
        .into_iter()
        .filter(|ev| {
            if !session_filter.is_empty() && ev.session_id != session_filter {
                return false;
            }
            if !status_filter.is_empty() && ev.status.to_lowercase() != status_filter {
                return false;
            }
            if filter.only_errors && !is_error_status(&ev.status, &ev.message) {
                return false;
            }
            matches_agent(&agent_filter, &ev.agent, &ev.node_id, "")
        })
        .collect();
    filtered_events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    filtered_events.truncate(limit);

    let filtered_nodes: HashMap<String, Node> = canvas
        .nodes
        .into_iter()
        .filter(|(node_id, node)| {
            let node_session = node
                .metadata
                .get("last_session_id")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if !session_filter.is_empty() && !node_session.is_empty() && node_session != session_filter {
                return false;
            }
            if !status_filter.is_empty() && node.status.to_lowercase() != status_filter {
                return false;
            }
            if filter.only_errors && !is_error_status(&node.status, "") {
                return false;
            }
            matches_agent(&agent_filter, "", node_id, &node.title)
        })
        .collect();

    let filtered_edges: Vec<Edge> = if !filtered_nodes.is_empty() {
        canvas
            .edges
            .into_iter()
            .filter(|e| filtered_nodes.contains_key(&e.source) && filtered_nodes.contains_key(&e.target))
            .collect()
    } else {
        Vec::new()
    };

    let filtered_session_ids: Vec<String> = if !session_filter.is_empty() {
        canvas
            .session_ids
            .into_iter()
            .filter(|sid| *sid == session_filter)
            .collect()
    } else {
        canvas.session_ids
    };

    let view_counts = ViewCounts {
        nodes: filtered_nodes.len(),
        edges: filtered_edges.len(),
        events: filtered_events.len(),
        sessions: filtered_session_ids.len(),
    };

    canvas.nodes = filtered_nodes;
    canvas.edges = filtered_edges;
    canvas.events = filtered_events;
    canvas.session_ids = filtered_session_ids;

    CanvasView {
        canvas,
        view_filters: ViewFilters {
            session_id: session_filter,
            agent: agent_filter,
            status: status_filter,
            only_errors: filter.only_errors,
            event_limit: limit,
        },
        view_counts,
    }
}

fn shallow_merge(target: &mut Value, incoming: &Value) {
    if let (Value::Object(target_map), Value::Object(incoming_map)) = (target, incoming) {
        for (key, value) in incoming_map {
            target_map.insert(key.clone(), value.clone());
        }
    }
}

fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..10])
}

fn store_score(data: &StoreData) -> (usize, usize, usize) {
    let events: usize = data.canvases.values().map(|c| c.events.len()).sum();
    (events, data.canvases.len(), data.session_to_canvas.len())
}

fn read_signature(path: &Path) -> Option<StoreSignature> {
    let meta = fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    let nanos = modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i128)
        .unwrap_or(0);
    Some((nanos, meta.len()))
}

fn load_from_path(path: &Path) -> Option<StoreData> {
    if !path.exists() {
        return None;
    }
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str::<StoreData>(&text).ok()
}

impl Inner {
    fn maybe_migrate_legacy(&mut self, legacy_candidates: &[PathBuf]) {
        if !self.default_path_mode {
            return;
        }
        let canonical_data = load_from_path(&self.path);
        let canonical_score = canonical_data.as_ref().map(store_score).unwrap_or((0, 0, 0));

        let mut best: Option<(( usize, usize, usize), &PathBuf)> = None;
        for candidate in legacy_candidates {
            if candidate == &self.path || !candidate.exists() {
                continue;
            }
            let data = match load_from_path(candidate) {
                Some(d) => d,
                None => continue,
            };
            let score = store_score(&data);
            if score > canonical_score {
                if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                    best = Some((score, candidate));
                }
            }
        }

        if let Some((_, best_path)) = best {
            if let Ok(text) = fs::read_to_string(best_path) {
                if let Some(parent) = self.path.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                let _ = fs::write(&self.path, text);
                self.signature = None;
            }
        }
    }

    fn load(&mut self) {
        if !self.path.exists() {
            if let Some(parent) = self.path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            self.save();
            return;
        }

        match load_from_path(&self.path) {
            Some(data) => {
                self.data = data;
                self.signature = read_signature(&self.path);
            }
            None => {
                // Corrupt file: reinitialize as empty rather than crash.
                self.data = StoreData::default();
                self.save();
            }
        }
    }

    fn reload_if_changed(&mut self) -> bool {
        let current = match read_signature(&self.path) {
            Some(sig) => sig,
            None => return false,
        };
        if self.signature == Some(current) {
            return false;
        }
        match load_from_path(&self.path) {
            Some(data) => {
                self.data = data;
                self.signature = Some(current);
                true
            }
            None => false,
        }
    }

    fn save(&mut self) {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let tmp_path = {
            let mut s = self.path.as_os_str().to_os_string();
            s.push(".tmp");
            PathBuf::from(s)
        };
        if let Ok(json) = serde_json::to_string_pretty(&self.data) {
            if fs::write(&tmp_path, json).is_ok() {
                let _ = fs::rename(&tmp_path, &self.path);
            }
        }
        self.signature = read_signature(&self.path);
    }
}
