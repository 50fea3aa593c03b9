//! Canvas data model: [`Canvas`], [`Node`], [`Edge`], [`Event`].
//!
//! Field shapes mirror the JSON schema in the design's persisted-state
//! section so that the store's on-disk file and the HTTP surface's JSON
//! responses match byte-for-byte what a Python-era client would have seen,
//! modulo key order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A keyed vertex on a canvas; typically an agent or a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub title: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A directed edge between two nodes on a canvas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default = "default_edge_kind")]
    pub kind: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

fn default_edge_kind() -> String {
    "flow".to_string()
}

/// An append-only record describing something that happened on a canvas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// The durable activity container for one or more sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Canvas {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub nodes: HashMap<String, Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub session_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Echoed filters on a [`Canvas`] view returned by `get_canvas_view`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewFilters {
    pub session_id: String,
    pub agent: String,
    pub status: String,
    pub only_errors: bool,
    pub event_limit: usize,
}

/// Post-filter counts on a [`Canvas`] view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewCounts {
    pub nodes: usize,
    pub edges: usize,
    pub events: usize,
    pub sessions: usize,
}

/// A filtered, read-only projection of a [`Canvas`] returned by
/// `get_canvas_view`. Never mutates the underlying canvas (property 11,
/// "view purity").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasView {
    #[serde(flatten)]
    pub canvas: Canvas,
    pub view_filters: ViewFilters,
    pub view_counts: ViewCounts,
}

/// Parameters accepted by `get_canvas_view` / `get_canvas_by_session_view`.
#[derive(Debug, Clone, Default)]
pub struct ViewFilter {
    pub session_id: Option<String>,
    pub agent: Option<String>,
    pub status: Option<String>,
    pub only_errors: bool,
    pub event_limit: usize,
}

impl ViewFilter {
    pub fn new() -> Self {
        Self {
            event_limit: 200,
            ..Default::default()
        }
    }
}
