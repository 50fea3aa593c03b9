//! The HTTP transport surface: axum routes over the JSON-RPC Tool Gateway,
//! Canvas Store, SSE Broadcaster, and Chat Surface.
//!
//! Feature-gated behind `mcp-server`, mirroring how the teacher gates its
//! own axum adapter (`AxumHttpAdapter`) so the core crate has no hard
//! dependency on an HTTP framework.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::canvas::ViewFilter;
use crate::gateway::RpcRequest;
use crate::startup::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(handle_jsonrpc))
        .route("/health", get(health))
        .route("/get_tool_descriptions", get(get_tool_descriptions))
        .route("/get_tool_schemas/openai", get(get_openai_schema))
        .route("/get_tool_schemas/anthropic", get(get_anthropic_schema))
        .route("/get_tools_by_capability/:tag", get(get_tools_by_capability))
        .route("/canvas", get(list_canvases))
        .route("/canvas/create", post(create_canvas))
        .route("/canvas/:id", get(get_canvas))
        .route("/canvas/:id/attach_session", post(attach_session))
        .route("/canvas/:id/nodes/upsert", post(upsert_node))
        .route("/canvas/:id/edges/add", post(add_edge))
        .route("/canvas/:id/events/add", post(add_event))
        .route("/canvas/by_session/:sid", get(get_canvas_by_session))
        .route("/agent_status", get(agent_status))
        .route("/events/stream", get(events_stream))
        .route("/chat", post(chat))
        .route("/chat/history", get(chat_history))
        .with_state(state)
}

async fn handle_jsonrpc(
    State(state): State<Arc<AppState>>,
    body: String,
) -> impl IntoResponse {
    if body.trim().is_empty() {
        return (StatusCode::NO_CONTENT, Json(Value::Null)).into_response();
    }
    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "jsonrpc": "2.0",
                    "error": {"code": -32700, "message": format!("Parse error: {}", e)},
                    "id": Value::Null,
                })),
            )
                .into_response();
        }
    };

    let response = state.gateway.dispatch(request).await;
    let status = StatusCode::from_u16(response.http_status()).unwrap_or(StatusCode::OK);
    (status, Json(response)).into_response()
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "total_rpc_methods": state.tools.list_all_tools().len(),
        "registry_version": "v2",
        "subsystems": {
            "canvas_store": "ok",
            "tool_registry": "ok",
            "agent_registry": "ok",
        },
    }))
}

async fn get_tool_descriptions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "descriptions": state.tools.get_tool_manifest() }))
}

async fn get_openai_schema(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "tools": state.tools.get_openai_tools_schema() }))
}

async fn get_anthropic_schema(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "tools": state.tools.get_anthropic_tools_schema() }))
}

async fn get_tools_by_capability(
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
) -> impl IntoResponse {
    let names: Vec<&str> = state
        .tools
        .get_tools_by_capability(&tag)
        .into_iter()
        .map(|t| t.name.as_str())
        .collect();
    Json(json!({ "capability": tag, "tools": names }))
}

#[derive(Deserialize)]
struct ListCanvasesQuery {
    limit: Option<usize>,
}

async fn list_canvases(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListCanvasesQuery>,
) -> impl IntoResponse {
    let list = state.canvas.list_canvases(q.limit.unwrap_or(20));
    Json(json!({ "status": "ok", "canvases": list.items, "count": list.count }))
}

#[derive(Deserialize)]
struct CreateCanvasBody {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    metadata: Value,
}

async fn create_canvas(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCanvasBody>,
) -> impl IntoResponse {
    let canvas = state.canvas.create_canvas(&body.title, &body.description, body.metadata);
    Json(json!({ "status": "ok", "canvas": canvas }))
}

#[derive(Deserialize)]
struct CanvasViewQuery {
    session_id: Option<String>,
    agent: Option<String>,
    status: Option<String>,
    #[serde(default)]
    only_errors: bool,
    event_limit: Option<usize>,
}

impl From<CanvasViewQuery> for ViewFilter {
    fn from(q: CanvasViewQuery) -> Self {
        let mut filter = ViewFilter::new();
        filter.session_id = q.session_id;
        filter.agent = q.agent;
        filter.status = q.status;
        filter.only_errors = q.only_errors;
        if let Some(limit) = q.event_limit {
            filter.event_limit = limit;
        }
        filter
    }
}

async fn get_canvas(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<CanvasViewQuery>,
) -> impl IntoResponse {
    match state.canvas.get_canvas_view(&id, &q.into()) {
        Some(view) => (StatusCode::OK, Json(json!({ "status": "ok", "canvas": view }))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "error", "message": format!("canvas '{}' not found", id) })),
        )
            .into_response(),
    }
}

async fn get_canvas_by_session(
    State(state): State<Arc<AppState>>,
    Path(sid): Path<String>,
    Query(q): Query<CanvasViewQuery>,
) -> impl IntoResponse {
    match state.canvas.get_canvas_by_session_view(&sid, &q.into()) {
        Some(view) => (StatusCode::OK, Json(json!({ "status": "ok", "canvas": view }))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "error", "message": format!("no canvas bound to session '{}'", sid) })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct AttachSessionBody {
    session_id: String,
}

async fn attach_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AttachSessionBody>,
) -> impl IntoResponse {
    match state.canvas.attach_session(&id, &body.session_id) {
        Ok(result) => Json(json!({ "status": "ok", "result": {
            "canvas_id": result.canvas_id,
            "session_id": result.session_id,
            "previous_canvas_id": result.previous_canvas_id,
        } }))
        .into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "status": "error", "message": e.to_string() }))).into_response(),
    }
}

#[derive(Deserialize)]
struct UpsertNodeBody {
    node_id: String,
    #[serde(default)]
    node_type: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    position: Option<Value>,
    #[serde(default)]
    metadata: Option<Value>,
}

async fn upsert_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpsertNodeBody>,
) -> impl IntoResponse {
    match state.canvas.upsert_node(
        &id,
        &body.node_id,
        &body.node_type,
        &body.title,
        &body.status,
        body.position,
        body.metadata,
    ) {
        Ok(node) => Json(json!({ "status": "ok", "node": node })).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "status": "error", "message": e.to_string() }))).into_response(),
    }
}

#[derive(Deserialize)]
struct AddEdgeBody {
    source: String,
    target: String,
    #[serde(default)]
    label: String,
    #[serde(default = "default_edge_kind")]
    kind: String,
    #[serde(default)]
    metadata: Value,
}

fn default_edge_kind() -> String {
    "flow".to_string()
}

async fn add_edge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AddEdgeBody>,
) -> impl IntoResponse {
    match state
        .canvas
        .add_edge(&id, &body.source, &body.target, &body.label, &body.kind, body.metadata)
    {
        Ok(edge) => Json(json!({ "status": "ok", "edge": edge })).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "status": "error", "message": e.to_string() }))).into_response(),
    }
}

#[derive(Deserialize)]
struct AddEventBody {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    agent: String,
    #[serde(default)]
    node_id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    payload: Value,
}

async fn add_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AddEventBody>,
) -> impl IntoResponse {
    match state.canvas.add_event(
        &id,
        &body.event_type,
        &body.status,
        &body.agent,
        &body.node_id,
        &body.message,
        &body.session_id,
        body.payload,
    ) {
        Ok(event) => Json(json!({ "status": "ok", "event": event })).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "status": "error", "message": e.to_string() }))).into_response(),
    }
}

async fn agent_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "agents": state.broadcaster.agent_status_snapshot(),
        "thinking": state.broadcaster.is_thinking(),
    }))
}

enum StreamPhase {
    Init(Value, tokio::sync::mpsc::Receiver<Value>),
    Streaming(tokio::sync::mpsc::Receiver<Value>),
}

async fn events_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    let (subscription, init_frame) = state.broadcaster.subscribe();
    let initial = StreamPhase::Init(init_frame, subscription.receiver);

    let stream = futures_util::stream::unfold(initial, |phase| async move {
        match phase {
            StreamPhase::Init(frame, receiver) => {
                let event = SseEvent::default().json_data(frame).unwrap();
                Some((Ok(event), StreamPhase::Streaming(receiver)))
            }
            StreamPhase::Streaming(mut receiver) => {
                match tokio::time::timeout(crate::sse::Broadcaster::ping_timeout(), receiver.recv()).await {
                    Ok(Some(frame)) => Some((
                        Ok(SseEvent::default().json_data(frame).unwrap()),
                        StreamPhase::Streaming(receiver),
                    )),
                    Ok(None) => None,
                    Err(_) => Some((
                        Ok(SseEvent::default().json_data(crate::sse::Broadcaster::ping_frame()).unwrap()),
                        StreamPhase::Streaming(receiver),
                    )),
                }
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
struct ChatBody {
    query: String,
    session_id: Option<String>,
}

async fn chat(State(state): State<Arc<AppState>>, Json(body): Json<ChatBody>) -> impl IntoResponse {
    if body.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "error", "message": "query_required" })),
        )
            .into_response();
    }
    let result = state.chat.chat(&body.query, body.session_id).await;
    if result.status == "error" {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "error": result.reply })),
        )
            .into_response()
    } else {
        Json(result).into_response()
    }
}

async fn chat_history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "history": state.chat.history() }))
}
