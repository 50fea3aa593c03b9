// src/lib.rs
//
// The orchestration substrate: Tool Registry, JSON-RPC Tool Gateway, Agent
// Registry with Delegation Engine, Canvas Store, plus the ambient Session/
// Chat Surface, SSE Broadcaster, Startup Orchestrator, configuration, and
// error type that bind them into a running service.

pub mod agent_registry;
pub mod canvas;
pub mod chat;
pub mod config;
pub mod error;
pub mod gateway;
pub mod policy;
pub mod sse;
pub mod startup;
pub mod tool_registry;

#[cfg(feature = "mcp-server")]
pub mod http;

// Re-export the most commonly reached-for types at the crate root.
pub use agent_registry::{AgentFactory, AgentInstance, AgentRegistry, AgentSpec};
pub use canvas::{Canvas, CanvasStore, Edge, Event, Node};
pub use chat::ChatSurface;
pub use config::Config;
pub use error::CoreError;
pub use gateway::ToolGateway;
pub use policy::PolicyGate;
pub use sse::Broadcaster;
pub use tool_registry::{Tool, ToolRegistry};
