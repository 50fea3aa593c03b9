//! The JSON-RPC 2.0 Tool Gateway.
//!
//! Dispatch order mirrors `handle_jsonrpc`'s original shape exactly: policy
//! gate first, then parameter validation (only for methods that are
//! registered tools — internal `rpc.*` methods skip both the SSE `tool_start`
//! notice and validation), then the call itself, then a `tool_done` notice.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::PolicyGate;
use crate::sse::Broadcaster;
use crate::tool_registry::ToolRegistry;

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: Option<Value>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// A JSON-RPC 2.0 response envelope. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<Value>,
}

impl RpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn err(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }

    /// HTTP status a transport layer should use for this response. Only
    /// `policy_violation` and `validation_error` get an explicit override;
    /// every other JSON-RPC error (including `tool_not_found` and generic
    /// handler errors) rides in a 200 body, matching `handle_jsonrpc`'s
    /// original behavior of always returning `Response(content=reply_str)`
    /// for in-dispatch errors.
    pub fn http_status(&self) -> u16 {
        match self.error.as_ref().map(|e| e.code) {
            Some(-32600) => 403,
            Some(-32602) => 400,
            _ => 200,
        }
    }
}

/// A callable dispatched to by method name, outside of the Tool Registry
/// (e.g. `rpc.*` introspection methods, or a tool's actual handler once
/// validation has passed).
#[async_trait::async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, String>;
}

/// The JSON-RPC Tool Gateway: policy gate → validation → dispatch → SSE.
pub struct ToolGateway {
    registry: Arc<ToolRegistry>,
    policy: Arc<dyn PolicyGate>,
    broadcaster: Option<Arc<Broadcaster>>,
}

impl ToolGateway {
    pub fn new(registry: Arc<ToolRegistry>, policy: Arc<dyn PolicyGate>) -> Self {
        Self {
            registry,
            policy,
            broadcaster: None,
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Dispatch a single JSON-RPC request. Never panics: every failure mode
    /// becomes a well-formed [`RpcResponse`] with an appropriate error code.
    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();

        let decision = self.policy.check(&request.method, &request.params);
        if !decision.allowed {
            return RpcResponse::err(
                id,
                -32600,
                decision.reason.unwrap_or_else(|| "policy rejected".to_string()),
            );
        }

        let is_internal = request.method.starts_with("rpc.");
        let is_known_tool = !is_internal && self.registry.contains(&request.method);

        if is_known_tool {
            if let Err(e) = self.registry.validate_tool_call(&request.method, &request.params) {
                return RpcResponse::err(id, -32602, format!("Invalid params: {}", e));
            }
        }

        let tool_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        if !is_internal {
            if let Some(b) = &self.broadcaster {
                b.broadcast(
                    "tool_start",
                    serde_json::json!({"tool_id": tool_id, "method": request.method}),
                );
            }
        }

        let result: Result<Value, (i64, String)> = if is_known_tool {
            self.registry
                .execute_tool(&request.method, request.params.clone())
                .await
                .map_err(|e| (e.rpc_code(), e.rpc_message()))
        } else if request.method == "rpc.list_tools" {
            let mut names: Vec<&String> = self.registry.list_all_tools().keys().collect();
            names.sort();
            Ok(Value::from(names.into_iter().cloned().collect::<Vec<_>>()))
        } else {
            Err((-32601, format!("method not found: {}", request.method)))
        };

        if !is_internal {
            if let Some(b) = &self.broadcaster {
                b.broadcast(
                    "tool_done",
                    serde_json::json!({"tool_id": tool_id, "method": request.method}),
                );
            }
        }

        match result {
            Ok(value) => match encode_result(&value) {
                Ok(encoded) => RpcResponse::ok(id, encoded),
                Err(e) => RpcResponse::err(id, -32000, e),
            },
            Err((code, message)) => RpcResponse::err(id, code, message),
        }
    }
}

/// Numeric-safe result encoding. Tries native serialization first; on
/// failure, falls back to an optional repair hook (the Rust analogue of the
/// original's lazily-imported LLM-based JSON repair tool); with no hook
/// registered, rejects rather than silently wrapping — the stricter of the
/// two options the design leaves open.
pub fn encode_result(value: &Value) -> Result<Value, String> {
    match serde_json::to_string(value) {
        Ok(_) => Ok(value.clone()),
        Err(e) => Err(format!("result not serializable: {}", e)),
    }
}

/// Hook signature for a caller-supplied JSON repair fallback, invoked only
/// when [`encode_result`]'s native path fails.
pub type RepairHook = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// Encode with an explicit repair hook, for callers that want the original's
/// lenient (repair-then-wrap) behavior instead of the stricter default.
pub fn encode_result_with_hook(value: &Value, hook: &RepairHook) -> Value {
    match encode_result(value) {
        Ok(v) => v,
        Err(_) => match hook(value) {
            Ok(repaired) => repaired,
            Err(warning) => serde_json::json!({
                "_serialized": format!("{:?}", value),
                "_warning": warning,
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::AllowAll;
    use crate::tool_registry::ToolHandler;

    struct Echo;
    #[async_trait::async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, params: Value) -> Result<Value, String> {
            Ok(params)
        }
    }

    fn gateway_with_echo() -> ToolGateway {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                "echo",
                "echoes params",
                vec![],
                vec![],
                crate::tool_registry::ToolCategory::Utility,
                Arc::new(Echo),
            )
            .unwrap();
        ToolGateway::new(Arc::new(registry), Arc::new(AllowAll))
    }

    fn request(method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            jsonrpc: Some("2.0".to_string()),
            method: method.to_string(),
            params,
            id: Some(Value::from(1)),
        }
    }

    #[tokio::test]
    async fn dispatches_known_tool() {
        let gateway = gateway_with_echo();
        let response = gateway.dispatch(request("echo", serde_json::json!({"a": 1}))).await;
        assert!(response.error.is_none());
        assert_eq!(response.result, Some(serde_json::json!({"a": 1})));
        assert_eq!(response.http_status(), 200);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let gateway = gateway_with_echo();
        let response = gateway.dispatch(request("ghost", Value::Null)).await;
        assert_eq!(response.error.unwrap().code, -32601);
        assert_eq!(response.http_status(), 200);
    }

    struct AlwaysFails;
    #[async_trait::async_trait]
    impl ToolHandler for AlwaysFails {
        async fn call(&self, _params: Value) -> Result<Value, String> {
            Err("boom".to_string())
        }
    }

    #[tokio::test]
    async fn handler_error_rides_in_a_200_on_the_live_dispatch_path() {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                "explode",
                "always fails",
                vec![],
                vec![],
                crate::tool_registry::ToolCategory::Utility,
                Arc::new(AlwaysFails),
            )
            .unwrap();
        let gateway = ToolGateway::new(Arc::new(registry), Arc::new(AllowAll));

        let response = gateway.dispatch(request("explode", Value::Null)).await;
        assert_eq!(response.error.unwrap().code, -32000);
        assert_eq!(response.http_status(), 200);
    }

    #[tokio::test]
    async fn internal_rpc_methods_skip_validation() {
        let gateway = gateway_with_echo();
        let response = gateway.dispatch(request("rpc.list_tools", Value::Null)).await;
        assert!(response.error.is_none());
    }

    struct DenyAll;
    impl PolicyGate for DenyAll {
        fn check(&self, _method: &str, _params: &Value) -> crate::policy::PolicyDecision {
            crate::policy::PolicyDecision::deny("blocked")
        }
    }

    #[tokio::test]
    async fn policy_rejection_maps_to_32600() {
        let registry = Arc::new(ToolRegistry::new());
        let gateway = ToolGateway::new(registry, Arc::new(DenyAll));
        let response = gateway.dispatch(request("echo", Value::Null)).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, -32600);
        assert_eq!(error.message, "blocked");
        assert_eq!(response.http_status(), 403);
    }

    #[tokio::test]
    async fn policy_rejection_emits_no_tool_start_broadcast() {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                "echo",
                "echoes params",
                vec![],
                vec![],
                crate::tool_registry::ToolCategory::Utility,
                Arc::new(Echo),
            )
            .unwrap();
        let broadcaster = Arc::new(Broadcaster::new());
        let (mut sub, _init) = broadcaster.subscribe();
        let gateway = ToolGateway::new(Arc::new(registry), Arc::new(DenyAll)).with_broadcaster(broadcaster);

        let response = gateway.dispatch(request("echo", Value::Null)).await;
        assert_eq!(response.error.unwrap().code, -32600);
        assert!(sub.receiver.try_recv().is_err(), "policy denial must not broadcast tool_start");
    }
}
