//! Crate-wide error type.
//!
//! Mirrors the error kind table in the design: every variant here is the
//! Rust-side source of one row of that table, and [`CoreError::rpc_code`]
//! is the single place that maps a kind to its JSON-RPC wire code.

use std::fmt;

/// The error kinds the orchestration substrate can raise internally.
///
/// Handler errors and delegation failures are not modeled here — the
/// gateway wraps arbitrary handler errors as `HandlerError`, and the
/// delegation engine never raises: it converts failures into
/// `"FEHLER: ..."`-prefixed strings at its own boundary (see
/// `agent_registry::delegate`).
#[derive(Debug, Clone)]
pub enum CoreError {
    /// The policy gate rejected a call. Carries the gate's reason string.
    PolicyViolation(String),
    /// A tool call failed parameter validation.
    ValidationError {
        /// Name of the tool the call was directed at.
        tool: String,
        /// Human-readable description of the violation.
        message: String,
    },
    /// The named tool is not registered.
    ToolNotFound(String),
    /// A tool handler returned an error.
    HandlerError(String),
    /// The referenced canvas id does not exist.
    CanvasNotFound(String),
    /// The canvas store's backing file was corrupt and has been
    /// reinitialized as empty.
    StoreCorruption(String),
    /// Filesystem I/O failure while loading or saving the canvas store.
    Io(String),
    /// JSON (de)serialization failure.
    Json(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::PolicyViolation(reason) => write!(f, "policy violation: {}", reason),
            CoreError::ValidationError { tool, message } => {
                write!(f, "validation error for tool '{}': {}", tool, message)
            }
            CoreError::ToolNotFound(name) => write!(f, "tool not found: {}", name),
            CoreError::HandlerError(message) => write!(f, "handler error: {}", message),
            CoreError::CanvasNotFound(id) => write!(f, "canvas not found: {}", id),
            CoreError::StoreCorruption(detail) => {
                write!(f, "canvas store was corrupt and has been reset: {}", detail)
            }
            CoreError::Io(detail) => write!(f, "io error: {}", detail),
            CoreError::Json(detail) => write!(f, "json error: {}", detail),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Json(err.to_string())
    }
}

impl CoreError {
    /// The JSON-RPC 2.0 error code this error kind surfaces as on the wire.
    ///
    /// `-32600` policy violation, `-32602` validation, `-32601` tool not
    /// found, and a generic `-32000` for everything else (handler errors,
    /// store/IO errors that leak through to a caller instead of being
    /// handled internally).
    pub fn rpc_code(&self) -> i64 {
        match self {
            CoreError::PolicyViolation(_) => -32600,
            CoreError::ValidationError { .. } => -32602,
            CoreError::ToolNotFound(_) => -32601,
            _ => -32000,
        }
    }

    /// The HTTP status code the gateway/canvas HTTP surface should return
    /// alongside this error. `CanvasNotFound` is the one exception to the
    /// gateway's "everything else rides in 200" rule: it belongs to the
    /// separate canvas REST surface (`GET /canvas/:id` and friends), which
    /// spec §7 explicitly calls out as a 404, not a JSON-RPC response.
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::PolicyViolation(_) => 403,
            CoreError::ValidationError { .. } => 400,
            CoreError::CanvasNotFound(_) => 404,
            _ => 200,
        }
    }

    /// The wire message for this error kind.
    pub fn rpc_message(&self) -> String {
        match self {
            CoreError::ValidationError { message, .. } => format!("Invalid params: {}", message),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_violation_maps_to_32600() {
        let err = CoreError::PolicyViolation("blocked".into());
        assert_eq!(err.rpc_code(), -32600);
        assert_eq!(err.http_status(), 403);
    }

    #[test]
    fn validation_error_maps_to_32602() {
        let err = CoreError::ValidationError {
            tool: "search".into(),
            message: "missing 'query'".into(),
        };
        assert_eq!(err.rpc_code(), -32602);
        assert_eq!(err.http_status(), 400);
        assert!(err.rpc_message().contains("missing 'query'"));
    }

    #[test]
    fn tool_not_found_maps_to_32601() {
        let err = CoreError::ToolNotFound("ghost".into());
        assert_eq!(err.rpc_code(), -32601);
    }

    #[test]
    fn handler_error_is_generic() {
        let err = CoreError::HandlerError("boom".into());
        assert_eq!(err.rpc_code(), -32000);
        assert_eq!(err.http_status(), 200);
    }
}
