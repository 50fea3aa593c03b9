//! The Policy Gate: a pre-dispatch predicate that may reject a tool call
//! by name and parameters.
//!
//! The original's `check_tool_policy` body lives outside the retrieval
//! pack this crate was built from, so only its call-site contract is
//! known: `(method, params) -> (allowed, reason)`. [`PolicyGate`] models
//! that contract as a trait so a concrete policy can be swapped in without
//! touching the gateway.

use serde_json::Value;

/// The outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// A pre-dispatch predicate the gateway consults before validation.
pub trait PolicyGate: Send + Sync {
    /// Decide whether `method` may be dispatched with `params`.
    fn check(&self, method: &str, params: &Value) -> PolicyDecision;
}

/// A policy gate that allows every call. The compliant minimal default —
/// concrete policy rules (rate limits, capability scoping, per-tenant
/// allow-lists) are out of scope for this crate.
pub struct AllowAll;

impl PolicyGate for AllowAll {
    fn check(&self, _method: &str, _params: &Value) -> PolicyDecision {
        PolicyDecision::allow()
    }
}
