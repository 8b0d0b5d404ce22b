//! The `PolicyEngine` external collaborator interface (§6).
//!
//! Policy expression language evaluation is explicitly out of scope for this
//! crate (§1): the dispatch core only ever consumes a [`PolicyEngine`] and
//! turns its verdict into [`crate::error::ErrorCode::PolicyDenied`] or
//! [`crate::error::ErrorCode::PolicyError`]. This mirrors how the host
//! framework this core is extracted from keeps policy evaluation engines
//! (OPA, CEL, or a bespoke evaluator) behind a single narrow trait rather
//! than depending on any one of them directly.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::ids::ServiceIdentity;

/// The proposed call a policy decision is requested for.
#[derive(Clone, Debug)]
pub struct PolicyRequest {
    pub api: String,
    pub method: String,
}

/// Free-form key/value context accompanying a policy evaluation, e.g.
/// environment or request tags. Intentionally a plain map rather than an
/// opaque blob, since policy engines commonly want to match on individual
/// fields.
pub type PolicyContext = BTreeMap<String, String>;

/// An allow/deny verdict. `metadata` lets a policy engine attach structured
/// context (e.g. which rule matched) for audit logging without the core
/// needing to know its shape.
#[derive(Clone, Debug)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: String,
    pub metadata: BTreeMap<String, String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Evaluates a proposed call against whatever policy the embedder configured.
/// Evaluation failure (the engine itself errored) is distinct from a denial
/// (the engine ran fine and said no) — the core reports these as
/// `POLICY_ERROR` and `POLICY_DENIED` respectively.
#[async_trait]
pub trait PolicyEngine: Send + Sync + 'static {
    async fn evaluate(
        &self,
        service: &ServiceIdentity,
        request: &PolicyRequest,
        context: &PolicyContext,
    ) -> std::result::Result<PolicyDecision, String>;
}

/// A policy engine that allows everything. Useful for embedders without a
/// policy layer yet, and as the default in tests that don't exercise policy
/// semantics.
pub struct AllowAllPolicy;

#[async_trait]
impl PolicyEngine for AllowAllPolicy {
    async fn evaluate(
        &self,
        _service: &ServiceIdentity,
        _request: &PolicyRequest,
        _context: &PolicyContext,
    ) -> std::result::Result<PolicyDecision, String> {
        Ok(PolicyDecision::allow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_policy_always_allows() {
        let policy = AllowAllPolicy;
        let identity = ServiceIdentity::new("svc", "1.0.0");
        let request = PolicyRequest {
            api: "test.api".into(),
            method: "echo".into(),
        };
        let decision = policy
            .evaluate(&identity, &request, &PolicyContext::new())
            .await
            .unwrap();
        assert!(decision.allowed);
    }
}
