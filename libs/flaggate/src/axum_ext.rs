//! Axum extractors and middleware for flag gating

use crate::{
    claims::IdentityClaims, decision::Decision, enforcer::DecisionEnforcer,
    traits::FlagRoutePolicy,
};
use axum::{
    Json,
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, Method, StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::sync::Arc;

/// Claims object already verified by upstream token validation.
///
/// Token validation middleware inserts this into request extensions; the
/// gate only reads it.
#[derive(Debug, Clone)]
pub struct VerifiedAssertion(pub Value);

/// Rejection of the gate extractors when the gate middleware did not run
#[derive(Debug, Clone, Copy)]
pub struct GateNotConfigured(&'static str);

impl IntoResponse for GateNotConfigured {
    fn into_response(self) -> Response {
        tracing::error!("{} not found - flag gate middleware not configured", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "internal", "reason": "gate_not_configured" })),
        )
            .into_response()
    }
}

/// Extractor for the allow [`Decision`] of the gate middleware
#[derive(Debug, Clone)]
pub struct GateDecision(pub Decision);

impl<S> FromRequestParts<S> for GateDecision
where
    S: Send + Sync,
{
    type Rejection = GateNotConfigured;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Decision>()
            .cloned()
            .map(GateDecision)
            .ok_or(GateNotConfigured("Decision"))
    }
}

/// Extractor for the claims the gate middleware evaluated
#[derive(Debug, Clone)]
pub struct GateClaims(pub IdentityClaims);

impl<S> FromRequestParts<S> for GateClaims
where
    S: Send + Sync,
{
    type Rejection = GateNotConfigured;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<IdentityClaims>()
            .cloned()
            .map(GateClaims)
            .ok_or(GateNotConfigured("IdentityClaims"))
    }
}

/// State of [`require_flag`]: one flag for every request through the layer
#[derive(Clone)]
pub struct FlagGateState {
    enforcer: Arc<DecisionEnforcer>,
    flag_key: Arc<str>,
}

impl FlagGateState {
    #[must_use]
    pub fn new(enforcer: Arc<DecisionEnforcer>, flag_key: impl Into<Arc<str>>) -> Self {
        Self {
            enforcer,
            flag_key: flag_key.into(),
        }
    }
}

/// State of [`gate_with_policy`]: the flag is resolved per route
#[derive(Clone)]
pub struct FlagPolicyState {
    enforcer: Arc<DecisionEnforcer>,
    policy: Arc<dyn FlagRoutePolicy>,
}

impl FlagPolicyState {
    #[must_use]
    pub fn new(enforcer: Arc<DecisionEnforcer>, policy: Arc<dyn FlagRoutePolicy>) -> Self {
        Self { enforcer, policy }
    }
}

/// Gate every request behind one flag
///
/// Usage: `.layer(from_fn_with_state(FlagGateState::new(enforcer, "beta-api"), require_flag))`
pub async fn require_flag(
    State(FlagGateState { enforcer, flag_key }): State<FlagGateState>,
    request: Request,
    next: Next,
) -> Response {
    if is_preflight_request(request.method(), request.headers()) {
        return next.run(request).await;
    }
    gate(&enforcer, &flag_key, request, next).await
}

/// Gate requests behind the flag their route resolves to
///
/// This middleware:
/// 1. Skips gating for CORS preflight requests
/// 2. Resolves the route's flag key using `FlagRoutePolicy`
/// 3. Passes unresolved routes through untouched
/// 4. Enforces the flag and either responds 403 or forwards the request with
///    the `Decision` and `IdentityClaims` in its extensions
pub async fn gate_with_policy(
    State(FlagPolicyState { enforcer, policy }): State<FlagPolicyState>,
    request: Request,
    next: Next,
) -> Response {
    if is_preflight_request(request.method(), request.headers()) {
        return next.run(request).await;
    }

    let Some(flag_key) = policy.resolve(request.method(), request.uri().path()) else {
        return next.run(request).await;
    };
    gate(&enforcer, &flag_key, request, next).await
}

async fn gate(enforcer: &DecisionEnforcer, flag_key: &str, mut request: Request, next: Next) -> Response {
    // A missing assertion is evaluated like an empty one: malformed claims
    let verdict = match request.extensions().get::<VerifiedAssertion>() {
        Some(VerifiedAssertion(assertion)) => enforcer.authorize(assertion, flag_key),
        None => enforcer.authorize(&Value::Null, flag_key),
    };

    match verdict {
        Ok((decision, claims)) => {
            request.extensions_mut().insert(decision);
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(forbidden) => forbidden.into_response(),
    }
}

/// Check if this is a CORS preflight request
///
/// Preflight requests are OPTIONS requests with:
/// - Origin header present
/// - Access-Control-Request-Method header present
fn is_preflight_request(method: &Method, headers: &HeaderMap) -> bool {
    method == Method::OPTIONS
        && headers.contains_key(axum::http::header::ORIGIN)
        && headers.contains_key(axum::http::header::ACCESS_CONTROL_REQUEST_METHOD)
}

// Middleware tests live in tests/axum_gate.rs; they need a full router.
