use crate::{
    claims::{ClaimsExtractor, IdentityClaims},
    decision::{Decision, ReasonCode},
    evaluator::PolicyEvaluator,
    metrics::{GateEvent, GateMetricLabels, GateMetrics, NoOpMetrics},
};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Access refused for a gated operation.
///
/// Serializes as `{"error": "forbidden", "reason": "<code>"}`; rule details
/// stay out of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("forbidden by flag '{flag_key}': {reason}")]
pub struct Forbidden {
    flag_key: String,
    reason: ReasonCode,
}

impl Forbidden {
    #[must_use]
    pub fn new(flag_key: impl Into<String>, reason: ReasonCode) -> Self {
        Self {
            flag_key: flag_key.into(),
            reason,
        }
    }

    #[must_use]
    pub fn reason(&self) -> ReasonCode {
        self.reason
    }

    #[must_use]
    pub fn flag_key(&self) -> &str {
        &self.flag_key
    }
}

impl From<&Decision> for Forbidden {
    fn from(decision: &Decision) -> Self {
        Self::new(decision.flag_key(), decision.reason())
    }
}

impl Serialize for Forbidden {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut body = serializer.serialize_struct("Forbidden", 2)?;
        body.serialize_field("error", "forbidden")?;
        body.serialize_field("reason", &self.reason)?;
        body.end()
    }
}

#[cfg(feature = "axum-ext")]
impl axum::response::IntoResponse for Forbidden {
    fn into_response(self) -> axum::response::Response {
        (http::StatusCode::FORBIDDEN, axum::Json(self)).into_response()
    }
}

/// Turns a verified assertion and a flag key into allow or [`Forbidden`]
///
/// Every check is logged and reported to the metrics hook.
#[derive(Clone)]
pub struct DecisionEnforcer {
    evaluator: PolicyEvaluator,
    extractor: ClaimsExtractor,
    metrics: Arc<dyn GateMetrics>,
}

impl DecisionEnforcer {
    #[must_use]
    pub fn new(evaluator: PolicyEvaluator, extractor: ClaimsExtractor) -> Self {
        Self {
            evaluator,
            extractor,
            metrics: Arc::new(NoOpMetrics),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn GateMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn evaluator(&self) -> &PolicyEvaluator {
        &self.evaluator
    }

    #[must_use]
    pub fn extractor(&self) -> &ClaimsExtractor {
        &self.extractor
    }

    /// Check `flag_key` for the subject of `assertion`
    ///
    /// # Errors
    /// Returns `Forbidden` carrying the reason code on any deny, including
    /// malformed claims and an unusable registry.
    pub fn enforce(&self, assertion: &Value, flag_key: &str) -> Result<Decision, Forbidden> {
        self.authorize(assertion, flag_key)
            .map(|(decision, _)| decision)
    }

    /// Like [`enforce`](Self::enforce), also handing back the extracted claims
    ///
    /// # Errors
    /// Same as [`enforce`](Self::enforce).
    pub fn authorize(
        &self,
        assertion: &Value,
        flag_key: &str,
    ) -> Result<(Decision, IdentityClaims), Forbidden> {
        let claims = match self.extractor.extract(assertion) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(flag = flag_key, error = %e, "Rejecting malformed claims");
                let decision = Decision::deny(flag_key, ReasonCode::MalformedClaims);
                self.record(&decision);
                return Err(Forbidden::from(&decision));
            }
        };

        let decision = self.evaluator.decide(&claims, flag_key);
        self.record(&decision);

        if decision.is_allowed() {
            Ok((decision, claims))
        } else {
            Err(Forbidden::from(&decision))
        }
    }

    /// Run `handler` only if `flag_key` allows the subject of `assertion`
    ///
    /// For async handlers return the future from the closure and await the result.
    ///
    /// # Errors
    /// Returns `Forbidden` without running `handler` on deny.
    pub fn guard<F, T>(&self, assertion: &Value, flag_key: &str, handler: F) -> Result<T, Forbidden>
    where
        F: FnOnce(Decision) -> T,
    {
        let decision = self.enforce(assertion, flag_key)?;
        Ok(handler(decision))
    }

    fn record(&self, decision: &Decision) {
        let allow = decision.is_allowed();
        if allow {
            tracing::debug!(
                flag = decision.flag_key(),
                allow,
                reason = %decision.reason(),
                rule = ?decision.matched_rule(),
                flag_version = ?decision.flag_version(),
                "Access decision"
            );
        } else {
            tracing::info!(
                flag = decision.flag_key(),
                allow,
                reason = %decision.reason(),
                rule = ?decision.matched_rule(),
                flag_version = ?decision.flag_version(),
                "Access decision"
            );
        }

        let event = if allow {
            GateEvent::DecisionAllow
        } else {
            GateEvent::DecisionDeny
        };
        let labels = GateMetricLabels::default()
            .with_flag(decision.flag_key())
            .with_reason(decision.reason().as_str());
        self.metrics.record_event(event, &labels);
    }
}
