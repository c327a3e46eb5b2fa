//! Flag evaluation against one registry snapshot.

use crate::{
    bucket,
    claims::IdentityClaims,
    decision::{Decision, ReasonCode},
    errors::GateError,
    flag::{Effect, FeatureFlag, FlagState},
    registry::FlagRegistry,
    rules,
    snapshot::FlagSnapshot,
};
use std::sync::Arc;

/// Decides access for a subject and a flag key
///
/// Pure and in-memory: each evaluation loads the current snapshot once and
/// never waits on the registry.
#[derive(Clone)]
pub struct PolicyEvaluator {
    registry: Arc<FlagRegistry>,
}

impl PolicyEvaluator {
    #[must_use]
    pub fn new(registry: Arc<FlagRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<FlagRegistry> {
        &self.registry
    }

    /// Evaluate `flag_key` for `claims`
    ///
    /// # Errors
    /// Returns `GateError::RegistryUninitialized` or `GateError::RegistryUnavailable`
    /// when there is no usable snapshot.
    pub fn evaluate(&self, claims: &IdentityClaims, flag_key: &str) -> Result<Decision, GateError> {
        let snapshot = self.registry.snapshot()?;
        Ok(evaluate_in(&snapshot, claims, flag_key))
    }

    /// Like [`evaluate`](Self::evaluate), with registry errors folded into deny decisions
    #[must_use]
    pub fn decide(&self, claims: &IdentityClaims, flag_key: &str) -> Decision {
        self.evaluate(claims, flag_key).unwrap_or_else(|e| {
            tracing::debug!(flag = flag_key, error = %e, "Evaluation failed; denying");
            Decision::deny(flag_key, e.reason())
        })
    }
}

/// Evaluate `flag_key` for `claims` against a fixed snapshot.
///
/// Registered ancestors of a dotted key (`a` and `a.b` for `a.b.c`) are
/// evaluated first; the first one that denies decides with `parent_denied`.
#[must_use]
pub fn evaluate_in(snapshot: &FlagSnapshot, claims: &IdentityClaims, flag_key: &str) -> Decision {
    for ancestor in ancestors(flag_key) {
        let Some(parent) = snapshot.get(ancestor) else {
            continue;
        };
        let parent_decision = evaluate_flag(parent, claims);
        if !parent_decision.is_allowed() {
            let decision = Decision::deny(flag_key, ReasonCode::ParentDenied);
            return match parent_decision.matched_rule() {
                Some(rule) => decision.with_rule(rule),
                None => decision,
            };
        }
    }

    match snapshot.get(flag_key) {
        Some(flag) => evaluate_flag(flag, claims),
        None => Decision::deny(flag_key, ReasonCode::FlagNotFound),
    }
}

/// Evaluate a single flag, ignoring its ancestors
#[must_use]
pub fn evaluate_flag(flag: &FeatureFlag, claims: &IdentityClaims) -> Decision {
    let key = flag.key.as_str();
    let decision = match flag.state {
        FlagState::Disabled => Decision::deny(key, ReasonCode::FlagDisabled),
        FlagState::Enabled => Decision::allow(key, ReasonCode::FlagEnabled),
        FlagState::PercentageRollout { percentage } => {
            if bucket::in_rollout(claims.subject(), key, flag.bucket_seed(), percentage) {
                Decision::allow(key, ReasonCode::RolloutIncluded)
            } else {
                Decision::deny(key, ReasonCode::RolloutExcluded)
            }
        }
        FlagState::Targeted { fallthrough } => match rules::first_match(flag, claims) {
            Some(rule) => by_effect(rule.effect, key, ReasonCode::RuleMatched).with_rule(&rule.id),
            None => fallthrough.map_or_else(
                || Decision::deny(key, ReasonCode::NoRuleMatched),
                |effect| by_effect(effect, key, ReasonCode::Fallthrough),
            ),
        },
    };
    decision.with_version(flag.version)
}

fn by_effect(effect: Effect, key: &str, reason: ReasonCode) -> Decision {
    if effect.is_allow() {
        Decision::allow(key, reason)
    } else {
        Decision::deny(key, reason)
    }
}

/// Proper prefixes of a dotted key, outermost first
fn ancestors(flag_key: &str) -> impl Iterator<Item = &str> {
    flag_key
        .match_indices('.')
        .map(move |(idx, _)| &flag_key[..idx])
        .filter(|prefix| !prefix.is_empty())
}
