use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    FlagEnabled,
    FlagDisabled,
    FlagNotFound,
    RuleMatched,
    NoRuleMatched,
    Fallthrough,
    RolloutIncluded,
    RolloutExcluded,
    ParentDenied,
    MalformedClaims,
    RegistryUninitialized,
    RegistryUnavailable,
}

impl ReasonCode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::FlagEnabled => "flag_enabled",
            ReasonCode::FlagDisabled => "flag_disabled",
            ReasonCode::FlagNotFound => "flag_not_found",
            ReasonCode::RuleMatched => "rule_matched",
            ReasonCode::NoRuleMatched => "no_rule_matched",
            ReasonCode::Fallthrough => "fallthrough",
            ReasonCode::RolloutIncluded => "rollout_included",
            ReasonCode::RolloutExcluded => "rollout_excluded",
            ReasonCode::ParentDenied => "parent_denied",
            ReasonCode::MalformedClaims => "malformed_claims",
            ReasonCode::RegistryUninitialized => "registry_uninitialized",
            ReasonCode::RegistryUnavailable => "registry_unavailable",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one authorization check.
///
/// Created fresh per operation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    allow: bool,
    reason: ReasonCode,
    flag_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    matched_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flag_version: Option<u64>,
}

impl Decision {
    #[must_use]
    pub fn allow(flag_key: impl Into<String>, reason: ReasonCode) -> Self {
        Self {
            allow: true,
            reason,
            flag_key: flag_key.into(),
            matched_rule: None,
            flag_version: None,
        }
    }

    #[must_use]
    pub fn deny(flag_key: impl Into<String>, reason: ReasonCode) -> Self {
        Self {
            allow: false,
            reason,
            flag_key: flag_key.into(),
            matched_rule: None,
            flag_version: None,
        }
    }

    #[must_use]
    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.matched_rule = Some(rule_id.into());
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.flag_version = Some(version);
        self
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.allow
    }

    #[must_use]
    pub fn reason(&self) -> ReasonCode {
        self.reason
    }

    #[must_use]
    pub fn flag_key(&self) -> &str {
        &self.flag_key
    }

    /// Id of the targeting rule that decided, if any
    #[must_use]
    pub fn matched_rule(&self) -> Option<&str> {
        self.matched_rule.as_deref()
    }

    /// Version of the flag definition the decision was made against
    #[must_use]
    pub fn flag_version(&self) -> Option<u64> {
        self.flag_version
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reason_wire_names_match_display() {
        for reason in [
            ReasonCode::FlagEnabled,
            ReasonCode::FlagNotFound,
            ReasonCode::NoRuleMatched,
            ReasonCode::RegistryUninitialized,
        ] {
            assert_eq!(
                serde_json::to_value(reason).unwrap(),
                json!(reason.to_string())
            );
        }
    }

    #[test]
    fn test_decision_serialization() {
        let decision = Decision::deny("beta-api", ReasonCode::RuleMatched)
            .with_rule("no-guests")
            .with_version(4);
        assert_eq!(
            serde_json::to_value(&decision).unwrap(),
            json!({
                "allow": false,
                "reason": "rule_matched",
                "flag_key": "beta-api",
                "matched_rule": "no-guests",
                "flag_version": 4
            })
        );
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let decision = Decision::deny("missing", ReasonCode::FlagNotFound);
        assert_eq!(
            serde_json::to_value(&decision).unwrap(),
            json!({ "allow": false, "reason": "flag_not_found", "flag_key": "missing" })
        );
    }
}
