//! Feature flag definitions as published by the external registry.
//!
//! The library only ever reads these; the registry owns them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A named, remotely configured gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlag {
    /// Flag key, e.g. `new-dashboard` or `reports.export`
    pub key: String,

    /// Definition version; bumps whenever the registry changes the flag
    pub version: u64,

    pub state: FlagState,

    /// Targeting rules in declared order. Order is part of the contract:
    /// the first matching rule decides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<TargetingRule>,

    /// Seed for rollout bucketing instead of `version`, so a percentage can be
    /// edited without reshuffling cohorts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_epoch: Option<u64>,
}

impl FeatureFlag {
    /// Seed fed into the rollout bucket hash
    #[must_use]
    pub fn bucket_seed(&self) -> u64 {
        self.bucket_epoch.unwrap_or(self.version)
    }

    /// Check structural invariants the evaluator relies on
    ///
    /// # Errors
    /// Returns `FlagDefinitionError` describing the first violation.
    pub fn validate(&self) -> Result<(), FlagDefinitionError> {
        if self.key.trim().is_empty() {
            return Err(FlagDefinitionError::EmptyKey);
        }

        if let FlagState::PercentageRollout { percentage } = self.state {
            check_percentage(&self.key, percentage)?;
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() {
                return Err(FlagDefinitionError::EmptyRuleId(self.key.clone()));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(FlagDefinitionError::DuplicateRuleId {
                    flag: self.key.clone(),
                    rule: rule.id.clone(),
                });
            }
            rule.condition.validate(&self.key)?;
        }

        Ok(())
    }
}

fn check_percentage(flag: &str, percentage: u8) -> Result<(), FlagDefinitionError> {
    if percentage > 100 {
        return Err(FlagDefinitionError::PercentageOutOfRange {
            flag: flag.to_owned(),
            percentage,
        });
    }
    Ok(())
}

/// Why a flag definition was rejected
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlagDefinitionError {
    #[error("flag key must not be empty")]
    EmptyKey,

    #[error("flag '{flag}': rollout percentage {percentage} is above 100")]
    PercentageOutOfRange { flag: String, percentage: u8 },

    #[error("flag '{0}': rule id must not be empty")]
    EmptyRuleId(String),

    #[error("flag '{flag}': duplicate rule id '{rule}'")]
    DuplicateRuleId { flag: String, rule: String },

    #[error("flag '{flag}': {reason}")]
    InvalidCondition { flag: String, reason: String },
}

/// Lifecycle state of a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlagState {
    Enabled,
    Disabled,
    /// Admit the subjects whose bucket falls below `percentage`
    PercentageRollout { percentage: u8 },
    /// Decide by targeting rules; `fallthrough` applies when none match
    Targeted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallthrough: Option<Effect>,
    },
}

/// What a matching rule does
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl Effect {
    #[must_use]
    pub fn is_allow(self) -> bool {
        matches!(self, Effect::Allow)
    }
}

/// One targeting rule of a flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetingRule {
    /// Stable identifier reported in decisions
    pub id: String,

    #[serde(default)]
    pub effect: Effect,

    #[serde(flatten)]
    pub condition: Condition,
}

/// Rule predicate, a tagged variant over rule kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// `(attribute, operator, value)` over the subject's claims
    Attribute {
        attribute: Attribute,
        operator: Operator,
        #[serde(default, skip_serializing_if = "RuleValue::is_empty")]
        value: RuleValue,
    },
    /// Subject's rollout bucket falls below `percentage`
    PercentageRollout { percentage: u8 },
    /// The subject's token enables the feature at `path`
    ClaimFeature { path: String },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

impl Condition {
    fn validate(&self, flag: &str) -> Result<(), FlagDefinitionError> {
        match self {
            Condition::Attribute {
                operator, value, ..
            } => {
                if operator.needs_value() && value.is_empty() {
                    return Err(FlagDefinitionError::InvalidCondition {
                        flag: flag.to_owned(),
                        reason: format!("operator '{operator}' requires a value"),
                    });
                }
                Ok(())
            }
            Condition::PercentageRollout { percentage } => check_percentage(flag, *percentage),
            Condition::ClaimFeature { path } => {
                if path.split('.').any(str::is_empty) {
                    return Err(FlagDefinitionError::InvalidCondition {
                        flag: flag.to_owned(),
                        reason: format!("invalid feature path '{path}'"),
                    });
                }
                Ok(())
            }
            Condition::All { conditions } | Condition::Any { conditions } => conditions
                .iter()
                .try_for_each(|condition| condition.validate(flag)),
            Condition::Not { condition } => condition.validate(flag),
        }
    }
}

/// Subject attribute a rule reads
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Attribute {
    Subject,
    Role,
    Tenant,
    /// Raw claim by name or dotted path, written `claim.<path>`
    Claim(String),
}

impl FromStr for Attribute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subject" => Ok(Attribute::Subject),
            "role" | "roles" => Ok(Attribute::Role),
            "tenant" => Ok(Attribute::Tenant),
            other => match other.strip_prefix("claim.") {
                Some(path) if !path.is_empty() => Ok(Attribute::Claim(path.to_owned())),
                _ => Err(format!(
                    "unknown attribute '{other}', expected subject, role, tenant or claim.<path>"
                )),
            },
        }
    }
}

impl TryFrom<String> for Attribute {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Attribute> for String {
    fn from(value: Attribute) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Subject => f.write_str("subject"),
            Attribute::Role => f.write_str("role"),
            Attribute::Tenant => f.write_str("tenant"),
            Attribute::Claim(path) => write!(f, "claim.{path}"),
        }
    }
}

/// Comparison applied to an attribute's values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Any value equals; `*` matches any present value
    Equals,
    NotEquals,
    In,
    NotIn,
    StartsWith,
    EndsWith,
    Exists,
}

impl Operator {
    #[must_use]
    pub fn needs_value(self) -> bool {
        !matches!(self, Operator::Exists)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::Exists => "exists",
        };
        f.write_str(s)
    }
}

/// Comparison operand: one string or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    One(String),
    Many(Vec<String>),
}

impl Default for RuleValue {
    fn default() -> Self {
        RuleValue::Many(Vec::new())
    }
}

impl RuleValue {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            RuleValue::One(_) => false,
            RuleValue::Many(values) => values.is_empty(),
        }
    }

    /// Iterate the operand values
    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            RuleValue::One(value) => std::slice::from_ref(value),
            RuleValue::Many(values) => values,
        };
        values.iter().map(String::as_str)
    }
}
