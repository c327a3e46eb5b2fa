//! Targeting rule dispatch.
//!
//! Every rule kind is evaluated by [`condition_matches`]; rules of a flag are
//! scanned in declared order by [`first_match`]. Evaluation is pure: the same
//! claims against the same flag version always give the same answer.

use crate::{
    bucket,
    claims::IdentityClaims,
    flag::{Attribute, Condition, FeatureFlag, Operator, RuleValue, TargetingRule},
};
use serde_json::Value;
use std::borrow::Cow;

/// Operand matching any present value
pub const WILDCARD: &str = "*";

/// First rule of `flag` whose condition holds for `claims`
#[must_use]
pub fn first_match<'f>(flag: &'f FeatureFlag, claims: &IdentityClaims) -> Option<&'f TargetingRule> {
    flag.rules
        .iter()
        .find(|rule| condition_matches(&rule.condition, flag, claims))
}

/// Evaluate one condition for `claims` in the context of `flag`
#[must_use]
pub fn condition_matches(condition: &Condition, flag: &FeatureFlag, claims: &IdentityClaims) -> bool {
    match condition {
        Condition::Attribute {
            attribute,
            operator,
            value,
        } => {
            let values = attribute_values(attribute, claims);
            operator_matches(*operator, &values, value)
        }
        Condition::PercentageRollout { percentage } => bucket::in_rollout(
            claims.subject(),
            &flag.key,
            flag.bucket_seed(),
            *percentage,
        ),
        Condition::ClaimFeature { path } => claims.has_feature(path),
        Condition::All { conditions } => conditions
            .iter()
            .all(|c| condition_matches(c, flag, claims)),
        Condition::Any { conditions } => conditions
            .iter()
            .any(|c| condition_matches(c, flag, claims)),
        Condition::Not { condition } => !condition_matches(condition, flag, claims),
    }
}

/// Values of `attribute` for the subject; multi-valued attributes yield several
fn attribute_values<'a>(attribute: &Attribute, claims: &'a IdentityClaims) -> Vec<Cow<'a, str>> {
    match attribute {
        Attribute::Subject => vec![Cow::Borrowed(claims.subject())],
        Attribute::Role => claims
            .roles()
            .iter()
            .map(|r| Cow::Borrowed(r.as_str()))
            .collect(),
        Attribute::Tenant => claims.tenant().map(Cow::Borrowed).into_iter().collect(),
        Attribute::Claim(path) => match claims.claim(path) {
            Some(Value::Array(items)) => items.iter().filter_map(scalar_to_str).collect(),
            Some(value) => scalar_to_str(value).into_iter().collect(),
            None => Vec::new(),
        },
    }
}

fn scalar_to_str(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn operator_matches(operator: Operator, values: &[Cow<'_, str>], operand: &RuleValue) -> bool {
    match operator {
        Operator::Equals | Operator::In => any_equal(values, operand),
        Operator::NotEquals | Operator::NotIn => !any_equal(values, operand),
        Operator::StartsWith => values
            .iter()
            .any(|v| operand.iter().any(|prefix| v.starts_with(prefix))),
        Operator::EndsWith => values
            .iter()
            .any(|v| operand.iter().any(|suffix| v.ends_with(suffix))),
        Operator::Exists => !values.is_empty(),
    }
}

fn any_equal(values: &[Cow<'_, str>], operand: &RuleValue) -> bool {
    operand.iter().any(|expected| {
        if expected == WILDCARD {
            !values.is_empty()
        } else {
            values.iter().any(|v| *v == expected)
        }
    })
}
