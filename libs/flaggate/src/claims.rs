use crate::{claims_error::ClaimsError, config::ClaimsConfig, features::TokenFeatures};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use time::OffsetDateTime;

/// Normalized subject attributes of one inbound operation.
///
/// Derived once from a verified assertion and never mutated or persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityClaims {
    subject: String,
    roles: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    expires_at: Option<OffsetDateTime>,
    #[serde(skip)]
    raw: Map<String, Value>,
    #[serde(skip)]
    features: TokenFeatures,
}

impl IdentityClaims {
    /// Claims for `subject` with no roles, tenant, expiry or extra claims
    #[must_use]
    pub fn for_subject(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            roles: BTreeSet::new(),
            tenant: None,
            expires_at: None,
            raw: Map::new(),
            features: TokenFeatures::default(),
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Attach an extra claim readable by `claim.<name>` attribute rules
    #[must_use]
    pub fn with_claim(mut self, name: impl Into<String>, value: Value) -> Self {
        self.raw.insert(name.into(), value);
        self
    }

    /// Attach the token-carried feature tree
    #[must_use]
    pub fn with_features(mut self, features: &Value) -> Self {
        self.features = TokenFeatures::from_claim(Some(features));
        self
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.expires_at
    }

    /// Look up a raw claim by name or dotted path
    #[must_use]
    pub fn claim(&self, path: &str) -> Option<&Value> {
        lookup_in(&self.raw, path)
    }

    #[must_use]
    pub fn features(&self) -> &TokenFeatures {
        &self.features
    }

    /// Whether the token itself enables the feature at the dotted `path`
    #[must_use]
    pub fn has_feature(&self, path: &str) -> bool {
        self.features.is_enabled(path)
    }
}

/// Turns verified identity assertions into [`IdentityClaims`].
///
/// Signature and expiry are checked upstream by the token validation layer;
/// this only normalizes the decoded payload.
#[derive(Debug, Clone, Default)]
pub struct ClaimsExtractor {
    config: ClaimsConfig,
}

impl ClaimsExtractor {
    #[must_use]
    pub fn new(config: ClaimsConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ClaimsConfig {
        &self.config
    }

    /// Normalize a decoded assertion
    ///
    /// # Errors
    /// Returns `ClaimsError` if the assertion is not an object, the subject is
    /// absent or empty, or a present claim has the wrong shape.
    pub fn extract(&self, assertion: &Value) -> Result<IdentityClaims, ClaimsError> {
        let obj = assertion.as_object().ok_or(ClaimsError::NotAnObject)?;

        let subject_claim = &self.config.subject_claim;
        let subject = lookup_in(obj, subject_claim)
            .ok_or_else(|| ClaimsError::MissingClaim(subject_claim.clone()))?
            .as_str()
            .ok_or_else(|| ClaimsError::invalid(subject_claim, "must be a string"))?
            .trim();
        if subject.is_empty() {
            return Err(ClaimsError::MissingClaim(subject_claim.clone()));
        }

        let roles = lookup_in(obj, &self.config.roles_claim)
            .map(|v| parse_roles(v, &self.config.roles_claim))
            .transpose()?
            .unwrap_or_default();

        let tenant = lookup_in(obj, &self.config.tenant_claim)
            .filter(|v| !v.is_null())
            .map(|v| {
                v.as_str()
                    .map(ToOwned::to_owned)
                    .ok_or_else(|| ClaimsError::invalid(&self.config.tenant_claim, "must be a string"))
            })
            .transpose()?;

        let expires_at = obj
            .get("exp")
            .map(|v| parse_timestamp(v, "exp"))
            .transpose()?;

        let features_value = lookup_in(obj, &self.config.features_claim);
        if let Some(value) = features_value
            && !value.is_object()
            && !value.is_null()
        {
            return Err(ClaimsError::invalid(
                &self.config.features_claim,
                "must be an object",
            ));
        }

        Ok(IdentityClaims {
            subject: subject.to_owned(),
            roles,
            tenant,
            expires_at,
            raw: obj.clone(),
            features: TokenFeatures::from_claim(features_value),
        })
    }
}

/// Resolve a claim name, falling back to a dotted path into nested objects.
///
/// The literal name wins so namespaced claims such as
/// `https://example.com/roles` keep working.
fn lookup_in<'a>(obj: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(value) = obj.get(path) {
        return Some(value);
    }

    let mut segments = path.split('.');
    let mut current = obj.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Roles come either as an array of strings or as one space-delimited string
fn parse_roles(value: &Value, field_name: &str) -> Result<BTreeSet<String>, ClaimsError> {
    match value {
        Value::Null => Ok(BTreeSet::new()),
        Value::String(s) => Ok(s.split_whitespace().map(ToOwned::to_owned).collect()),
        Value::Array(arr) => Ok(arr
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect()),
        _ => Err(ClaimsError::invalid(
            field_name,
            "must be an array of strings or a string",
        )),
    }
}

fn parse_timestamp(value: &Value, field_name: &str) -> Result<OffsetDateTime, ClaimsError> {
    let ts = value
        .as_i64()
        .ok_or_else(|| ClaimsError::invalid(field_name, "must be a number (unix timestamp)"))?;

    OffsetDateTime::from_unix_timestamp(ts)
        .map_err(|_| ClaimsError::invalid(field_name, "invalid unix timestamp"))
}
