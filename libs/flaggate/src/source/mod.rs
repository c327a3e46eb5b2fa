//! Where flag definitions come from.
//!
//! A [`FlagSource`] answers one question: what changed since version `since`?
//! The registry client owns caching, scheduling and failure policy; sources
//! only fetch and decode.

mod file;
mod http;
mod static_source;

pub use file::FileFlagSource;
pub use http::HttpFlagSource;
pub use static_source::StaticFlagSource;

use crate::flag::FeatureFlag;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Answer of a source to a fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Complete flag set replacing whatever is cached
    Full {
        flags: Vec<FeatureFlag>,
        version: String,
    },
    /// Changes relative to the `since` version passed to the fetch
    Delta {
        upserted: Vec<FeatureFlag>,
        removed: Vec<String>,
        version: String,
    },
    /// Nothing changed since the `since` version
    NotModified,
}

/// Fetch failures. All of them mean "source unavailable" to the registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("invalid registry document: {0}")]
    Decode(String),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(String),

    /// The answer is relative to a snapshot that is not cached
    #[error("registry answered relative to a snapshot that is not cached")]
    MissingBase,
}

/// Remote (or local) provider of flag definitions
#[async_trait]
pub trait FlagSource: Send + Sync {
    /// Short name used in logs and metric labels
    fn name(&self) -> &'static str;

    /// Fetch flags changed since `since` (`None` asks for the full set)
    ///
    /// # Errors
    /// Returns `SourceError` if the registry cannot be reached or its answer
    /// cannot be decoded.
    async fn fetch_flags(&self, since: Option<&str>) -> Result<FetchOutcome, SourceError>;
}

/// Wire format of the registry.
///
/// `flags` entries are decoded one by one so a single malformed definition
/// does not poison the whole document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(deserialize_with = "version_string")]
    pub version: String,

    /// `true` when `flags` and `removed` are changes rather than the full set
    #[serde(default)]
    pub delta: bool,

    #[serde(default)]
    pub flags: Vec<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

impl RegistryDocument {
    /// Full document holding `flags`
    ///
    /// # Errors
    /// Returns `SourceError::Decode` if a flag cannot be serialized.
    pub fn full(version: impl Into<String>, flags: &[FeatureFlag]) -> Result<Self, SourceError> {
        let flags = flags
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(Self {
            version: version.into(),
            delta: false,
            flags,
            removed: Vec::new(),
        })
    }

    /// Parse a registry document from raw JSON
    ///
    /// # Errors
    /// Returns `SourceError::Decode` if the envelope is not a registry document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SourceError> {
        serde_json::from_slice(bytes).map_err(|e| SourceError::Decode(e.to_string()))
    }

    /// Turn the document into a fetch outcome, skipping undecodable flags.
    ///
    /// In a delta, an undecodable upsert also removes the cached definition of
    /// its key, so the flag evaluates as not found rather than under stale rules.
    #[must_use]
    pub fn into_outcome(self) -> FetchOutcome {
        let (flags, undecodable) = decode_flags(self.flags);
        if self.delta {
            let mut removed = self.removed;
            removed.extend(undecodable);
            FetchOutcome::Delta {
                upserted: flags,
                removed,
                version: self.version,
            }
        } else {
            FetchOutcome::Full {
                flags,
                version: self.version,
            }
        }
    }
}

/// Decoded flags plus the keys of entries that failed to decode
fn decode_flags(raw: Vec<Value>) -> (Vec<FeatureFlag>, Vec<String>) {
    let mut flags = Vec::with_capacity(raw.len());
    let mut undecodable = Vec::new();
    for value in raw {
        let key = value.get("key").and_then(Value::as_str).map(ToOwned::to_owned);
        match serde_json::from_value::<FeatureFlag>(value) {
            Ok(flag) => flags.push(flag),
            Err(e) => {
                tracing::warn!(
                    flag = key.as_deref().unwrap_or("<unknown>"),
                    error = %e,
                    "Skipping undecodable flag definition"
                );
                undecodable.extend(key);
            }
        }
    }
    (flags, undecodable)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VersionTag {
    Text(String),
    Number(u64),
}

fn version_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match VersionTag::deserialize(deserializer)? {
        VersionTag::Text(s) => s,
        VersionTag::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::flag::FlagState;
    use serde_json::json;

    #[test]
    fn test_full_document() {
        let doc = RegistryDocument::from_slice(
            json!({
                "version": "42",
                "flags": [
                    { "key": "new-dashboard", "version": 3, "state": { "kind": "disabled" } },
                    { "key": "beta-api", "version": 1,
                      "state": { "kind": "percentage_rollout", "percentage": 100 } }
                ]
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();

        match doc.into_outcome() {
            FetchOutcome::Full { flags, version } => {
                assert_eq!(version, "42");
                assert_eq!(flags.len(), 2);
                assert_eq!(flags[0].state, FlagState::Disabled);
            }
            other => panic!("expected full outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_numeric_version_and_delta() {
        let doc = RegistryDocument::from_slice(
            br#"{"version": 43, "delta": true,
                 "flags": [{"key": "a", "version": 2, "state": {"kind": "enabled"}}],
                 "removed": ["b"]}"#,
        )
        .unwrap();

        assert_eq!(
            doc.into_outcome(),
            FetchOutcome::Delta {
                upserted: vec![FeatureFlag {
                    key: "a".to_owned(),
                    version: 2,
                    state: FlagState::Enabled,
                    rules: Vec::new(),
                    bucket_epoch: None,
                }],
                removed: vec!["b".to_owned()],
                version: "43".to_owned(),
            }
        );
    }

    #[test]
    fn test_undecodable_flag_is_skipped() {
        let doc = RegistryDocument::from_slice(
            br#"{"version": "1", "flags": [
                {"key": "good", "version": 1, "state": {"kind": "enabled"}},
                {"key": "bad", "version": 1, "state": {"kind": "sometimes"}},
                "not even an object"
            ]}"#,
        )
        .unwrap();

        match doc.into_outcome() {
            FetchOutcome::Full { flags, .. } => {
                assert_eq!(flags.len(), 1);
                assert_eq!(flags[0].key, "good");
            }
            other => panic!("expected full outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_undecodable_delta_upsert_is_removed() {
        let doc = RegistryDocument::from_slice(
            br#"{"version": "2", "delta": true, "removed": ["gone"], "flags": [
                {"key": "beta", "version": 2, "state": {"kind": "targeted"},
                 "rules": [{"id": "r", "kind": "attribute", "attribute": "department",
                            "operator": "equals", "value": "ops"}]},
                {"version": 2, "state": {"kind": "sometimes"}}
            ]}"#,
        )
        .unwrap();

        assert_eq!(
            doc.into_outcome(),
            FetchOutcome::Delta {
                upserted: Vec::new(),
                removed: vec!["gone".to_owned(), "beta".to_owned()],
                version: "2".to_owned(),
            }
        );
    }

    #[test]
    fn test_broken_envelope_is_an_error() {
        assert!(matches!(
            RegistryDocument::from_slice(b"{\"flags\": []}"),
            Err(SourceError::Decode(_))
        ));
        assert!(matches!(
            RegistryDocument::from_slice(b"<html>"),
            Err(SourceError::Decode(_))
        ));
    }
}
