//! Feature switches carried inside the identity token itself.
//!
//! The token's features claim is a nested object. Every feature is an object
//! that may hold an `enabled` boolean, and its child features are further keys:
//!
//! ```json
//! { "features": { "reports": { "enabled": true, "export": { "enabled": false } } } }
//! ```
//!
//! A dot-delimited path such as `reports.export` is enabled only if every
//! segment exists, is an object, and none of them has `enabled: false`.

use serde_json::{Map, Value};

/// Token-carried feature tree of one subject
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenFeatures {
    root: Option<Map<String, Value>>,
}

impl TokenFeatures {
    /// Wrap the raw features claim. Anything other than an object carries no features.
    #[must_use]
    pub fn from_claim(value: Option<&Value>) -> Self {
        Self {
            root: value.and_then(Value::as_object).cloned(),
        }
    }

    /// Whether the token carried a features claim at all
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.root.is_some()
    }

    /// Check whether the feature at `path` is enabled for this subject
    #[must_use]
    pub fn is_enabled(&self, path: &str) -> bool {
        let Some(mut current) = self.root.as_ref() else {
            return false;
        };

        if path.is_empty() {
            return false;
        }

        for segment in path.split('.') {
            let Some(Value::Object(feature)) = current.get(segment) else {
                return false;
            };

            if matches!(feature.get("enabled"), Some(Value::Bool(false))) {
                return false;
            }

            current = feature;
        }

        true
    }
}
