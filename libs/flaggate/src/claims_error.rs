use thiserror::Error;

/// Errors raised while normalizing a verified identity assertion into claims
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("Assertion must be a JSON object")]
    NotAnObject,

    #[error("Missing required claim: {0}")]
    MissingClaim(String),

    #[error("Invalid claim format: {field} - {reason}")]
    InvalidClaimFormat { field: String, reason: String },
}

impl ClaimsError {
    pub(crate) fn invalid(field: &str, reason: &str) -> Self {
        Self::InvalidClaimFormat {
            field: field.to_owned(),
            reason: reason.to_owned(),
        }
    }
}
