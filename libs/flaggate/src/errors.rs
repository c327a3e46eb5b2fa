use crate::{claims_error::ClaimsError, decision::ReasonCode};
use thiserror::Error;

/// Exceptional conditions of the gate.
///
/// Normal policy outcomes (unknown flag, disabled flag, no rule matched) are
/// [`Decision`](crate::Decision)s, never errors.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Malformed claims: {0}")]
    MalformedClaims(#[from] ClaimsError),

    /// No successful fetch has happened yet, so there is no safe default.
    #[error("Flag registry not initialized: no successful fetch yet")]
    RegistryUninitialized,

    /// The cached snapshot is stale, its latest refresh failed and the
    /// registry is configured fail-closed.
    #[error("Flag registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// The source could not be reached. Only returned by explicit refreshes;
    /// readers keep the last-known-good snapshot.
    #[error("Flag registry source unavailable: {0}")]
    SourceUnavailable(String),
}

impl GateError {
    /// Reason code a deny decision carries when this error is folded into it
    #[must_use]
    pub fn reason(&self) -> ReasonCode {
        match self {
            GateError::MalformedClaims(_) => ReasonCode::MalformedClaims,
            GateError::RegistryUninitialized => ReasonCode::RegistryUninitialized,
            GateError::RegistryUnavailable(_) | GateError::SourceUnavailable(_) => {
                ReasonCode::RegistryUnavailable
            }
        }
    }
}
