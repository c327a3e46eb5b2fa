#![warn(warnings)]

// Core modules
pub mod claims;
pub mod decision;
pub mod errors;
pub mod features;
pub mod flag;
pub mod traits;

pub mod bucket;
pub mod enforcer;
pub mod evaluator;
pub mod route_policy;
pub mod rules;

// Registry modules
pub mod claims_error;
pub mod config;
pub mod config_error;
pub mod metrics;
pub mod registry;
pub mod snapshot;
pub mod source;

#[cfg(feature = "axum-ext")]
pub mod axum_ext;

// Core exports
pub use claims::{ClaimsExtractor, IdentityClaims};
pub use decision::{Decision, ReasonCode};
pub use errors::GateError;
pub use flag::{Attribute, Condition, Effect, FeatureFlag, FlagState, Operator, RuleValue, TargetingRule};
pub use traits::FlagRoutePolicy;

pub use enforcer::{DecisionEnforcer, Forbidden};
pub use evaluator::PolicyEvaluator;
pub use route_policy::StaticRoutePolicy;

// Registry exports
pub use claims_error::ClaimsError;
pub use config::{
    CacheConfig, ClaimsConfig, GateConfig, RegistryConfig, RouteConfig, build_claims_extractor,
    build_flag_registry, build_flag_source, build_route_policy,
};
pub use config_error::ConfigError;
pub use metrics::{GateEvent, GateMetricLabels, GateMetrics, LoggingMetrics, NoOpMetrics};
pub use registry::{FlagRegistry, RegistryStatus, run_refresh_task};
pub use snapshot::FlagSnapshot;
pub use source::{
    FetchOutcome, FileFlagSource, FlagSource, HttpFlagSource, RegistryDocument, SourceError,
    StaticFlagSource,
};
