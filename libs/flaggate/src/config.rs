use crate::{
    claims::ClaimsExtractor,
    config_error::ConfigError,
    registry::FlagRegistry,
    route_policy::StaticRoutePolicy,
    source::{FileFlagSource, FlagSource, HttpFlagSource},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Main gate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Flag registry client settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Snapshot staleness settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Claim names used by the claims extractor
    #[serde(default)]
    pub claims: ClaimsConfig,

    /// Per-operation flag keys for the route policy
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl GateConfig {
    /// Validate the configuration for consistency
    ///
    /// # Errors
    /// Returns `ConfigError` describing the first inconsistent setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.registry.validate()?;

        if self.cache.ttl_seconds == 0 {
            return Err(ConfigError::InvalidCache(
                "ttl_seconds must be greater than zero".to_owned(),
            ));
        }

        for route in &self.routes {
            route.validate()?;
        }

        Ok(())
    }
}

/// Flag registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry endpoint URL (HTTP source)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Registry document on disk (file source), used when no endpoint is set
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Refresh interval in seconds (default: 30)
    #[serde(default = "default_refresh_interval", alias = "refreshIntervalSeconds")]
    pub refresh_interval_seconds: u64,

    /// Bound on a single fetch in milliseconds (default: 5000)
    #[serde(default = "default_fetch_timeout", alias = "fetchTimeoutMs")]
    pub fetch_timeout_ms: u64,

    /// Keep serving the last-known-good snapshot when the source is down (default: true)
    #[serde(default = "default_fail_open", alias = "failOpenOnUnavailable")]
    pub fail_open_on_unavailable: bool,

    /// Maximum backoff in seconds after consecutive failures (default: 600)
    #[serde(default = "default_max_backoff", alias = "maxBackoffSeconds")]
    pub max_backoff_seconds: u64,
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_fetch_timeout() -> u64 {
    5000
}

fn default_fail_open() -> bool {
    true
}

fn default_max_backoff() -> u64 {
    600
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            file: None,
            refresh_interval_seconds: default_refresh_interval(),
            fetch_timeout_ms: default_fetch_timeout(),
            fail_open_on_unavailable: default_fail_open(),
            max_backoff_seconds: default_max_backoff(),
        }
    }
}

impl RegistryConfig {
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_seconds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_seconds == 0 {
            return Err(ConfigError::InvalidRegistry(
                "refresh_interval_seconds must be greater than zero".to_owned(),
            ));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::InvalidRegistry(
                "fetch_timeout_ms must be greater than zero".to_owned(),
            ));
        }
        if self.max_backoff_seconds < self.refresh_interval_seconds {
            return Err(ConfigError::InvalidRegistry(format!(
                "max_backoff_seconds ({}) must not be below refresh_interval_seconds ({})",
                self.max_backoff_seconds, self.refresh_interval_seconds
            )));
        }
        if let Some(endpoint) = &self.endpoint {
            let url = url::Url::parse(endpoint)
                .map_err(|e| ConfigError::InvalidRegistry(format!("endpoint: {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidRegistry(format!(
                    "endpoint scheme must be http or https, got {}",
                    url.scheme()
                )));
            }
        }
        Ok(())
    }
}

/// Snapshot staleness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Age after which a snapshot is served stale and revalidated (default: 60)
    #[serde(default = "default_ttl", alias = "ttlSeconds")]
    pub ttl_seconds: u64,
}

fn default_ttl() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Claim names read from the verified assertion.
///
/// Names may be dotted paths into nested objects, e.g. `realm_access.roles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsConfig {
    #[serde(default = "default_subject_claim")]
    pub subject_claim: String,

    #[serde(default = "default_roles_claim")]
    pub roles_claim: String,

    #[serde(default = "default_tenant_claim")]
    pub tenant_claim: String,

    #[serde(default = "default_features_claim")]
    pub features_claim: String,
}

fn default_subject_claim() -> String {
    "sub".to_owned()
}

fn default_roles_claim() -> String {
    "roles".to_owned()
}

fn default_tenant_claim() -> String {
    "tenant_id".to_owned()
}

fn default_features_claim() -> String {
    "features".to_owned()
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            subject_claim: default_subject_claim(),
            roles_claim: default_roles_claim(),
            tenant_claim: default_tenant_claim(),
            features_claim: default_features_claim(),
        }
    }
}

/// Flag key guarding one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// HTTP method, e.g. `GET`
    pub method: String,

    /// Exact request path, e.g. `/v1/dashboard`
    pub path: String,

    /// Flag key evaluated for the operation
    pub flag: String,
}

impl RouteConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        http::Method::from_bytes(self.method.as_bytes())
            .map_err(|_| ConfigError::InvalidRoute(format!("invalid method: {}", self.method)))?;
        if !self.path.starts_with('/') {
            return Err(ConfigError::InvalidRoute(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        if self.flag.trim().is_empty() {
            return Err(ConfigError::InvalidRoute(format!(
                "empty flag key for {} {}",
                self.method, self.path
            )));
        }
        Ok(())
    }
}

/// Build the flag source selected by the configuration.
///
/// The HTTP endpoint wins over the file source when both are set.
///
/// # Errors
/// Returns `ConfigError::MissingSource` when neither is configured, or
/// `ConfigError::HttpClient` when the HTTP client cannot be built.
pub fn build_flag_source(config: &RegistryConfig) -> Result<Arc<dyn FlagSource>, ConfigError> {
    if let Some(endpoint) = &config.endpoint {
        let source = HttpFlagSource::new(endpoint.clone())
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        return Ok(Arc::new(source));
    }

    if let Some(path) = &config.file {
        return Ok(Arc::new(FileFlagSource::new(path.clone())));
    }

    Err(ConfigError::MissingSource)
}

/// Build a flag registry from configuration
///
/// The registry starts cold and only refreshes when asked to: call
/// [`FlagRegistry::spawn_refresh_task`] (or drive [`FlagRegistry::refresh`]
/// yourself), otherwise reads never get past `registry_uninitialized` and
/// stale reads are never revalidated.
///
/// # Errors
/// Returns `ConfigError` if the configuration is invalid or no source can be built.
pub fn build_flag_registry(config: &GateConfig) -> Result<Arc<FlagRegistry>, ConfigError> {
    config.validate()?;
    let source = build_flag_source(&config.registry)?;
    Ok(Arc::new(FlagRegistry::new(
        source,
        config.registry.clone(),
        config.cache.clone(),
    )))
}

/// Build the claims extractor from configuration
#[must_use]
pub fn build_claims_extractor(config: &GateConfig) -> ClaimsExtractor {
    ClaimsExtractor::new(config.claims.clone())
}

/// Build the route policy from the configured routes
///
/// # Errors
/// Returns `ConfigError::InvalidRoute` for an unparsable method.
pub fn build_route_policy(config: &GateConfig) -> Result<StaticRoutePolicy, ConfigError> {
    let mut policy = StaticRoutePolicy::default();
    for route in &config.routes {
        route.validate()?;
        let method = http::Method::from_bytes(route.method.as_bytes())
            .map_err(|_| ConfigError::InvalidRoute(format!("invalid method: {}", route.method)))?;
        policy = policy.with_route(method, &route.path, &route.flag);
    }
    Ok(policy)
}
