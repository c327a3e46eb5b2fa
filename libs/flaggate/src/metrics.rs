/// Metrics hooks for gate events
///
/// Backends (Prometheus, StatsD, ...) plug in by implementing [`GateMetrics`].
/// Gate event types for metrics tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateEvent {
    /// An enforcement check allowed access
    DecisionAllow,

    /// An enforcement check denied access
    DecisionDeny,

    /// Registry refresh produced a new snapshot
    RefreshSuccess,

    /// Registry refresh failed; the previous snapshot stays in place
    RefreshFailure,

    /// Registry confirmed the cached snapshot is current
    RefreshNotModified,

    /// A read was served from a snapshot older than the cache TTL
    StaleServed,
}

impl GateEvent {
    /// Get the metric name for this event
    #[must_use]
    pub fn metric_name(&self) -> &'static str {
        match self {
            GateEvent::DecisionAllow => "decision.allow",
            GateEvent::DecisionDeny => "decision.deny",
            GateEvent::RefreshSuccess => "registry.refresh.ok",
            GateEvent::RefreshFailure => "registry.refresh.fail",
            GateEvent::RefreshNotModified => "registry.refresh.not_modified",
            GateEvent::StaleServed => "registry.stale_served",
        }
    }
}

/// Labels for gate metrics
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct GateMetricLabels {
    /// Flag key (for decisions)
    pub flag: Option<String>,

    /// Reason code (for decisions) or error kind (for refresh failures)
    pub reason: Option<String>,

    /// Flag source name (for registry events)
    pub source: Option<String>,
}

impl GateMetricLabels {
    #[must_use]
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flag = Some(flag.into());
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Trait for metrics backends
pub trait GateMetrics: Send + Sync {
    /// Record a gate event
    fn record_event(&self, event: GateEvent, labels: &GateMetricLabels);

    /// Record how long a registry fetch took
    fn record_fetch_duration(&self, duration_ms: u64, labels: &GateMetricLabels);
}

/// No-op metrics implementation (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl GateMetrics for NoOpMetrics {
    fn record_event(&self, _event: GateEvent, _labels: &GateMetricLabels) {
        // No-op
    }

    fn record_fetch_duration(&self, _duration_ms: u64, _labels: &GateMetricLabels) {
        // No-op
    }
}

/// Logging-based metrics implementation (for debugging)
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMetrics;

impl GateMetrics for LoggingMetrics {
    fn record_event(&self, event: GateEvent, labels: &GateMetricLabels) {
        tracing::debug!(
            metric = event.metric_name(),
            flag = ?labels.flag,
            reason = ?labels.reason,
            source = ?labels.source,
            "Gate event recorded"
        );
    }

    fn record_fetch_duration(&self, duration_ms: u64, labels: &GateMetricLabels) {
        tracing::debug!(
            metric = "registry.fetch.duration_ms",
            duration_ms = duration_ms,
            source = ?labels.source,
            "Registry fetch duration recorded"
        );
    }
}
