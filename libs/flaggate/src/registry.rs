use crate::{
    config::{CacheConfig, RegistryConfig},
    errors::GateError,
    flag::FeatureFlag,
    metrics::{GateEvent, GateMetricLabels, GateMetrics, NoOpMetrics},
    snapshot::FlagSnapshot,
    source::{FetchOutcome, FlagSource, SourceError},
};
use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Client-side cache of the flag registry with lock-free reads
///
/// Readers load the current [`FlagSnapshot`] through `ArcSwap`; refreshes build
/// a new snapshot and swap it in. Stale reads never block: they are served
/// from the cached snapshot and wake the background refresh task. Readers
/// only touch atomics.
///
/// Nothing refreshes on its own. Without [`spawn_refresh_task`](Self::spawn_refresh_task)
/// (or [`run_refresh_task`]) stale reads only record a wake-up that nobody
/// consumes, and the snapshot ages until [`refresh`](Self::refresh) is called.
#[must_use]
pub struct FlagRegistry {
    source: Arc<dyn FlagSource>,

    /// `None` until the first successful fetch
    snapshot: ArcSwapOption<FlagSnapshot>,

    /// Failed refreshes since the last success; drives backoff and fail-closed reads
    consecutive_failures: AtomicU32,

    /// Error of the latest failed refresh
    last_error: ArcSwapOption<String>,

    /// Serializes refreshes so deltas apply to the snapshot they were fetched against
    refresh_lock: tokio::sync::Mutex<()>,

    /// Wakes the refresh task ahead of schedule
    refresh_requested: Notify,

    /// Set while a wake-up is pending, so concurrent stale reads notify once
    refresh_pending: AtomicBool,

    metrics: Arc<dyn GateMetrics>,
    config: RegistryConfig,
    cache: CacheConfig,
}

/// Point-in-time view of registry health
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStatus {
    pub source: &'static str,
    pub initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub flag_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_seconds: Option<u64>,
    pub stale: bool,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

enum Applied {
    Replaced(Arc<FlagSnapshot>),
    Confirmed(Arc<FlagSnapshot>),
}

impl FlagRegistry {
    #[must_use]
    pub fn new(source: Arc<dyn FlagSource>, config: RegistryConfig, cache: CacheConfig) -> Self {
        Self {
            source,
            snapshot: ArcSwapOption::empty(),
            consecutive_failures: AtomicU32::new(0),
            last_error: ArcSwapOption::empty(),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_requested: Notify::new(),
            refresh_pending: AtomicBool::new(false),
            metrics: Arc::new(NoOpMetrics),
            config,
            cache,
        }
    }

    /// Report refresh and staleness events to `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn GateMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Current snapshot.
    ///
    /// # Errors
    /// - `GateError::RegistryUninitialized` before the first successful fetch
    /// - `GateError::RegistryUnavailable` when running fail-closed and the
    ///   snapshot is stale with its latest refresh failed
    pub fn snapshot(&self) -> Result<Arc<FlagSnapshot>, GateError> {
        let Some(snapshot) = self.snapshot.load_full() else {
            return Err(GateError::RegistryUninitialized);
        };

        if snapshot.age() > self.cache.ttl() {
            self.request_refresh();

            if !self.config.fail_open_on_unavailable && self.failures() > 0 {
                return Err(GateError::RegistryUnavailable(
                    self.last_error
                        .load_full()
                        .map_or_else(|| "latest refresh failed".to_owned(), |e| e.to_string()),
                ));
            }

            self.metrics
                .record_event(GateEvent::StaleServed, &self.labels());
        }

        Ok(snapshot)
    }

    /// Look up one flag in the current snapshot
    ///
    /// # Errors
    /// Same as [`snapshot`](Self::snapshot).
    pub fn get(&self, flag_key: &str) -> Result<Option<Arc<FeatureFlag>>, GateError> {
        Ok(self.snapshot()?.get(flag_key).cloned())
    }

    /// Wake the refresh task now, regardless of schedule or backoff
    pub fn invalidate(&self) {
        tracing::debug!(source = self.source.name(), "Flag registry invalidated");
        self.refresh_pending.store(true, Ordering::Release);
        self.refresh_requested.notify_one();
    }

    /// Stale reads ask for a refresh unless the source is already failing;
    /// in that case the backoff schedule decides.
    fn request_refresh(&self) {
        if self.failures() > 0 {
            return;
        }
        if !self.refresh_pending.swap(true, Ordering::AcqRel) {
            self.refresh_requested.notify_one();
        }
    }

    /// Fetch from the source and swap in the resulting snapshot.
    ///
    /// On failure the current snapshot stays in place.
    ///
    /// # Errors
    /// Returns `GateError::SourceUnavailable` if the fetch fails, times out or
    /// returns an answer that cannot be applied.
    pub async fn refresh(&self) -> Result<(), GateError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_pending.store(false, Ordering::Release);

        let current = self.snapshot.load_full();
        let since = current.as_ref().map(|s| s.version().to_owned());
        let labels = self.labels();
        let timeout = self.config.fetch_timeout();

        let started = Instant::now();
        let fetched = tokio::time::timeout(timeout, self.source.fetch_flags(since.as_deref()))
            .await
            .unwrap_or_else(|_| Err(SourceError::Timeout(timeout)));
        self.metrics.record_fetch_duration(
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            &labels,
        );

        match fetched.and_then(|outcome| apply(current, outcome)) {
            Ok(applied) => {
                let (snapshot, event) = match applied {
                    Applied::Replaced(s) => (s, GateEvent::RefreshSuccess),
                    Applied::Confirmed(s) => (s, GateEvent::RefreshNotModified),
                };
                tracing::debug!(
                    source = self.source.name(),
                    registry_version = snapshot.version(),
                    flags = snapshot.len(),
                    event = event.metric_name(),
                    "Flag registry refreshed"
                );
                self.snapshot.store(Some(snapshot));

                self.consecutive_failures.store(0, Ordering::Release);
                self.last_error.store(None);

                self.metrics.record_event(event, &labels);
                Ok(())
            }
            Err(e) => {
                // refresh_lock is held: no concurrent writer
                let failures = self.failures().saturating_add(1);
                self.last_error.store(Some(Arc::new(e.to_string())));
                self.consecutive_failures.store(failures, Ordering::Release);

                tracing::warn!(
                    source = self.source.name(),
                    failures,
                    error = %e,
                    "Flag registry refresh failed; keeping last-known-good snapshot"
                );
                self.metrics.record_event(
                    GateEvent::RefreshFailure,
                    &labels.with_reason(error_kind(&e)),
                );
                Err(GateError::SourceUnavailable(e.to_string()))
            }
        }
    }

    /// Calculate backoff duration based on consecutive failures
    fn calculate_backoff(&self, failures: u32) -> Duration {
        let base = self.config.refresh_interval();
        let exponential = base.saturating_mul(2u32.pow(failures.min(10)));
        exponential.min(self.config.max_backoff())
    }

    /// Delay until the next scheduled refresh
    fn refresh_delay(&self) -> Duration {
        let failures = self.failures();
        if failures == 0 {
            self.config.refresh_interval()
        } else {
            self.calculate_backoff(failures)
        }
    }

    #[must_use]
    pub fn status(&self) -> RegistryStatus {
        let snapshot = self.snapshot.load_full();
        RegistryStatus {
            source: self.source.name(),
            initialized: snapshot.is_some(),
            version: snapshot.as_ref().map(|s| s.version().to_owned()),
            flag_count: snapshot.as_ref().map_or(0, |s| s.len()),
            age_seconds: snapshot.as_ref().map(|s| s.age().as_secs()),
            stale: snapshot
                .as_ref()
                .is_some_and(|s| s.age() > self.cache.ttl()),
            consecutive_failures: self.failures(),
            last_error: self.last_error.load_full().map(|e| e.to_string()),
        }
    }

    /// Spawn the background refresh task on the current runtime
    #[must_use]
    pub fn spawn_refresh_task(self: &Arc<Self>, cancellation_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(run_refresh_task(Arc::clone(self), cancellation_token))
    }

    fn failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    fn labels(&self) -> GateMetricLabels {
        GateMetricLabels::default().with_source(self.source.name())
    }
}

fn apply(current: Option<Arc<FlagSnapshot>>, outcome: FetchOutcome) -> Result<Applied, SourceError> {
    match outcome {
        FetchOutcome::Full { flags, version } => {
            Ok(Applied::Replaced(Arc::new(FlagSnapshot::from_flags(flags, version))))
        }
        FetchOutcome::Delta {
            upserted,
            removed,
            version,
        } => {
            let base = current.ok_or(SourceError::MissingBase)?;
            Ok(Applied::Replaced(Arc::new(
                base.apply_delta(upserted, &removed, version),
            )))
        }
        FetchOutcome::NotModified => {
            let base = current.ok_or(SourceError::MissingBase)?;
            Ok(Applied::Confirmed(Arc::new(base.refreshed())))
        }
    }
}

fn error_kind(error: &SourceError) -> &'static str {
    match error {
        SourceError::Transport(_) => "transport",
        SourceError::Status(_) => "status",
        SourceError::Decode(_) => "decode",
        SourceError::Timeout(_) => "timeout",
        SourceError::Io(_) => "io",
        SourceError::MissingBase => "missing_base",
    }
}

/// Background task keeping the registry fresh
///
/// Fetches immediately, then on every refresh interval (or backoff delay after
/// failures) and whenever the registry is invalidated or read stale. Runs
/// until `cancellation_token` is cancelled.
///
/// # Example
///
/// ```ignore
/// let registry = Arc::new(FlagRegistry::new(source, registry_cfg, cache_cfg));
/// let cancel = CancellationToken::new();
/// let handle = registry.spawn_refresh_task(cancel.clone());
///
/// // On shutdown:
/// cancel.cancel();
/// handle.await?;
/// ```
pub async fn run_refresh_task(registry: Arc<FlagRegistry>, cancellation_token: CancellationToken) {
    tracing::info!(
        source = registry.source.name(),
        interval_secs = registry.config.refresh_interval_seconds,
        "Flag registry refresh task started"
    );

    loop {
        tokio::select! {
            () = cancellation_token.cancelled() => break,
            // Failures are logged and counted inside refresh
            _ = registry.refresh() => {}
        }

        let delay = registry.refresh_delay();
        tokio::select! {
            () = cancellation_token.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
            () = registry.refresh_requested.notified() => {
                tracing::debug!("Flag registry refresh requested");
            }
        }
    }

    tracing::info!("Flag registry refresh task shutting down");
}
