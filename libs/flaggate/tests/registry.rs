#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Registry client behavior: cold start, last-known-good, refresh protocol,
//! fail-closed reads and the background refresh task

use async_trait::async_trait;
use flaggate::{
    CacheConfig, ClaimsExtractor, FeatureFlag, FetchOutcome, FlagRegistry, FlagSource, FlagState,
    GateError, IdentityClaims, PolicyEvaluator, ReasonCode, RegistryConfig, RegistryDocument,
    SourceError, StaticFlagSource,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn flag(key: &str, version: u64, state: FlagState) -> FeatureFlag {
    FeatureFlag {
        key: key.to_owned(),
        version,
        state,
        rules: Vec::new(),
        bucket_epoch: None,
    }
}

fn config(interval_secs: u64, fail_open: bool) -> RegistryConfig {
    RegistryConfig {
        refresh_interval_seconds: interval_secs,
        max_backoff_seconds: interval_secs.max(600),
        fail_open_on_unavailable: fail_open,
        ..RegistryConfig::default()
    }
}

fn cache(ttl_seconds: u64) -> CacheConfig {
    CacheConfig { ttl_seconds }
}

/// Source replaying a fixed list of answers, then failing
#[derive(Default)]
struct ScriptedSource {
    answers: Mutex<VecDeque<Result<FetchOutcome, SourceError>>>,
    seen_since: Mutex<Vec<Option<String>>>,
}

impl ScriptedSource {
    fn new(answers: Vec<Result<FetchOutcome, SourceError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            seen_since: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl FlagSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_flags(&self, since: Option<&str>) -> Result<FetchOutcome, SourceError> {
        self.seen_since.lock().push(since.map(ToOwned::to_owned));
        self.answers
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SourceError::Transport("script exhausted".to_owned())))
    }
}

/// Source that never answers in time
struct SlowSource;

#[async_trait]
impl FlagSource for SlowSource {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn fetch_flags(&self, _since: Option<&str>) -> Result<FetchOutcome, SourceError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(FetchOutcome::NotModified)
    }
}

/// Let the spawned refresh task catch up under paused time
async fn settle() {
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test]
async fn cold_registry_denies_everything() {
    let registry = Arc::new(FlagRegistry::new(
        Arc::new(StaticFlagSource::new(vec![flag("beta-api", 1, FlagState::Enabled)])),
        RegistryConfig::default(),
        CacheConfig::default(),
    ));
    let evaluator = PolicyEvaluator::new(registry);
    let claims = IdentityClaims::for_subject("user-1");

    assert!(matches!(
        evaluator.evaluate(&claims, "beta-api"),
        Err(GateError::RegistryUninitialized)
    ));
    let decision = evaluator.decide(&claims, "beta-api");
    assert!(!decision.is_allowed());
    assert_eq!(decision.reason(), ReasonCode::RegistryUninitialized);
}

#[tokio::test]
async fn fetch_failure_keeps_last_known_good_snapshot() {
    let source = Arc::new(StaticFlagSource::new(vec![flag("beta-api", 1, FlagState::Enabled)]));
    let registry = Arc::new(FlagRegistry::new(
        source.clone(),
        RegistryConfig::default(),
        CacheConfig::default(),
    ));
    registry.refresh().await.unwrap();

    source.fail_with("connection refused");
    let err = registry.refresh().await.unwrap_err();
    assert!(matches!(err, GateError::SourceUnavailable(ref msg) if msg.contains("connection refused")));

    let evaluator = PolicyEvaluator::new(registry.clone());
    let decision = evaluator
        .evaluate(&IdentityClaims::for_subject("user-1"), "beta-api")
        .unwrap();
    assert!(decision.is_allowed());
    assert_eq!(decision.reason(), ReasonCode::FlagEnabled);
    assert_eq!(registry.status().consecutive_failures, 1);
}

#[tokio::test]
async fn delta_refresh_upserts_and_removes() {
    let source = Arc::new(ScriptedSource::new(vec![
        Ok(FetchOutcome::Full {
            flags: vec![
                flag("new-dashboard", 1, FlagState::Enabled),
                flag("legacy-export", 1, FlagState::Enabled),
            ],
            version: "10".to_owned(),
        }),
        Ok(FetchOutcome::Delta {
            upserted: vec![
                flag("new-dashboard", 2, FlagState::Disabled),
                flag("beta-api", 1, FlagState::Enabled),
            ],
            removed: vec!["legacy-export".to_owned()],
            version: "11".to_owned(),
        }),
    ]));
    let registry = FlagRegistry::new(source.clone(), RegistryConfig::default(), CacheConfig::default());

    registry.refresh().await.unwrap();
    registry.refresh().await.unwrap();

    let snapshot = registry.snapshot().unwrap();
    assert_eq!(snapshot.version(), "11");
    assert_eq!(
        registry.get("new-dashboard").unwrap().unwrap().state,
        FlagState::Disabled
    );
    assert!(registry.get("legacy-export").unwrap().is_none());
    assert!(registry.get("beta-api").unwrap().is_some());
    assert_eq!(
        *source.seen_since.lock(),
        vec![None, Some("10".to_owned())]
    );
}

#[tokio::test(start_paused = true)]
async fn not_modified_keeps_flags_and_resets_age() {
    let source = Arc::new(ScriptedSource::new(vec![
        Ok(FetchOutcome::Full {
            flags: vec![flag("beta-api", 1, FlagState::Enabled)],
            version: "3".to_owned(),
        }),
        Ok(FetchOutcome::NotModified),
    ]));
    let registry = FlagRegistry::new(source, RegistryConfig::default(), cache(60));

    registry.refresh().await.unwrap();
    tokio::time::advance(Duration::from_secs(90)).await;
    assert!(registry.status().stale);

    registry.refresh().await.unwrap();
    let status = registry.status();
    assert!(!status.stale);
    assert_eq!(status.version.as_deref(), Some("3"));
    assert!(registry.get("beta-api").unwrap().is_some());
}

#[tokio::test]
async fn delta_on_cold_registry_is_a_failure() {
    let source = Arc::new(ScriptedSource::new(vec![Ok(FetchOutcome::Delta {
        upserted: vec![flag("beta-api", 1, FlagState::Enabled)],
        removed: Vec::new(),
        version: "1".to_owned(),
    })]));
    let registry = FlagRegistry::new(source, RegistryConfig::default(), CacheConfig::default());

    assert!(registry.refresh().await.is_err());
    assert!(matches!(
        registry.snapshot(),
        Err(GateError::RegistryUninitialized)
    ));
}

#[tokio::test]
async fn undecodable_delta_upsert_drops_the_cached_definition() {
    let delta = RegistryDocument::from_slice(
        json!({
            "version": "2",
            "delta": true,
            "flags": [{
                "key": "beta",
                "version": 2,
                "state": { "kind": "targeted" },
                "rules": [{
                    "id": "r",
                    "kind": "attribute",
                    "attribute": "department",
                    "operator": "equals",
                    "value": "ops"
                }]
            }]
        })
        .to_string()
        .as_bytes(),
    )
    .unwrap();
    let source = Arc::new(ScriptedSource::new(vec![
        Ok(FetchOutcome::Full {
            flags: vec![
                flag("beta", 1, FlagState::Enabled),
                flag("reports", 1, FlagState::Enabled),
            ],
            version: "1".to_owned(),
        }),
        Ok(delta.into_outcome()),
    ]));
    let registry = Arc::new(FlagRegistry::new(
        source,
        RegistryConfig::default(),
        CacheConfig::default(),
    ));
    let evaluator = PolicyEvaluator::new(registry.clone());
    let claims = IdentityClaims::for_subject("user-1");

    registry.refresh().await.unwrap();
    assert!(evaluator.evaluate(&claims, "beta").unwrap().is_allowed());

    registry.refresh().await.unwrap();
    let decision = evaluator.evaluate(&claims, "beta").unwrap();
    assert!(!decision.is_allowed());
    assert_eq!(decision.reason(), ReasonCode::FlagNotFound);
    assert_eq!(decision.flag_version(), None);
    assert!(evaluator.evaluate(&claims, "reports").unwrap().is_allowed());
    assert_eq!(registry.snapshot().unwrap().version(), "2");
}

#[tokio::test]
async fn invalid_definitions_evaluate_as_not_found() {
    let source = Arc::new(StaticFlagSource::new(vec![
        flag("beta-api", 1, FlagState::PercentageRollout { percentage: 150 }),
        flag("reports", 1, FlagState::Enabled),
    ]));
    let registry = Arc::new(FlagRegistry::new(
        source,
        RegistryConfig::default(),
        CacheConfig::default(),
    ));
    registry.refresh().await.unwrap();

    let evaluator = PolicyEvaluator::new(registry);
    let claims = ClaimsExtractor::default()
        .extract(&json!({ "sub": "user-1" }))
        .unwrap();
    assert_eq!(
        evaluator.decide(&claims, "beta-api").reason(),
        ReasonCode::FlagNotFound
    );
    assert!(evaluator.decide(&claims, "reports").is_allowed());
}

#[tokio::test(start_paused = true)]
async fn fail_closed_refuses_stale_snapshot_after_failure() {
    let source = Arc::new(StaticFlagSource::new(vec![flag("beta-api", 1, FlagState::Enabled)]));
    let registry = Arc::new(FlagRegistry::new(source.clone(), config(30, false), cache(60)));
    registry.refresh().await.unwrap();

    source.fail_with("registry down");
    assert!(registry.refresh().await.is_err());

    // Still within the TTL: the cached snapshot is served
    assert!(registry.get("beta-api").unwrap().is_some());

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(matches!(
        registry.get("beta-api"),
        Err(GateError::RegistryUnavailable(_))
    ));

    let evaluator = PolicyEvaluator::new(registry.clone());
    let decision = evaluator.decide(&IdentityClaims::for_subject("user-1"), "beta-api");
    assert!(!decision.is_allowed());
    assert_eq!(decision.reason(), ReasonCode::RegistryUnavailable);

    source.recover();
    registry.refresh().await.unwrap();
    assert!(registry.get("beta-api").unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn fail_open_serves_stale_snapshot_after_failure() {
    let source = Arc::new(StaticFlagSource::new(vec![flag("beta-api", 1, FlagState::Enabled)]));
    let registry = FlagRegistry::new(source.clone(), config(30, true), cache(60));
    registry.refresh().await.unwrap();

    source.fail_with("registry down");
    assert!(registry.refresh().await.is_err());
    tokio::time::advance(Duration::from_secs(600)).await;

    assert!(registry.get("beta-api").unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_times_out() {
    let registry = FlagRegistry::new(
        Arc::new(SlowSource),
        RegistryConfig {
            fetch_timeout_ms: 5000,
            ..RegistryConfig::default()
        },
        CacheConfig::default(),
    );

    let err = registry.refresh().await.unwrap_err();
    assert!(matches!(err, GateError::SourceUnavailable(ref msg) if msg.contains("timed out")));
}

#[tokio::test(start_paused = true)]
async fn refresh_task_fetches_immediately_and_on_interval() {
    let source = Arc::new(StaticFlagSource::new(vec![flag("a", 1, FlagState::Enabled)]));
    let registry = Arc::new(FlagRegistry::new(source.clone(), config(30, true), cache(60)));
    let cancel = CancellationToken::new();
    let handle = registry.spawn_refresh_task(cancel.clone());

    settle().await;
    assert!(registry.get("a").unwrap().is_some());
    assert_eq!(source.fetch_count(), 1);

    source.set_flags(vec![flag("b", 1, FlagState::Enabled)]);
    tokio::time::sleep(Duration::from_secs(31)).await;
    settle().await;
    assert!(registry.get("a").unwrap().is_none());
    assert!(registry.get("b").unwrap().is_some());
    assert_eq!(source.fetch_count(), 2);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn refresh_task_backs_off_after_failures() {
    let source = Arc::new(StaticFlagSource::new(vec![flag("a", 1, FlagState::Enabled)]));
    source.fail_with("registry down");
    let registry = Arc::new(FlagRegistry::new(source.clone(), config(30, true), cache(60)));
    let cancel = CancellationToken::new();
    let handle = registry.spawn_refresh_task(cancel.clone());

    settle().await;
    assert_eq!(source.fetch_count(), 1);

    // One failure: next attempt after 60s instead of 30s
    tokio::time::sleep(Duration::from_secs(45)).await;
    assert_eq!(source.fetch_count(), 1);
    tokio::time::sleep(Duration::from_secs(17)).await;
    assert_eq!(source.fetch_count(), 2);

    // Two failures: 120s
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(source.fetch_count(), 2);
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(source.fetch_count(), 3);

    // Cold throughout
    assert!(matches!(
        registry.snapshot(),
        Err(GateError::RegistryUninitialized)
    ));

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stale_read_wakes_refresh_task() {
    let source = Arc::new(StaticFlagSource::new(vec![flag("a", 1, FlagState::Enabled)]));
    let registry = Arc::new(FlagRegistry::new(source.clone(), config(3600, true), cache(60)));
    let cancel = CancellationToken::new();
    let handle = registry.spawn_refresh_task(cancel.clone());

    settle().await;
    source.set_flags(vec![flag("b", 1, FlagState::Enabled)]);
    tokio::time::sleep(Duration::from_secs(61)).await;

    // Served stale without waiting
    assert!(registry.get("a").unwrap().is_some());

    settle().await;
    assert!(registry.get("b").unwrap().is_some());
    assert_eq!(source.fetch_count(), 2);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stale_read_without_refresh_task_is_not_revalidated() {
    let source = Arc::new(StaticFlagSource::new(vec![flag("a", 1, FlagState::Enabled)]));
    let registry = FlagRegistry::new(source.clone(), config(3600, true), cache(60));
    registry.refresh().await.unwrap();

    source.set_flags(vec![flag("b", 1, FlagState::Enabled)]);
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(registry.get("a").unwrap().is_some());

    settle().await;
    assert!(registry.get("b").unwrap().is_none());
    assert_eq!(source.fetch_count(), 1);

    // The caller drives refreshes itself
    registry.refresh().await.unwrap();
    assert!(registry.get("b").unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn invalidate_wakes_refresh_task() {
    let source = Arc::new(StaticFlagSource::new(vec![flag("a", 1, FlagState::Enabled)]));
    let registry = Arc::new(FlagRegistry::new(source.clone(), config(3600, true), cache(60)));
    let cancel = CancellationToken::new();
    let handle = registry.spawn_refresh_task(cancel.clone());

    settle().await;
    source.set_flags(vec![flag("b", 1, FlagState::Enabled)]);
    registry.invalidate();
    settle().await;

    assert!(registry.get("b").unwrap().is_some());
    assert_eq!(source.fetch_count(), 2);

    cancel.cancel();
    handle.await.unwrap();
}
