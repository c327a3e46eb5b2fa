use super::{FetchOutcome, FlagSource, SourceError};
use crate::flag::FeatureFlag;
use async_trait::async_trait;
use parking_lot::Mutex;

/// In-memory flag source.
///
/// Useful for embedding a fixed flag set and for tests: the flag set can be
/// replaced at runtime and failures can be injected.
#[derive(Debug, Default)]
pub struct StaticFlagSource {
    state: Mutex<StaticState>,
}

#[derive(Debug, Default)]
struct StaticState {
    flags: Vec<FeatureFlag>,
    generation: u64,
    failure: Option<String>,
    fetches: usize,
}

impl StaticFlagSource {
    #[must_use]
    pub fn new(flags: Vec<FeatureFlag>) -> Self {
        Self {
            state: Mutex::new(StaticState {
                flags,
                generation: 1,
                failure: None,
                fetches: 0,
            }),
        }
    }

    /// Replace the flag set; the next fetch returns it under a new version
    pub fn set_flags(&self, flags: Vec<FeatureFlag>) {
        let mut state = self.state.lock();
        state.flags = flags;
        state.generation += 1;
    }

    /// Make every fetch fail until [`recover`](Self::recover) is called
    pub fn fail_with(&self, message: impl Into<String>) {
        self.state.lock().failure = Some(message.into());
    }

    pub fn recover(&self) {
        self.state.lock().failure = None;
    }

    /// Number of fetches served so far, failed ones included
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetches
    }
}

#[async_trait]
impl FlagSource for StaticFlagSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn fetch_flags(&self, since: Option<&str>) -> Result<FetchOutcome, SourceError> {
        let mut state = self.state.lock();
        state.fetches += 1;

        if let Some(message) = &state.failure {
            return Err(SourceError::Transport(message.clone()));
        }

        let version = state.generation.to_string();
        if since == Some(version.as_str()) {
            return Ok(FetchOutcome::NotModified);
        }

        Ok(FetchOutcome::Full {
            flags: state.flags.clone(),
            version,
        })
    }
}
