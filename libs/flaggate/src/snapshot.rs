//! Immutable view of the registry at one point in time.

use crate::flag::FeatureFlag;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;

/// All known flags as of one successful fetch.
///
/// Never mutated after construction; refreshes build a new snapshot and swap it in.
#[derive(Debug, Clone)]
pub struct FlagSnapshot {
    flags: Arc<HashMap<String, Arc<FeatureFlag>>>,
    version: String,
    fetched_at: Instant,
    fetched_at_utc: OffsetDateTime,
}

impl FlagSnapshot {
    /// Build a snapshot from a full flag set, dropping invalid definitions
    #[must_use]
    pub fn from_flags(flags: Vec<FeatureFlag>, version: impl Into<String>) -> Self {
        let mut map = HashMap::with_capacity(flags.len());
        for flag in flags {
            insert_valid(&mut map, flag);
        }
        Self::with_map(map, version.into())
    }

    /// New snapshot with `upserted` replacing or adding flags and `removed` keys dropped
    #[must_use]
    pub fn apply_delta(
        &self,
        upserted: Vec<FeatureFlag>,
        removed: &[String],
        version: impl Into<String>,
    ) -> Self {
        let mut map = (*self.flags).clone();
        for key in removed {
            map.remove(key);
        }
        for flag in upserted {
            insert_valid(&mut map, flag);
        }
        Self::with_map(map, version.into())
    }

    /// Same flags, marked as confirmed fresh now
    #[must_use]
    pub fn refreshed(&self) -> Self {
        Self {
            flags: Arc::clone(&self.flags),
            version: self.version.clone(),
            fetched_at: Instant::now(),
            fetched_at_utc: OffsetDateTime::now_utc(),
        }
    }

    fn with_map(flags: HashMap<String, Arc<FeatureFlag>>, version: String) -> Self {
        Self {
            flags: Arc::new(flags),
            version,
            fetched_at: Instant::now(),
            fetched_at_utc: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Arc<FeatureFlag>> {
        self.flags.get(key)
    }

    /// Registry version this snapshot was built from
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Flags sorted by key
    #[must_use]
    pub fn flags(&self) -> Vec<Arc<FeatureFlag>> {
        let mut flags: Vec<_> = self.flags.values().cloned().collect();
        flags.sort_by(|a, b| a.key.cmp(&b.key));
        flags
    }

    /// Time since the registry last confirmed this content
    #[must_use]
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    #[must_use]
    pub fn fetched_at(&self) -> OffsetDateTime {
        self.fetched_at_utc
    }
}

fn insert_valid(map: &mut HashMap<String, Arc<FeatureFlag>>, flag: FeatureFlag) {
    match flag.validate() {
        Ok(()) => {
            map.insert(flag.key.clone(), Arc::new(flag));
        }
        Err(e) => {
            tracing::warn!(flag = %flag.key, error = %e, "Dropping invalid flag definition");
            map.remove(&flag.key);
        }
    }
}
