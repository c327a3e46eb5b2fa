//! Deterministic rollout bucketing.
//!
//! A subject lands in a bucket in `[0, 100)` derived from a stable hash of
//! `(subject id, flag key, seed)`. The seed is the flag version (or its bucket
//! epoch), so buckets only move when the flag definition is deliberately
//! changed. xxh3 output is stable across platforms and releases.

use xxhash_rust::xxh3::xxh3_64;

/// Number of rollout buckets
pub const BUCKETS: u64 = 100;

/// Bucket of `subject` for `flag_key` under `seed`
#[must_use]
pub fn rollout_bucket(subject: &str, flag_key: &str, seed: u64) -> u8 {
    let mut input = Vec::with_capacity(subject.len() + flag_key.len() + 10);
    input.extend_from_slice(subject.as_bytes());
    input.push(0);
    input.extend_from_slice(flag_key.as_bytes());
    input.push(0);
    input.extend_from_slice(&seed.to_le_bytes());

    let bucket = xxh3_64(&input) % BUCKETS;
    // BUCKETS fits in u8
    u8::try_from(bucket).unwrap_or(u8::MAX)
}

/// Whether `subject` is inside a rollout of `percentage` percent
#[must_use]
pub fn in_rollout(subject: &str, flag_key: &str, seed: u64, percentage: u8) -> bool {
    rollout_bucket(subject, flag_key, seed) < percentage
}
