//! The key pool: authoritative health and rotation state for all keys.
//!
//! All read-modify-write sequences on key state run under a single pool-wide
//! lock, so a selection cannot hand out a key that a racing failure report is
//! quarantining, and two concurrent failure reports cannot drop an increment.
//! Every operation is non-blocking: `select_key` fails fast with
//! `PoolExhausted` instead of waiting for a key to become eligible.
//!
//! Eligibility is always evaluated against the clock at selection time.
//! The background sweeper ([`sweeper`]) is an optimization; `select_key`
//! performs the same quarantine release lazily.

pub mod key_state;
pub mod sweeper;

pub use key_state::{KeyRecord, KeySnapshot, KeyStatus};

use crate::config::{AppConfig, PoolPolicy};
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

/// The key handed to the dispatcher for one forwarding attempt.
#[derive(Debug, Clone)]
pub struct SelectedKey {
    pub id: String,
    pub credential: SecretString,
}

impl SelectedKey {
    /// Short credential preview safe for logs.
    pub fn credential_preview(&self) -> String {
        crate::config::preview(self.credential.expose_secret())
    }
}

/// Read-only status view of the whole pool, exposed on `/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pool_type: PoolPolicy,
    pub total: usize,
    pub active: usize,
    pub quarantined: usize,
    pub blacklisted: usize,
    pub keys: Vec<KeySnapshot>,
}

/// Owns the set of [`KeyRecord`]s and answers "give me one usable key".
#[derive(Debug)]
pub struct KeyPool {
    records: RwLock<HashMap<String, KeyRecord>>,
    policy: PoolPolicy,
    max_small_retries: u32,
    max_big_retries: u32,
    small_backoff: chrono::Duration,
}

impl KeyPool {
    /// Builds a pool from the configured credential list.
    #[instrument(skip(config), name = "key_pool_init")]
    pub fn from_config(config: &AppConfig) -> Self {
        let mut records = HashMap::new();
        for entry in config.resolved_keys() {
            debug!(
                key.id = %entry.id,
                key.preview = %entry.credential_preview(),
                "Registered key"
            );
            records.insert(
                entry.id.clone(),
                KeyRecord::new(entry.id, entry.credential),
            );
        }

        info!(
            pool.keys = records.len(),
            pool.policy = ?config.pool.pool_type,
            pool.max_small_retries = config.pool.max_small_retries,
            pool.max_big_retries = config.pool.max_big_retries,
            "Key pool initialized"
        );

        Self {
            records: RwLock::new(records),
            policy: config.pool.pool_type,
            max_small_retries: config.pool.max_small_retries,
            max_big_retries: config.pool.max_big_retries,
            small_backoff: config.pool.small_backoff(),
        }
    }

    /// Selects the least-recently-used eligible key.
    ///
    /// Fails fast with [`AppError::PoolExhausted`] when no key qualifies.
    pub fn select_key(&self) -> Result<SelectedKey> {
        self.select_key_excluding(&HashSet::new())
    }

    /// Like [`Self::select_key`], but never returns a key whose id is in
    /// `exclude`. The dispatcher uses this to pick a different key on retry.
    pub fn select_key_excluding(&self, exclude: &HashSet<String>) -> Result<SelectedKey> {
        self.select_key_excluding_at(exclude, Utc::now())
    }

    pub(crate) fn select_key_excluding_at(
        &self,
        exclude: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<SelectedKey> {
        let mut records = self.records.write();

        // Lazy quarantine release, so eligibility reflects the current clock
        // even if the background sweep has not run yet.
        for record in records.values_mut() {
            if record.release_if_due(now) {
                info!(key.id = %record.id, "Quarantine elapsed, key returned to rotation");
            }
        }

        let selected_id = records
            .values()
            .filter(|r| !exclude.contains(&r.id) && self.is_eligible(r, now))
            .min_by(|a, b| {
                // Never-used keys (None) sort first, then oldest use, then
                // lexicographic id for determinism.
                a.last_used_at
                    .cmp(&b.last_used_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|r| r.id.clone());

        let Some(id) = selected_id else {
            debug!("No eligible key in pool");
            return Err(AppError::PoolExhausted);
        };

        // Still under the same lock acquisition as the eligibility check.
        let record = records
            .get_mut(&id)
            .unwrap_or_else(|| unreachable!("selected id came from this map"));
        record.last_used_at = Some(now);

        debug!(key.id = %record.id, "Selected key (least recently used)");
        Ok(SelectedKey {
            id: record.id.clone(),
            credential: record.credential.clone(),
        })
    }

    fn is_eligible(&self, record: &KeyRecord, now: DateTime<Utc>) -> bool {
        match self.policy {
            PoolPolicy::Default => {
                record.status == KeyStatus::Active && record.quarantine_elapsed(now)
            }
            PoolPolicy::NonBlacklist => record.status != KeyStatus::Blacklisted,
        }
    }

    /// Records a successful request: failure counters reset, LRU refreshed.
    pub fn report_success(&self, id: &str) {
        self.report_success_at(id, Utc::now());
    }

    pub(crate) fn report_success_at(&self, id: &str, now: DateTime<Utc>) {
        let mut records = self.records.write();
        let record = Self::record_mut(&mut records, id);
        record.record_success(now);
        debug!(key.id = %id, "Key success reported, failure counters reset");
    }

    /// Records a transient failure (timeout, 5xx). Quarantines the key once
    /// its consecutive small-failure count reaches the configured threshold.
    pub fn report_small_failure(&self, id: &str) {
        self.report_small_failure_at(id, Utc::now());
    }

    pub(crate) fn report_small_failure_at(&self, id: &str, now: DateTime<Utc>) {
        let mut records = self.records.write();
        let record = Self::record_mut(&mut records, id);
        if record.record_small_failure(now, self.max_small_retries, self.small_backoff) {
            warn!(
                key.id = %id,
                quarantine_until = ?record.quarantine_until,
                "Key quarantined after repeated transient failures"
            );
        } else {
            debug!(
                key.id = %id,
                failures = record.small_failures,
                "Transient failure recorded"
            );
        }
    }

    /// Records a severe failure (auth rejection, quota exhaustion).
    /// Blacklists the key once the big-failure threshold is reached.
    pub fn report_big_failure(&self, id: &str) {
        let mut records = self.records.write();
        let record = Self::record_mut(&mut records, id);
        if record.record_big_failure(self.max_big_retries) {
            warn!(key.id = %id, "Key blacklisted after severe failures");
        } else {
            warn!(
                key.id = %id,
                failures = record.big_failures,
                "Severe failure recorded"
            );
        }
    }

    /// Sweep: releases every quarantined key whose window has elapsed.
    /// Returns the number of keys released.
    pub fn release_quarantine_if_due(&self) -> usize {
        self.release_quarantine_if_due_at(Utc::now())
    }

    pub(crate) fn release_quarantine_if_due_at(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records.write();
        let mut released = 0;
        for record in records.values_mut() {
            if record.release_if_due(now) {
                info!(key.id = %record.id, "Quarantine elapsed, key returned to rotation");
                released += 1;
            }
        }
        released
    }

    /// Administrative reset: returns the key, blacklisted or not, to service.
    /// Unknown ids here are operator input, not a bug, so this returns an
    /// error instead of panicking.
    pub fn reset_key(&self, id: &str) -> Result<()> {
        let mut records = self.records.write();
        let record = records.get_mut(id).ok_or_else(|| AppError::KeyNotFound {
            id: id.to_string(),
        })?;
        record.reset();
        info!(key.id = %id, "Key reset to active by administrative request");
        Ok(())
    }

    /// Read-only snapshot for the status surface.
    pub fn snapshot(&self) -> PoolSnapshot {
        let records = self.records.read();
        let mut keys: Vec<KeySnapshot> = records.values().map(KeySnapshot::from).collect();
        keys.sort_by(|a, b| a.id.cmp(&b.id));

        let count = |status: KeyStatus| keys.iter().filter(|k| k.status == status).count();

        PoolSnapshot {
            pool_type: self.policy,
            total: keys.len(),
            active: count(KeyStatus::Active),
            quarantined: count(KeyStatus::Quarantined),
            blacklisted: count(KeyStatus::Blacklisted),
            keys,
        }
    }

    /// An unknown id in a `report_*` call means the dispatcher and pool have
    /// desynchronized. That is a programming error, not a runtime condition,
    /// and must not be silently swallowed.
    fn record_mut<'a>(
        records: &'a mut HashMap<String, KeyRecord>,
        id: &str,
    ) -> &'a mut KeyRecord {
        records.get_mut(id).unwrap_or_else(|| {
            panic!("key '{id}' reported but not present in pool: dispatcher/pool desynchronization")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeyEntrySpec, PoolConfig};

    fn pool_config(policy: PoolPolicy, small: u32, big: u32) -> AppConfig {
        AppConfig {
            keys: vec![
                KeyEntrySpec::Full {
                    id: "a".to_string(),
                    credential: "sk-a".to_string(),
                },
                KeyEntrySpec::Full {
                    id: "b".to_string(),
                    credential: "sk-b".to_string(),
                },
                KeyEntrySpec::Full {
                    id: "c".to_string(),
                    credential: "sk-c".to_string(),
                },
            ],
            pool: PoolConfig {
                pool_type: policy,
                max_small_retries: small,
                max_big_retries: big,
                small_backoff_secs: 60,
                ..PoolConfig::default()
            },
            ..AppConfig::default()
        }
    }

    fn select_id(pool: &KeyPool, now: DateTime<Utc>) -> String {
        pool.select_key_excluding_at(&HashSet::new(), now)
            .unwrap()
            .id
    }

    #[test]
    fn test_selection_is_lru_with_lexicographic_tie_break() {
        let pool = KeyPool::from_config(&pool_config(PoolPolicy::Default, 3, 2));
        let now = Utc::now();

        // All unused: lexicographic order.
        assert_eq!(select_id(&pool, now), "a");
        assert_eq!(select_id(&pool, now + chrono::Duration::seconds(1)), "b");
        assert_eq!(select_id(&pool, now + chrono::Duration::seconds(2)), "c");
        // Wraps back to the least recently used.
        assert_eq!(select_id(&pool, now + chrono::Duration::seconds(3)), "a");
    }

    #[test]
    fn test_quarantine_then_lru_scenario() {
        // Pool of a, b, c with max_small_retries = 2. Two small failures on
        // "a" quarantine it; selection then proceeds b, then c.
        let pool = KeyPool::from_config(&pool_config(PoolPolicy::Default, 2, 2));
        let now = Utc::now();

        assert_eq!(select_id(&pool, now), "a");
        pool.report_small_failure_at("a", now);
        pool.report_small_failure_at("a", now);

        let snap = pool.snapshot();
        assert_eq!(snap.quarantined, 1);

        let next = select_id(&pool, now + chrono::Duration::seconds(1));
        assert_eq!(next, "b");

        pool.report_success_at("b", now + chrono::Duration::seconds(2));
        assert_eq!(select_id(&pool, now + chrono::Duration::seconds(3)), "c");
    }

    #[test]
    fn test_pool_exhausted_when_all_keys_ineligible() {
        let config = AppConfig {
            keys: vec![
                KeyEntrySpec::Full {
                    id: "a".to_string(),
                    credential: "sk-a".to_string(),
                },
                KeyEntrySpec::Full {
                    id: "c".to_string(),
                    credential: "sk-c".to_string(),
                },
            ],
            pool: PoolConfig {
                max_small_retries: 1,
                max_big_retries: 1,
                small_backoff_secs: 60,
                ..PoolConfig::default()
            },
            ..AppConfig::default()
        };
        let pool = KeyPool::from_config(&config);
        let now = Utc::now();

        // One big failure blacklists "c", one small failure quarantines "a".
        pool.report_big_failure("c");
        pool.report_small_failure_at("a", now);

        let result = pool.select_key_excluding_at(&HashSet::new(), now);
        assert!(matches!(result, Err(AppError::PoolExhausted)));
    }

    #[test]
    fn test_selection_never_returns_quarantined_or_blacklisted() {
        let pool = KeyPool::from_config(&pool_config(PoolPolicy::Default, 1, 1));
        let now = Utc::now();

        pool.report_small_failure_at("a", now);
        pool.report_big_failure("b");

        for offset in 0..5 {
            let selected = select_id(&pool, now + chrono::Duration::seconds(offset));
            assert_eq!(selected, "c");
        }
    }

    #[test]
    fn test_quarantined_key_selectable_after_expiry_with_clean_counters() {
        let pool = KeyPool::from_config(&pool_config(PoolPolicy::Default, 1, 2));
        let now = Utc::now();

        pool.report_small_failure_at("a", now);
        pool.report_small_failure_at("b", now);
        pool.report_small_failure_at("c", now);
        assert!(matches!(
            pool.select_key_excluding_at(&HashSet::new(), now),
            Err(AppError::PoolExhausted)
        ));

        // Backoff is 60s; the lazy release inside select_key brings keys back
        // without the sweeper running.
        let later = now + chrono::Duration::seconds(61);
        let selected = select_id(&pool, later);
        assert_eq!(selected, "a");

        let snap = pool.snapshot();
        let rec = snap.keys.iter().find(|k| k.id == "a").unwrap();
        assert_eq!(rec.status, KeyStatus::Active);
        assert_eq!(rec.small_failures, 0);
    }

    #[test]
    fn test_late_failure_report_cleared_when_quarantine_ends() {
        let pool = KeyPool::from_config(&pool_config(PoolPolicy::Default, 2, 2));
        let now = Utc::now();

        pool.report_small_failure_at("a", now);
        pool.report_small_failure_at("a", now);
        // A racing in-flight request reports after the quarantine landed.
        pool.report_small_failure_at("a", now);
        assert_eq!(pool.snapshot().quarantined, 1);

        // Once the window elapses the key is selectable with counters at 0,
        // so a single new failure cannot immediately re-quarantine it.
        let later = now + chrono::Duration::seconds(61);
        pool.report_success_at("b", now);
        pool.report_success_at("c", now);
        assert_eq!(select_id(&pool, later), "a");

        let snap = pool.snapshot();
        let rec = snap.keys.iter().find(|k| k.id == "a").unwrap();
        assert_eq!(rec.status, KeyStatus::Active);
        assert_eq!(rec.small_failures, 0);

        pool.report_small_failure_at("a", later);
        let snap = pool.snapshot();
        let rec = snap.keys.iter().find(|k| k.id == "a").unwrap();
        assert_eq!(rec.status, KeyStatus::Active);
    }

    #[test]
    fn test_release_sweep_counts_transitions() {
        let pool = KeyPool::from_config(&pool_config(PoolPolicy::Default, 1, 2));
        let now = Utc::now();

        pool.report_small_failure_at("a", now);
        pool.report_small_failure_at("b", now);

        assert_eq!(pool.release_quarantine_if_due_at(now), 0);
        assert_eq!(
            pool.release_quarantine_if_due_at(now + chrono::Duration::seconds(61)),
            2
        );
        assert_eq!(pool.snapshot().active, 3);
    }

    #[test]
    fn test_non_blacklist_policy_admits_quarantined_keys() {
        let pool = KeyPool::from_config(&pool_config(PoolPolicy::NonBlacklist, 1, 1));
        let now = Utc::now();

        pool.report_small_failure_at("a", now);
        pool.report_big_failure("b");
        pool.report_small_failure_at("c", now);

        // a and c are quarantined but the policy ignores cooldowns; only the
        // blacklisted b is excluded.
        let mut seen = HashSet::new();
        for offset in 0..4 {
            seen.insert(select_id(&pool, now + chrono::Duration::seconds(offset)));
        }
        assert!(seen.contains("a"));
        assert!(seen.contains("c"));
        assert!(!seen.contains("b"));
    }

    #[test]
    fn test_exclusion_forces_a_different_key() {
        let pool = KeyPool::from_config(&pool_config(PoolPolicy::Default, 3, 2));
        let now = Utc::now();

        let first = pool
            .select_key_excluding_at(&HashSet::new(), now)
            .unwrap()
            .id;
        let mut exclude = HashSet::new();
        exclude.insert(first.clone());

        let second = pool
            .select_key_excluding_at(&exclude, now + chrono::Duration::seconds(1))
            .unwrap()
            .id;
        assert_ne!(first, second);
    }

    #[test]
    fn test_reset_key_restores_blacklisted_key() {
        let pool = KeyPool::from_config(&pool_config(PoolPolicy::Default, 2, 1));
        pool.report_big_failure("a");
        assert_eq!(pool.snapshot().blacklisted, 1);

        pool.reset_key("a").unwrap();
        let snap = pool.snapshot();
        assert_eq!(snap.blacklisted, 0);
        assert_eq!(snap.active, 3);
    }

    #[test]
    fn test_reset_unknown_key_returns_not_found() {
        let pool = KeyPool::from_config(&pool_config(PoolPolicy::Default, 2, 1));
        let err = pool.reset_key("nope").unwrap_err();
        assert!(matches!(err, AppError::KeyNotFound { .. }));
    }

    #[test]
    #[should_panic(expected = "desynchronization")]
    fn test_report_on_unknown_key_panics() {
        let pool = KeyPool::from_config(&pool_config(PoolPolicy::Default, 2, 1));
        pool.report_success("ghost");
    }

    #[test]
    fn test_snapshot_counts_and_ordering() {
        let pool = KeyPool::from_config(&pool_config(PoolPolicy::Default, 1, 1));
        let now = Utc::now();
        pool.report_small_failure_at("b", now);
        pool.report_big_failure("c");

        let snap = pool.snapshot();
        assert_eq!(snap.total, 3);
        assert_eq!(snap.active, 1);
        assert_eq!(snap.quarantined, 1);
        assert_eq!(snap.blacklisted, 1);
        let ids: Vec<_> = snap.keys.iter().map(|k| k.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
