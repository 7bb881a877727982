// src/pool/key_state.rs

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Health state of a single API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Eligible for selection once any quarantine window has elapsed.
    Active,
    /// Temporarily excluded after repeated transient failures.
    Quarantined,
    /// Permanently excluded after repeated severe failures. Terminal absent
    /// an explicit administrative reset.
    Blacklisted,
}

/// One credential in the pool, with its rotation and health bookkeeping.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub id: String,
    pub credential: SecretString,
    pub status: KeyStatus,
    /// Consecutive transient failures (timeouts, 5xx) since last success.
    pub small_failures: u32,
    /// Consecutive severe failures (auth rejection, quota) since last success.
    pub big_failures: u32,
    /// Ineligible while `now < quarantine_until`.
    pub quarantine_until: Option<DateTime<Utc>>,
    /// Least-recently-used ordering for fair rotation.
    pub last_used_at: Option<DateTime<Utc>>,
}

impl KeyRecord {
    pub fn new(id: String, credential: SecretString) -> Self {
        Self {
            id,
            credential,
            status: KeyStatus::Active,
            small_failures: 0,
            big_failures: 0,
            quarantine_until: None,
            last_used_at: None,
        }
    }

    /// Whether the quarantine window, if any, has elapsed at `now`.
    pub fn quarantine_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.quarantine_until.map_or(true, |until| now >= until)
    }

    /// Records a successful request: both failure tracks reset.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.small_failures = 0;
        self.big_failures = 0;
        self.last_used_at = Some(now);
    }

    /// Records a transient failure. Returns `true` if the key was quarantined
    /// by this report.
    ///
    /// The small-failure counter resets on quarantine: the cooldown itself is
    /// the penalty, and a released key starts with a clean slate.
    pub fn record_small_failure(
        &mut self,
        now: DateTime<Utc>,
        max_small_retries: u32,
        backoff: chrono::Duration,
    ) -> bool {
        self.small_failures += 1;
        if self.small_failures >= max_small_retries && self.status == KeyStatus::Active {
            self.status = KeyStatus::Quarantined;
            self.quarantine_until = Some(now + backoff);
            self.small_failures = 0;
            return true;
        }
        false
    }

    /// Records a severe failure. Returns `true` if the key was blacklisted by
    /// this report.
    pub fn record_big_failure(&mut self, max_big_retries: u32) -> bool {
        self.big_failures += 1;
        if self.big_failures >= max_big_retries && self.status != KeyStatus::Blacklisted {
            self.status = KeyStatus::Blacklisted;
            return true;
        }
        false
    }

    /// Releases the key from quarantine if its window has elapsed.
    /// Returns `true` on transition.
    pub fn release_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == KeyStatus::Quarantined && self.quarantine_elapsed(now) {
            self.status = KeyStatus::Active;
            self.quarantine_until = None;
            // An in-flight request may have reported another failure while
            // the key sat in quarantine; a released key starts clean.
            self.small_failures = 0;
            return true;
        }
        false
    }

    /// Administrative reset: returns any key, including a blacklisted one,
    /// to service with clean counters.
    pub fn reset(&mut self) {
        self.status = KeyStatus::Active;
        self.small_failures = 0;
        self.big_failures = 0;
        self.quarantine_until = None;
    }
}

/// Read-only view of one key for the status surface. Carries no credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySnapshot {
    pub id: String,
    pub status: KeyStatus,
    pub small_failures: u32,
    pub big_failures: u32,
    pub quarantine_until: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<&KeyRecord> for KeySnapshot {
    fn from(record: &KeyRecord) -> Self {
        Self {
            id: record.id.clone(),
            status: record.status,
            small_failures: record.small_failures,
            big_failures: record.big_failures,
            quarantine_until: record.quarantine_until,
            last_used_at: record.last_used_at,
        }
    }
}
