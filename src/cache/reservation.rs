//! Reservation and failure marker records

use crate::cache::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

/// Single-flight lock of a fingerprint, created with create-if-absent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub fingerprint: Fingerprint,
    /// Owner id, also the id of the worker launched for it
    pub owner: Uuid,
    pub created_at: DateTime<Utc>,
    pub max_lifetime_secs: u64,
}

impl Reservation {
    /// New reservation owned by a fresh id
    pub fn new(fingerprint: Fingerprint, max_lifetime: Duration) -> Self {
        Self {
            fingerprint,
            owner: Uuid::new_v4(),
            created_at: Utc::now(),
            max_lifetime_secs: max_lifetime.as_secs(),
        }
    }

    /// Time after which the reservation may be reclaimed
    pub fn expires_at(&self, grace: Duration) -> DateTime<Utc> {
        // Capped so absurd lifetimes cannot overflow the timestamp
        let ttl = self
            .max_lifetime_secs
            .saturating_add(grace.as_secs())
            .min(MAX_TTL_SECS);
        self.created_at
            .checked_add_signed(chrono::Duration::seconds(ttl as i64))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Older than `maxLifetime + grace` at `now`
    pub fn is_stale(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        now > self.expires_at(grace)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }
}

/// Written by a worker whose build failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureMarker {
    /// Owner of the reservation the failed build ran under
    pub owner: Uuid,
    pub summary: String,
    /// Tail of the build output
    pub diagnostic: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureMarker {
    pub fn new(owner: Uuid, summary: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            owner,
            summary: summary.into(),
            diagnostic: diagnostic.into(),
            failed_at: Utc::now(),
        }
    }
}
