//! Activity collection persistence.
//!
//! The whole collection lives as one JSON array under a single key of the
//! durable key-value store. Reads never fail: missing or unreadable data comes
//! back as an empty collection. A failed write prunes records older than the
//! configured age so that the next write has room; the failed write itself is
//! not retried.

use crate::clock::Clock;
use crate::db::Database;
use crate::errors::AppError;
use crate::models::{Activity, AppSettings};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaveStatus {
    Saved,
    Failed,
}

impl SaveStatus {
    pub fn is_saved(self) -> bool {
        matches!(self, Self::Saved)
    }
}

struct CachedCollection {
    key: String,
    loaded_at: Instant,
    activities: Vec<Activity>,
}

pub struct ActivityStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    cache: Mutex<Option<CachedCollection>>,
}

impl ActivityStore {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            cache: Mutex::new(None),
        }
    }

    pub fn load(&self) -> Vec<Activity> {
        let settings = self.settings();
        let ttl = Duration::from_secs(settings.cache_ttl_secs);

        if let Some(cached) = self.cache_slot().as_ref() {
            if cached.key == settings.collection_key && cached.loaded_at.elapsed() < ttl {
                return cached.activities.clone();
            }
        }

        let activities = match self.db.get_value(&settings.collection_key) {
            Ok(Some(raw)) => decode_collection(&raw),
            Ok(None) => Vec::new(),
            Err(error) => {
                tracing::warn!(error = %error, "activity collection read failed; using empty collection");
                return Vec::new();
            }
        };

        if !ttl.is_zero() {
            *self.cache_slot() = Some(CachedCollection {
                key: settings.collection_key,
                loaded_at: Instant::now(),
                activities: activities.clone(),
            });
        }
        activities
    }

    pub fn save(&self, activities: &[Activity]) -> SaveStatus {
        let settings = self.settings();
        let result = serde_json::to_string(activities)
            .map_err(AppError::from)
            .and_then(|raw| {
                self.db
                    .put_value(&settings.collection_key, &raw, settings.storage_quota_bytes)
            });

        match result {
            Ok(()) => {
                *self.cache_slot() = Some(CachedCollection {
                    key: settings.collection_key,
                    loaded_at: Instant::now(),
                    activities: activities.to_vec(),
                });
                tracing::debug!(count = activities.len(), "activity collection saved");
                SaveStatus::Saved
            }
            Err(error) => {
                self.invalidate();
                tracing::warn!(error = %error, count = activities.len(), "activity collection save failed");
                let pruned = self.prune_stale(&settings);
                if pruned > 0 {
                    tracing::info!(pruned, "pruned stale activities after failed save");
                }
                SaveStatus::Failed
            }
        }
    }

    pub fn invalidate(&self) {
        *self.cache_slot() = None;
    }

    /// Drops stored activities older than `prune_after_days`. Returns how many
    /// were removed from the stored collection.
    fn prune_stale(&self, settings: &AppSettings) -> usize {
        let stored = match self.db.get_value(&settings.collection_key) {
            Ok(Some(raw)) => decode_collection(&raw),
            Ok(None) => return 0,
            Err(error) => {
                tracing::warn!(error = %error, "could not read collection for pruning");
                return 0;
            }
        };

        let cutoff = self.clock.now() - chrono::Duration::days(i64::from(settings.prune_after_days));
        let before = stored.len();
        let kept = stored
            .into_iter()
            .filter(|activity| activity.instant().map(|at| at >= cutoff).unwrap_or(false))
            .collect::<Vec<_>>();
        let pruned = before - kept.len();
        if pruned == 0 {
            return 0;
        }

        let written = serde_json::to_string(&kept)
            .map_err(AppError::from)
            .and_then(|raw| {
                self.db
                    .put_value(&settings.collection_key, &raw, settings.storage_quota_bytes)
            });
        match written {
            Ok(()) => pruned,
            Err(error) => {
                tracing::warn!(error = %error, "writing pruned collection failed");
                0
            }
        }
    }

    fn settings(&self) -> AppSettings {
        self.db.get_settings().unwrap_or_else(|error| {
            tracing::warn!(error = %error, "settings read failed; using defaults");
            AppSettings::default()
        })
    }

    fn cache_slot(&self) -> MutexGuard<'_, Option<CachedCollection>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Decodes a stored collection. Records that do not decode are skipped; a
/// value that is not an array yields an empty collection.
pub fn decode_collection(raw: &str) -> Vec<Activity> {
    let values = match serde_json::from_str::<Vec<serde_json::Value>>(raw) {
        Ok(values) => values,
        Err(error) => {
            tracing::warn!(error = %error, "stored activity collection is malformed; using empty collection");
            return Vec::new();
        }
    };

    values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<Activity>(value) {
            Ok(activity) => Some(activity),
            Err(error) => {
                tracing::warn!(index, error = %error, "skipping unreadable activity record");
                None
            }
        })
        .collect()
}
