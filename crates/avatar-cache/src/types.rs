//! Core types for the avatar cache

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata for one cached avatar
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub last_updated: DateTime<Utc>,
    /// Relative file name inside the avatar directory, `<key>.png`
    pub path: String,
}

impl CacheEntry {
    pub fn new(key: &str, last_updated: DateTime<Utc>) -> Self {
        Self {
            last_updated,
            path: avatar_file_name(key),
        }
    }
}

/// The persisted metadata document.
///
/// The same shape backs two independent stores: the server-side file owned
/// by the batch reconciler (uses `lastRun`) and the per-session view owned
/// by the opportunistic refresher (uses `lastClientCheck`). The two views
/// are never merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_client_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub avatars: HashMap<String, CacheEntry>,
}

impl CacheMetadata {
    /// Record a successful refresh for a key, keeping `lastUpdated`
    /// monotonically non-decreasing.
    pub fn record_refresh(&mut self, key: &str, at: DateTime<Utc>) {
        let at = match self.avatars.get(key) {
            Some(existing) if existing.last_updated > at => existing.last_updated,
            _ => at,
        };
        self.avatars.insert(key.to_string(), CacheEntry::new(key, at));
    }
}

/// Derived storage name for a key, always `<key>.png`
pub fn avatar_file_name(key: &str) -> String {
    format!("{}.png", key)
}
