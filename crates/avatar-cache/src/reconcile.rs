//! Batch reconciliation of the roster against the avatar directory
//!
//! One pass loads the server-side metadata, refreshes every stale or
//! missing avatar concurrently, and persists the updated metadata with a
//! single atomic write. A failing key is counted and logged, never fatal.

use crate::error::Result;
use crate::fetcher::RemoteFetcher;
use crate::metadata::{FileMetadataStore, MetadataStore};
use crate::policy::is_stale;
use crate::types::avatar_file_name;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

/// Outcome counts for one reconciliation pass
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Summary {
    pub total: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Outcome {
    Downloaded(DateTime<Utc>),
    Skipped,
    Failed,
}

pub struct Reconciler {
    fetcher: Arc<RemoteFetcher>,
    store: FileMetadataStore,
    avatar_dir: PathBuf,
    ttl: Duration,
}

impl Reconciler {
    pub fn new(
        fetcher: RemoteFetcher,
        store: FileMetadataStore,
        avatar_dir: impl Into<PathBuf>,
        ttl: Duration,
    ) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            store,
            avatar_dir: avatar_dir.into(),
            ttl,
        }
    }

    /// Reconcile the roster against the cache directory.
    ///
    /// Per-key work runs concurrently; the metadata map is only touched
    /// after all tasks have joined, then persisted once.
    pub async fn reconcile(&self, roster: &[String], force: bool) -> Result<Summary> {
        let mut meta = self.store.load().await;
        fs::create_dir_all(&self.avatar_dir).await?;

        let tasks: Vec<_> = roster
            .iter()
            .map(|key| {
                let key = key.clone();
                let entry = meta.avatars.get(&key).cloned();
                let fetcher = self.fetcher.clone();
                let dest = self.avatar_dir.join(avatar_file_name(&key));
                let ttl = self.ttl;

                tokio::spawn(async move {
                    let file_present = fs::try_exists(&dest).await.unwrap_or(false);
                    // An entry without its backing file counts as absent,
                    // so metadata/storage divergence self-heals.
                    let effective = if file_present { entry.as_ref() } else { None };

                    if !is_stale(effective, Utc::now(), force, ttl) {
                        return (key, Outcome::Skipped);
                    }

                    match fetcher.fetch_to_file(&key, &dest).await {
                        Ok(()) => (key, Outcome::Downloaded(Utc::now())),
                        Err(e) => {
                            warn!(key = %key, error = %e, "Avatar refresh failed");
                            (key, Outcome::Failed)
                        }
                    }
                })
            })
            .collect();

        let mut summary = Summary {
            total: roster.len(),
            ..Summary::default()
        };

        for joined in join_all(tasks).await {
            let (key, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Avatar refresh task panicked");
                    summary.failed += 1;
                    continue;
                }
            };
            match outcome {
                Outcome::Downloaded(at) => {
                    meta.record_refresh(&key, at);
                    summary.downloaded += 1;
                }
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Failed => summary.failed += 1,
            }
        }

        meta.last_run = Some(Utc::now());
        self.store.save(&meta).await?;

        info!(
            total = summary.total,
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            "Reconcile pass complete"
        );
        Ok(summary)
    }
}
