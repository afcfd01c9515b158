//! Opportunistic per-session avatar refresh
//!
//! Runs in a page-visit context: at most once per session, at most once
//! per cooldown window across sessions, deferred so it never competes
//! with initial rendering. Stale avatars are fetched client-side and
//! pushed through the save boundary; the server-side handler owns the
//! shared storage.

use crate::error::{AvatarError, Result};
use crate::fetcher::RemoteFetcher;
use crate::metadata::MetadataStore;
use crate::policy::{default_ttl, is_stale};
use crate::types::avatar_file_name;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_COOLDOWN_HOURS: i64 = 24;
pub const DEFAULT_START_DELAY_SECS: u64 = 2;

/// Tunables for the refresher; defaults match production behavior.
#[derive(Debug, Clone)]
pub struct RefresherConfig {
    /// Save-boundary endpoint accepting multipart avatar uploads
    pub save_url: String,
    /// Minimum interval between checks across page loads
    pub cooldown: ChronoDuration,
    /// Delay before any network activity starts
    pub start_delay: Duration,
    /// Staleness bound, shared with the batch variant
    pub ttl: ChronoDuration,
}

impl RefresherConfig {
    pub fn new(save_url: impl Into<String>) -> Self {
        Self {
            save_url: save_url.into(),
            cooldown: ChronoDuration::hours(DEFAULT_COOLDOWN_HOURS),
            start_delay: Duration::from_secs(DEFAULT_START_DELAY_SECS),
            ttl: default_ttl(),
        }
    }
}

/// One page-visit refresher. The run-at-most-once flag is owned by the
/// instance, so independent contexts never leak state into each other.
pub struct OpportunisticRefresher<S: MetadataStore> {
    store: Option<S>,
    fetcher: RemoteFetcher,
    client: reqwest::Client,
    config: RefresherConfig,
    checked: bool,
}

impl<S: MetadataStore> OpportunisticRefresher<S> {
    /// `store` is `None` when no client-side storage context is available
    /// (e.g. a non-interactive render); the refresher is then a no-op.
    pub fn new(store: Option<S>, fetcher: RemoteFetcher, config: RefresherConfig) -> Self {
        Self {
            store,
            fetcher,
            client: reqwest::Client::new(),
            config,
            checked: false,
        }
    }

    /// Check the roster and refresh stale avatars through the save
    /// boundary. Invoked once per page view; later calls on the same
    /// instance are no-ops.
    pub async fn check_and_update(&mut self, roster: &[String]) {
        if self.checked {
            debug!("Avatar check already ran this session");
            return;
        }
        self.checked = true;

        let Some(store) = &self.store else {
            debug!("No client storage context, skipping avatar check");
            return;
        };

        let mut meta = store.load().await;
        let now = Utc::now();
        if let Some(last) = meta.last_client_check {
            if now - last < self.config.cooldown {
                debug!(last_check = %last, "Within avatar check cooldown");
                return;
            }
        }

        // Claim the window before any network activity, so overlapping
        // page loads do not both start refreshing.
        meta.last_client_check = Some(now);
        if let Err(e) = store.save(&meta).await {
            warn!(error = %e, "Failed to record client check time");
        }

        tokio::time::sleep(self.config.start_delay).await;

        // Strictly sequential: one outbound fetch/save at a time.
        for key in roster {
            if !is_stale(meta.avatars.get(key), Utc::now(), false, self.config.ttl) {
                continue;
            }

            match self.refresh_one(key).await {
                Ok(()) => {
                    meta.record_refresh(key, Utc::now());
                    if let Err(e) = store.save(&meta).await {
                        warn!(key = %key, error = %e, "Failed to save session metadata");
                    }
                    info!(key = %key, "Avatar refreshed via save boundary");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Client avatar refresh failed");
                }
            }
        }
    }

    /// Fetch one avatar from the remote host and submit it to the save
    /// boundary.
    async fn refresh_one(&self, key: &str) -> Result<()> {
        let data = self.fetcher.fetch_bytes(key).await?;

        let part = reqwest::multipart::Part::bytes(data)
            .file_name(avatar_file_name(key))
            .mime_str("image/png")
            .map_err(|e| AvatarError::Config(format!("invalid mime type: {}", e)))?;
        let form = reqwest::multipart::Form::new()
            .text("username", key.to_string())
            .part("avatar", part);

        let response = self
            .client
            .post(&self.config.save_url)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AvatarError::Http(status.as_u16()));
        }
        Ok(())
    }
}
