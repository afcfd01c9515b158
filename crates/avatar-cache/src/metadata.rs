//! Metadata stores: server-side file and session-scoped view
//!
//! The batch reconciler and the client refresher each own their own view
//! of the cache metadata. Both views share one schema and one interface
//! contract but persist in different places with different guarantees, so
//! they stay separate types and are never merged.

use crate::error::Result;
use crate::types::CacheMetadata;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tracing::{debug, warn};

#[allow(async_fn_in_trait)]
pub trait MetadataStore {
    /// Load the current metadata view. Absent or malformed content resets
    /// to an empty document; this never fails.
    async fn load(&self) -> CacheMetadata;

    /// Persist the full metadata view, replacing the previous one.
    async fn save(&self, meta: &CacheMetadata) -> Result<()>;
}

/// Server-side metadata file, exclusively owned by the batch reconciler
/// and updated by the save boundary when client-driven writes occur.
pub struct FileMetadataStore {
    path: PathBuf,
}

impl FileMetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetadataStore for FileMetadataStore {
    async fn load(&self) -> CacheMetadata {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = ?self.path, error = %e, "No metadata file, starting empty");
                return CacheMetadata::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Corrupt metadata file, resetting");
                CacheMetadata::default()
            }
        }
    }

    async fn save(&self, meta: &CacheMetadata) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so a crash never leaves a torn file and a
        // concurrent save-boundary write never interleaves with ours.
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(meta)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!(path = ?self.path, entries = meta.avatars.len(), "Saved metadata");
        Ok(())
    }
}

/// Session-scoped metadata view, the analogue of browser-local storage:
/// one JSON string slot under the logical key `avatar_metadata`, scoped to
/// a single page-visit context.
#[derive(Default)]
pub struct SessionMetadataStore {
    slot: Mutex<Option<String>>,
}

impl SessionMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the slot with raw content, as a pre-existing session would have.
    pub fn with_raw(raw: &str) -> Self {
        Self {
            slot: Mutex::new(Some(raw.to_string())),
        }
    }
}

impl MetadataStore for SessionMetadataStore {
    async fn load(&self) -> CacheMetadata {
        let raw = self.slot.lock().expect("session slot poisoned").clone();
        match raw {
            None => CacheMetadata::default(),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(error = %e, "Corrupt session metadata, resetting");
                    CacheMetadata::default()
                }
            },
        }
    }

    async fn save(&self, meta: &CacheMetadata) -> Result<()> {
        let json = serde_json::to_string(meta)?;
        *self.slot.lock().expect("session slot poisoned") = Some(json);
        Ok(())
    }
}
