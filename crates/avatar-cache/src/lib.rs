//! Local avatar cache for committer pages
//!
//! Keeps a directory of avatar images mirrored from a remote image host,
//! bounded by a time-to-live. Two consumers share the core: a scheduled
//! batch reconciler that owns the server-side metadata file, and an
//! opportunistic per-session refresher that pushes newly fetched blobs
//! through a save boundary during normal page visits.

pub mod error;
pub mod fetcher;
pub mod metadata;
pub mod policy;
pub mod reconcile;
pub mod refresher;
pub mod resolver;
pub mod roster;
pub mod types;

pub use error::{AvatarError, Result};
pub use fetcher::{RemoteFetcher, DEFAULT_AVATAR_HOST, DEFAULT_FETCH_TIMEOUT_SECS};
pub use metadata::{FileMetadataStore, MetadataStore, SessionMetadataStore};
pub use policy::{default_ttl, is_stale};
pub use reconcile::{Reconciler, Summary};
pub use refresher::{OpportunisticRefresher, RefresherConfig};
pub use resolver::resolve_url;
pub use roster::{load_roster, parse_roster};
pub use types::{avatar_file_name, CacheEntry, CacheMetadata};
