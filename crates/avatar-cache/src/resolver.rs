//! Display URL resolution for cached avatars

use crate::types::{avatar_file_name, CacheMetadata};
use chrono::Utc;

/// Derive the relative display URL for a key's cached avatar.
///
/// When a session metadata view is available the URL carries a
/// cache-busting `ts` parameter, the key's last refresh time (falling
/// back to now for unknown keys). Total: unknown keys still resolve to a
/// well-formed URL and the rendering layer handles the missing-image
/// fallback.
pub fn resolve_url(avatar_dir: &str, key: &str, session: Option<&CacheMetadata>) -> String {
    let base = format!("{}/{}", avatar_dir.trim_end_matches('/'), avatar_file_name(key));

    match session {
        Some(meta) => {
            let ts = meta
                .avatars
                .get(key)
                .map(|entry| entry.last_updated)
                .unwrap_or_else(Utc::now);
            format!("{}?ts={}", base, ts.timestamp())
        }
        None => base,
    }
}
