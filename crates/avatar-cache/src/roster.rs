//! Roster loading
//!
//! The roster is a structured data import: a JSON array of identity
//! keys, or of records carrying a `username` field. Order is preserved.

use crate::error::{AvatarError, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

#[derive(Deserialize)]
#[serde(untagged)]
enum RosterItem {
    Key(String),
    Record { username: String },
}

/// Parse a roster document into an ordered list of identity keys.
pub fn parse_roster(json: &str) -> Result<Vec<String>> {
    let items: Vec<RosterItem> = serde_json::from_str(json)
        .map_err(|e| AvatarError::Config(format!("invalid roster: {}", e)))?;

    Ok(items
        .into_iter()
        .map(|item| match item {
            RosterItem::Key(key) => key,
            RosterItem::Record { username } => username,
        })
        .collect())
}

/// Read and parse a roster file.
pub async fn load_roster(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .await
        .map_err(|e| AvatarError::Config(format!("cannot read roster {:?}: {}", path, e)))?;
    parse_roster(&raw)
}
