//! Error types for the avatar cache

use std::fmt;

#[derive(Debug)]
pub enum AvatarError {
    /// A redirect response arrived without a usable Location header
    Redirect(String),
    /// The final response status was not 200
    Http(u16),
    /// The fetch exceeded its time bound
    Timeout(String),
    /// Transport-level failure
    Network(Box<reqwest::Error>),
    /// Write or rename failure in the avatar directory
    Storage(Box<std::io::Error>),
    /// Unparsable persisted metadata (recovered by reset, never propagated)
    Metadata(String),
    Config(String),
}

impl fmt::Display for AvatarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvatarError::Redirect(msg) => write!(f, "Redirect error: {}", msg),
            AvatarError::Http(status) => write!(f, "HTTP error: status {}", status),
            AvatarError::Timeout(msg) => write!(f, "Timeout error: {}", msg),
            AvatarError::Network(err) => write!(f, "Network error: {}", err),
            AvatarError::Storage(err) => write!(f, "Storage error: {}", err),
            AvatarError::Metadata(msg) => write!(f, "Metadata error: {}", msg),
            AvatarError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AvatarError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AvatarError::Network(err) => Some(err.as_ref()),
            AvatarError::Storage(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AvatarError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AvatarError::Timeout(err.to_string())
        } else {
            AvatarError::Network(Box::new(err))
        }
    }
}

impl From<std::io::Error> for AvatarError {
    fn from(err: std::io::Error) -> Self {
        AvatarError::Storage(Box::new(err))
    }
}

impl From<serde_json::Error> for AvatarError {
    fn from(err: serde_json::Error) -> Self {
        AvatarError::Metadata(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AvatarError>;
