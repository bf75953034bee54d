//! Error types for llamatray.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single status fetch against the daemon.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection refused, DNS failure or timeout.
    #[error("Network error: {0}")]
    Network(String),

    /// Body was present but not valid JSON.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Unexpected transport failure (bad status, unreadable body).
    #[error("Process error: {0}")]
    Process(String),
}

/// Serializable discriminant of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchErrorKind {
    Network,
    Parse,
    Process,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Network(_) => FetchErrorKind::Network,
            FetchError::Parse(_) => FetchErrorKind::Parse,
            FetchError::Process(_) => FetchErrorKind::Process,
        }
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            FetchError::Network(m) | FetchError::Parse(m) | FetchError::Process(m) => m,
        }
    }
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchErrorKind::Network => write!(f, "network"),
            FetchErrorKind::Parse => write!(f, "parse"),
            FetchErrorKind::Process => write!(f, "process"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
