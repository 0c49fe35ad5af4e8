use crate::dispatch::EventKind;
use thiserror::Error;

/// Errors surfaced by the feed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    /// Listing or upload request rejected, or answered with a non-OK status
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Element-level load or decode failure
    #[error("Playback failed for item {index}: {reason}")]
    MediaPlaybackFailure { index: usize, reason: String },

    #[error("No handler bound for {kind:?} on item {index}")]
    Unbound { index: usize, kind: EventKind },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for FeedError {
    fn from(e: config::ConfigError) -> Self {
        FeedError::Config(e.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        FeedError::NetworkFailure(e.to_string())
    }
}
