use std::time::Duration;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaError {
    #[error("no source assigned")]
    NoSource,

    #[error("playback rejected: {0}")]
    Rejected(String),
}

/// The playable element behind one feed item.
///
/// Mirrors the small slice of a video element the feed needs; the controller
/// never inspects anything else.
pub trait MediaElement {
    fn set_source(&mut self, url: &str);
    fn clear_source(&mut self);
    fn source(&self) -> Option<&str>;
    /// Restart loading of the current source
    fn load(&mut self);
    fn play(&mut self) -> Result<(), MediaError>;
    fn pause(&mut self);
    fn is_paused(&self) -> bool;
    fn set_muted(&mut self, muted: bool);
    fn is_muted(&self) -> bool;
    fn seek_to_start(&mut self);
    fn position(&self) -> Duration;
}

/// In-process media element with no decoder behind it.
///
/// Tracks the playhead so a host can drive time forward with [`advance`].
///
/// [`advance`]: HeadlessMedia::advance
#[derive(Debug, Clone)]
pub struct HeadlessMedia {
    source: Option<String>,
    paused: bool,
    muted: bool,
    position: Duration,
    loads: u32,
}

impl Default for HeadlessMedia {
    fn default() -> Self {
        Self {
            source: None,
            paused: true,
            muted: true,
            position: Duration::ZERO,
            loads: 0,
        }
    }
}

impl HeadlessMedia {
    /// Move the playhead forward if playing
    pub fn advance(&mut self, by: Duration) {
        if !self.paused {
            self.position += by;
        }
    }

    /// Number of explicit reloads
    pub fn loads(&self) -> u32 {
        self.loads
    }
}

impl MediaElement for HeadlessMedia {
    fn set_source(&mut self, url: &str) {
        trace!(url = %url, "set source");
        self.source = Some(url.to_string());
        self.position = Duration::ZERO;
    }

    fn clear_source(&mut self) {
        trace!("clear source");
        self.source = None;
        self.paused = true;
        self.position = Duration::ZERO;
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn load(&mut self) {
        self.loads += 1;
        self.paused = true;
        self.position = Duration::ZERO;
    }

    fn play(&mut self) -> Result<(), MediaError> {
        if self.source.is_none() {
            return Err(MediaError::NoSource);
        }
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn seek_to_start(&mut self) {
        self.position = Duration::ZERO;
    }

    fn position(&self) -> Duration {
        self.position
    }
}
