use serde::{Deserialize, Serialize};

/// One entry of the video listing. Order in the listing is display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDescriptor {
    pub name: String,
    pub url: String,
}

impl VideoDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Response of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub message: String,
    pub file_name: String,
    pub url: String,
}

/// Lifecycle state of a feed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemState {
    /// No source assigned
    #[default]
    Idle,
    /// Source assigned, not playing
    Preloaded,
    /// Current and playing
    Playing,
    /// Stopped, source retained
    Paused,
    /// Load or decode failure, waiting for a manual retry
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Like,
    Comment,
    Share,
}

/// Like/comment/share counters. Only ever incremented by user action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InteractionCounters {
    pub like: u64,
    pub comment: u64,
    pub share: u64,
}

impl InteractionCounters {
    /// Increment one counter and return its new value
    pub fn increment(&mut self, kind: CounterKind) -> u64 {
        let counter = match kind {
            CounterKind::Like => &mut self.like,
            CounterKind::Comment => &mut self.comment,
            CounterKind::Share => &mut self.share,
        };
        *counter += 1;
        *counter
    }

    pub fn get(&self, kind: CounterKind) -> u64 {
        match kind {
            CounterKind::Like => self.like,
            CounterKind::Comment => self.comment,
            CounterKind::Share => self.share,
        }
    }
}

/// Bundled list shown when the listing endpoint is unreachable
pub fn sample_videos() -> Vec<VideoDescriptor> {
    [
        "video-1764077443079.mp4",
        "video-1765474051382.mp4",
        "video-1765476301896.mp4",
        "video-1765476622528.mp4",
        "video-1765477276846.mp4",
    ]
    .into_iter()
    .map(|name| VideoDescriptor::new(name, format!("https://media.example.com/videos/{}", name)))
    .collect()
}
