//! Short-video feed controller
//!
//! A vertical feed of full-height videos. Playback follows visibility: the
//! item that is at least 80% on screen plays muted, every other item is
//! paused and rewound. Sources are assigned lazily when an item comes within
//! half a viewport and released again once it is more than three items away
//! from the current one. Scrolling near the end appends another page.
//!
//! The controller is UI-agnostic: a host feeds it scroll offsets, key presses,
//! clicks and element errors, and supplies the [`MediaElement`] behind each
//! item. [`HeadlessMedia`] is the in-process element used by the CLI and the
//! tests.

pub mod client;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod layout;
pub mod media;
pub mod model;
pub mod state;

pub use client::{load_feed, ApiClient, VideoSource};
pub use config::{FeedConfig, Settings};
pub use controller::{FeedController, FeedItem, FeedLoad, Key, KeyOutcome, StatusBanner, StatusKind, Tuning};
pub use dispatch::{Binding, DispatchTable, EventKind};
pub use error::FeedError;
pub use layout::Viewport;
pub use media::{HeadlessMedia, MediaElement, MediaError};
pub use model::{CounterKind, InteractionCounters, ItemState, UploadReceipt, VideoDescriptor};
pub use state::{FeedState, FetchTicket};
