//! Feed controller.
//!
//! Owns the rendered items and drives playback from viewport visibility.
//! Every input (scroll, key, click, element error, fetch result) is applied
//! serially through `&mut self`; visibility changes are turned into
//! `(index, EventKind)` events and routed through the [`DispatchTable`].

use crate::config::FeedConfig;
use crate::dispatch::{Binding, DispatchTable, EventKind};
use crate::error::FeedError;
use crate::layout::Viewport;
use crate::media::MediaElement;
use crate::model::{
    sample_videos, CounterKind, InteractionCounters, ItemState, UploadReceipt, VideoDescriptor,
};
use crate::state::{FeedState, FetchTicket};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One rendered feed entry
#[derive(Debug)]
pub struct FeedItem<M> {
    descriptor: VideoDescriptor,
    media: M,
    state: ItemState,
    overlay_visible: bool,
    primary_visible: bool,
    in_margin: bool,
    audible_override: bool,
    failure: Option<FeedError>,
}

impl<M: MediaElement + Default> FeedItem<M> {
    fn new(descriptor: VideoDescriptor) -> Self {
        Self {
            descriptor,
            media: M::default(),
            state: ItemState::Idle,
            overlay_visible: false,
            primary_visible: false,
            in_margin: false,
            audible_override: false,
            failure: None,
        }
    }
}

impl<M: MediaElement> FeedItem<M> {
    pub fn descriptor(&self) -> &VideoDescriptor {
        &self.descriptor
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay_visible
    }

    pub fn source_loaded(&self) -> bool {
        self.media.source().is_some()
    }

    pub fn primary_visible(&self) -> bool {
        self.primary_visible
    }

    pub fn in_margin(&self) -> bool {
        self.in_margin
    }

    /// User explicitly toggled sound or playback on this item
    pub fn audible_override(&self) -> bool {
        self.audible_override
    }

    pub fn failure(&self) -> Option<&FeedError> {
        self.failure.as_ref()
    }

    /// Pause, rewind and mute. A playing item becomes `Paused`.
    fn silence(&mut self) {
        self.media.pause();
        self.media.seek_to_start();
        self.media.set_muted(true);
        self.audible_override = false;
        if self.state == ItemState::Playing {
            self.state = ItemState::Paused;
        }
    }
}

/// Controller thresholds
#[derive(Debug, Clone)]
pub struct Tuning {
    pub primary_threshold: f64,
    pub lazy_margin: f64,
    pub eviction_distance: usize,
    pub demo_fallback: bool,
    pub status_dismiss: Duration,
}

impl Default for Tuning {
    fn default() -> Self {
        Self::from(&FeedConfig::default())
    }
}

impl From<&FeedConfig> for Tuning {
    fn from(config: &FeedConfig) -> Self {
        Self {
            primary_threshold: config.primary_threshold,
            lazy_margin: config.lazy_margin,
            eviction_distance: config.eviction_distance,
            demo_fallback: config.demo_fallback,
            status_dismiss: config.status_dismiss(),
        }
    }
}

/// Outcome of applying a listing fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FeedLoad {
    /// Live listing rendered
    Live { count: usize },
    /// Listing failed; the sample list was rendered instead
    Fallback { reason: String },
    /// Listing failed and nothing was rendered
    Failed(String),
    /// Fetch succeeded but the feed was already rendered
    AlreadyRendered,
    /// A newer fetch was started after this one
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    ArrowDown,
    ArrowUp,
    Space,
    Other,
}

/// Whether a key press was consumed and its default action suppressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyOutcome {
    pub handled: bool,
    pub prevent_default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Error,
}

/// Transient upload status message
#[derive(Debug, Clone, PartialEq)]
pub struct StatusBanner {
    pub message: String,
    pub kind: StatusKind,
    pub shown_at: Instant,
}

pub struct FeedController<M> {
    items: Vec<FeedItem<M>>,
    /// Page appended on every infinite-scroll step
    page: Vec<VideoDescriptor>,
    table: DispatchTable,
    state: FeedState,
    viewport: Viewport,
    tuning: Tuning,
    counters: InteractionCounters,
    loading: bool,
    load_error: Option<FeedError>,
    status: Option<StatusBanner>,
}

impl<M: MediaElement + Default> FeedController<M> {
    pub fn new(viewport_height: f64, tuning: Tuning) -> Self {
        Self {
            items: Vec::new(),
            page: Vec::new(),
            table: DispatchTable::new(),
            state: FeedState::new(),
            viewport: Viewport::new(viewport_height),
            tuning,
            counters: InteractionCounters::default(),
            loading: false,
            load_error: None,
            status: None,
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(config.viewport_height, Tuning::from(config))
    }

    /// Start a listing fetch. Results of earlier tickets will be ignored.
    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.loading = true;
        self.state.begin_fetch()
    }

    /// Apply the result of a listing fetch
    pub fn finish_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<VideoDescriptor>, FeedError>,
    ) -> FeedLoad {
        if !self.state.is_latest(ticket) {
            debug!(generation = ticket.generation(), "Dropping stale fetch result");
            return FeedLoad::Stale;
        }
        self.loading = false;

        if !self.items.is_empty() {
            debug!("Feed already rendered, ignoring fetch result");
            return FeedLoad::AlreadyRendered;
        }

        match result {
            Ok(videos) => {
                let count = videos.len();
                info!(count = count, "Rendering feed");
                self.render(videos);
                FeedLoad::Live { count }
            }
            Err(e) if self.tuning.demo_fallback => {
                warn!(error = %e, "Listing unavailable, showing sample videos");
                self.render(sample_videos());
                FeedLoad::Fallback {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Listing unavailable");
                let message = e.to_string();
                self.load_error = Some(e);
                FeedLoad::Failed(message)
            }
        }
    }

    fn render(&mut self, videos: Vec<VideoDescriptor>) {
        self.load_error = None;
        self.append(&videos);
        self.page = videos;
        self.refresh_visibility();
    }

    fn append(&mut self, videos: &[VideoDescriptor]) {
        for descriptor in videos {
            let index = self.items.len();
            self.table.bind_item(index, descriptor);
            self.items.push(FeedItem::new(descriptor.clone()));
        }
    }

    /// Append another page. Returns the number of items added.
    pub fn load_more(&mut self) -> usize {
        if self.page.is_empty() {
            return 0;
        }
        let page = self.page.clone();
        self.append(&page);
        info!(added = page.len(), total = self.items.len(), "Appended page");
        self.refresh_visibility();
        page.len()
    }

    /// Scroll the feed. Returns the distance actually moved.
    pub fn scroll_by(&mut self, dy: f64) -> f64 {
        let moved = self.viewport.scroll_by(dy, self.items.len());
        if moved == 0.0 {
            return 0.0;
        }
        self.refresh_visibility();

        if self.viewport.near_bottom(self.items.len()) {
            self.load_more();
        }
        moved
    }

    pub fn handle_key(&mut self, key: Key) -> KeyOutcome {
        let Some(current) = self.state.current() else {
            return KeyOutcome::default();
        };

        match key {
            Key::ArrowDown => {
                self.scroll_by(self.viewport.height);
            }
            Key::ArrowUp => {
                self.scroll_by(-self.viewport.height);
            }
            Key::Space => {
                self.toggle(current);
                return KeyOutcome {
                    handled: true,
                    prevent_default: true,
                };
            }
            Key::Other => return KeyOutcome::default(),
        }

        KeyOutcome {
            handled: true,
            prevent_default: false,
        }
    }

    /// Click on the media element of `index`
    pub fn click(&mut self, index: usize) -> Result<(), FeedError> {
        self.dispatch(index, EventKind::Click)
    }

    /// Element at `index` failed to load or decode
    pub fn report_media_error(&mut self, index: usize, reason: &str) -> Result<(), FeedError> {
        self.route(index, EventKind::MediaError, Some(reason))
    }

    /// Activate the retry overlay of `index`
    pub fn retry(&mut self, index: usize) -> Result<(), FeedError> {
        self.dispatch(index, EventKind::OverlayClick)
    }

    /// Route one event through the dispatch table
    pub fn dispatch(&mut self, index: usize, kind: EventKind) -> Result<(), FeedError> {
        self.route(index, kind, None)
    }

    /// `detail` is the host-supplied cause, used by error bindings
    fn route(&mut self, index: usize, kind: EventKind, detail: Option<&str>) -> Result<(), FeedError> {
        let binding = match self.table.lookup(index, kind) {
            Some(binding) if index < self.items.len() => binding.clone(),
            _ => return Err(FeedError::Unbound { index, kind }),
        };

        match binding {
            Binding::TogglePlayback => self.toggle(index),
            Binding::ShowError => {
                self.show_error(index, detail.unwrap_or("media element error"))
            }
            Binding::Retry { url } => self.reload(index, &url),
            Binding::Activate => self.activate(index),
            Binding::Deactivate => self.deactivate(index),
            Binding::LoadSource { url } => self.load_source(index, &url),
            Binding::EvictSource => self.evict(index),
        }
        Ok(())
    }

    pub fn increment(&mut self, kind: CounterKind) -> u64 {
        let value = self.counters.increment(kind);
        debug!(counter = ?kind, value = value, "Counter incremented");
        value
    }

    /// Show the outcome of an upload as a transient banner
    pub fn report_upload(&mut self, result: Result<UploadReceipt, FeedError>, now: Instant) {
        let (message, kind) = match result {
            Ok(receipt) => (receipt.message, StatusKind::Info),
            Err(e) => (format!("Upload failed: {}", e), StatusKind::Error),
        };
        self.status = Some(StatusBanner {
            message,
            kind,
            shown_at: now,
        });
    }

    /// Banner still visible at `now`
    pub fn status(&self, now: Instant) -> Option<&StatusBanner> {
        self.status
            .as_ref()
            .filter(|banner| now.saturating_duration_since(banner.shown_at) < self.tuning.status_dismiss)
    }

    pub fn items(&self) -> &[FeedItem<M>] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&FeedItem<M>> {
        self.items.get(index)
    }

    /// Media element of `index`, for hosts that drive playback time
    pub fn media_mut(&mut self, index: usize) -> Option<&mut M> {
        self.items.get_mut(index).map(|item| &mut item.media)
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn counters(&self) -> &InteractionCounters {
        &self.counters
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn load_error(&self) -> Option<&FeedError> {
        self.load_error.as_ref()
    }

    pub fn playing_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.state == ItemState::Playing)
            .count()
    }

    /// Recompute visibility and dispatch the resulting transitions:
    /// margin enters, primary leaves, primary enters, then margin leaves.
    fn refresh_visibility(&mut self) {
        let mut margin_enter = Vec::new();
        let mut primary_leave = Vec::new();
        let mut primary_enter = Vec::new();
        let mut margin_leave = Vec::new();

        for (index, item) in self.items.iter_mut().enumerate() {
            let primary = self.viewport.visible_ratio(index) >= self.tuning.primary_threshold;
            let margin = self.viewport.within_margin(index, self.tuning.lazy_margin);

            if margin && !item.in_margin {
                margin_enter.push(index);
            } else if !margin && item.in_margin {
                margin_leave.push(index);
            }
            if primary && !item.primary_visible {
                primary_enter.push(index);
            } else if !primary && item.primary_visible {
                primary_leave.push(index);
            }

            item.primary_visible = primary;
            item.in_margin = margin;
        }

        let events = margin_enter
            .into_iter()
            .map(|i| (i, EventKind::MarginEnter))
            .chain(primary_leave.into_iter().map(|i| (i, EventKind::PrimaryLeave)))
            .chain(primary_enter.into_iter().map(|i| (i, EventKind::PrimaryEnter)))
            .chain(margin_leave.into_iter().map(|i| (i, EventKind::MarginLeave)));

        for (index, kind) in events {
            if let Err(e) = self.dispatch(index, kind) {
                warn!(error = %e, "Visibility event dropped");
            }
        }
    }

    fn activate(&mut self, index: usize) {
        self.claim_current(index);

        let item = &mut self.items[index];
        if item.source_loaded() && item.state != ItemState::Error {
            item.media.set_muted(true);
            match item.media.play() {
                Ok(()) => item.state = ItemState::Playing,
                // Autoplay may be refused; the item stays as it was
                Err(e) => debug!(index = index, error = %e, "Autoplay rejected"),
            }
        }

        self.silence_others(index);
        debug!(index = index, "Item activated");
    }

    /// Make `index` current. When the current index moves, loaded items that
    /// are already outside the margin are re-checked against the window, since
    /// they will not fire another margin-leave.
    fn claim_current(&mut self, index: usize) {
        if self.state.current() == Some(index) {
            return;
        }
        self.state.set_current(index);

        let stale: Vec<usize> = self
            .state
            .loaded()
            .iter()
            .copied()
            .filter(|&i| self.items.get(i).map_or(false, |item| !item.in_margin))
            .collect();
        for i in stale {
            self.evict(i);
        }
    }

    fn deactivate(&mut self, index: usize) {
        let item = &mut self.items[index];
        item.media.pause();
        item.audible_override = false;
        if item.state == ItemState::Playing {
            item.state = ItemState::Paused;
        }
    }

    fn silence_others(&mut self, index: usize) {
        for (i, item) in self.items.iter_mut().enumerate() {
            if i != index {
                item.silence();
            }
        }
    }

    fn load_source(&mut self, index: usize, url: &str) {
        let item = &mut self.items[index];
        if item.source_loaded() {
            return;
        }
        item.media.set_source(url);
        if item.state == ItemState::Idle {
            item.state = ItemState::Preloaded;
        }
        self.state.mark_loaded(index);
        debug!(index = index, "Source assigned");
    }

    fn evict(&mut self, index: usize) {
        if !self.state.is_loaded(index) || self.state.distance(index) <= self.tuning.eviction_distance {
            return;
        }

        let item = &mut self.items[index];
        item.media.clear_source();
        item.state = ItemState::Idle;
        item.overlay_visible = false;
        item.failure = None;
        item.audible_override = false;
        self.state.evict(index);
        debug!(index = index, current = self.state.current_index(), "Source evicted");
    }

    fn show_error(&mut self, index: usize, reason: &str) {
        let item = &mut self.items[index];
        item.media.pause();
        item.state = ItemState::Error;
        item.overlay_visible = true;
        item.failure = Some(FeedError::MediaPlaybackFailure {
            index,
            reason: reason.to_string(),
        });
        warn!(index = index, url = %item.descriptor.url, reason = %reason, "Playback failed");
    }

    fn reload(&mut self, index: usize, url: &str) {
        let item = &mut self.items[index];
        item.media.set_source(url);
        item.media.load();
        item.overlay_visible = false;
        item.failure = None;
        item.state = ItemState::Preloaded;
        let primary = item.primary_visible;
        self.state.mark_loaded(index);
        info!(index = index, "Retrying item");

        if primary {
            self.activate(index);
        }
    }

    fn toggle(&mut self, index: usize) {
        let item = &mut self.items[index];
        if item.state == ItemState::Error || !item.source_loaded() {
            debug!(index = index, "Toggle ignored");
            return;
        }

        if item.media.is_paused() {
            item.media.set_muted(false);
            if let Err(e) = item.media.play() {
                warn!(index = index, error = %e, "Playback rejected");
                return;
            }
            item.state = ItemState::Playing;
            item.audible_override = true;
            self.claim_current(index);
            self.silence_others(index);
        } else {
            item.media.pause();
            item.media.set_muted(true);
            item.state = ItemState::Paused;
            item.audible_override = true;
        }
    }
}
