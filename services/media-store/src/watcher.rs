use crate::store::{BlobStore, StoreError};
use crate::thumbnail::VideoStored;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Polls the videos collection and reports objects it has not seen before,
/// so videos written by other producers get thumbnails too.
pub struct VideoWatcher {
    store: Arc<dyn BlobStore>,
    container: String,
    interval: Duration,
    backfill: bool,
    primed: bool,
    known: HashSet<String>,
}

impl VideoWatcher {
    /// Without `backfill`, objects present at the first poll are recorded
    /// but not reported.
    pub fn new(
        store: Arc<dyn BlobStore>,
        container: impl Into<String>,
        interval: Duration,
        backfill: bool,
    ) -> Self {
        Self {
            store,
            container: container.into(),
            interval,
            backfill,
            primed: false,
            known: HashSet::new(),
        }
    }

    /// List the collection once and return the names not seen before
    pub async fn poll_once(&mut self) -> Result<Vec<String>, StoreError> {
        let names = self.store.list(&self.container).await?;

        let fresh: Vec<String> = names
            .into_iter()
            .filter(|name| self.known.insert(name.clone()))
            .collect();

        if !self.primed {
            self.primed = true;
            if !self.backfill {
                debug!(existing = fresh.len(), "Watcher primed with existing videos");
                return Ok(Vec::new());
            }
        }

        Ok(fresh)
    }

    pub async fn run(mut self, events: mpsc::Sender<VideoStored>, shutdown: CancellationToken) {
        info!(
            container = %self.container,
            interval_secs = self.interval.as_secs(),
            backfill = self.backfill,
            "Video watcher started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let fresh = match self.poll_once().await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!(error = %e, "Failed to poll videos collection");
                    continue;
                }
            };

            for name in fresh {
                debug!(video = %name, "New video detected");
                if events.send(VideoStored { name }).await.is_err() {
                    info!("Thumbnail worker gone, stopping watcher");
                    return;
                }
            }
        }

        info!("Video watcher stopped");
    }
}
