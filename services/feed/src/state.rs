use std::collections::BTreeSet;

/// Handle for one in-flight listing fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
}

impl FetchTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Playback bookkeeping owned by the controller
#[derive(Debug, Clone, Default)]
pub struct FeedState {
    current: Option<usize>,
    loaded: BTreeSet<usize>,
    fetch_generation: u64,
}

impl FeedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Item that last claimed playback
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// Index used for window distance, 0 before anything played
    pub fn current_index(&self) -> usize {
        self.current.unwrap_or(0)
    }

    pub fn set_current(&mut self, index: usize) {
        self.current = Some(index);
    }

    /// Distance of `index` from the current index
    pub fn distance(&self, index: usize) -> usize {
        index.abs_diff(self.current_index())
    }

    pub fn mark_loaded(&mut self, index: usize) {
        self.loaded.insert(index);
    }

    /// Drop `index` from the loaded set, returning whether it was there
    pub fn evict(&mut self, index: usize) -> bool {
        self.loaded.remove(&index)
    }

    pub fn is_loaded(&self, index: usize) -> bool {
        self.loaded.contains(&index)
    }

    pub fn loaded(&self) -> &BTreeSet<usize> {
        &self.loaded
    }

    /// Start a fetch. Any earlier ticket becomes stale.
    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.fetch_generation += 1;
        FetchTicket {
            generation: self.fetch_generation,
        }
    }

    pub fn is_latest(&self, ticket: FetchTicket) -> bool {
        ticket.generation == self.fetch_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_defaults_to_index_zero() {
        let mut state = FeedState::new();
        assert_eq!(state.distance(4), 4);

        state.set_current(6);
        assert_eq!(state.distance(2), 4);
        assert_eq!(state.distance(9), 3);
    }

    #[test]
    fn test_only_newest_ticket_is_latest() {
        let mut state = FeedState::new();
        let first = state.begin_fetch();
        let second = state.begin_fetch();

        assert!(!state.is_latest(first));
        assert!(state.is_latest(second));
        assert_eq!(second.generation(), 2);
    }

    #[test]
    fn test_loaded_set() {
        let mut state = FeedState::new();
        state.mark_loaded(1);
        state.mark_loaded(2);
        assert!(state.evict(1));
        assert!(!state.evict(1));
        assert_eq!(state.loaded().iter().copied().collect::<Vec<_>>(), vec![2]);
    }
}
