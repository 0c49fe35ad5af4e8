use crate::model::VideoDescriptor;
use std::collections::HashMap;

/// Events a feed item can receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Direct interaction with the media element
    Click,
    /// Element reported a load or decode failure
    MediaError,
    /// Retry overlay activated
    OverlayClick,
    /// Item crossed the playback visibility threshold
    PrimaryEnter,
    PrimaryLeave,
    /// Item entered the preload margin
    MarginEnter,
    MarginLeave,
}

/// What to do for an `(item, event)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    TogglePlayback,
    ShowError,
    Retry { url: String },
    Activate,
    Deactivate,
    LoadSource { url: String },
    EvictSource,
}

/// Maps `(item index, event kind)` to the binding registered when the item
/// was rendered. Bindings carry their own data (the item URL), so nothing is
/// captured from render-time loop state.
#[derive(Debug, Default)]
pub struct DispatchTable {
    bindings: HashMap<(usize, EventKind), Binding>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the full set of bindings for one rendered item
    pub fn bind_item(&mut self, index: usize, descriptor: &VideoDescriptor) {
        self.bind(index, EventKind::Click, Binding::TogglePlayback);
        self.bind(index, EventKind::MediaError, Binding::ShowError);
        self.bind(
            index,
            EventKind::OverlayClick,
            Binding::Retry {
                url: descriptor.url.clone(),
            },
        );
        self.bind(index, EventKind::PrimaryEnter, Binding::Activate);
        self.bind(index, EventKind::PrimaryLeave, Binding::Deactivate);
        self.bind(
            index,
            EventKind::MarginEnter,
            Binding::LoadSource {
                url: descriptor.url.clone(),
            },
        );
        self.bind(index, EventKind::MarginLeave, Binding::EvictSource);
    }

    /// Register one binding, returning the one it replaced
    pub fn bind(&mut self, index: usize, kind: EventKind, binding: Binding) -> Option<Binding> {
        self.bindings.insert((index, kind), binding)
    }

    pub fn lookup(&self, index: usize, kind: EventKind) -> Option<&Binding> {
        self.bindings.get(&(index, kind))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_item_registers_every_event() {
        let mut table = DispatchTable::new();
        let descriptor = VideoDescriptor::new("a.mp4", "https://media.example.com/a.mp4");
        table.bind_item(3, &descriptor);

        assert_eq!(table.len(), 7);
        assert_eq!(
            table.lookup(3, EventKind::OverlayClick),
            Some(&Binding::Retry {
                url: "https://media.example.com/a.mp4".to_string()
            })
        );
        assert_eq!(table.lookup(3, EventKind::Click), Some(&Binding::TogglePlayback));
        assert!(table.lookup(2, EventKind::Click).is_none());
    }

    #[test]
    fn test_rebinding_replaces() {
        let mut table = DispatchTable::new();
        assert!(table.bind(0, EventKind::Click, Binding::TogglePlayback).is_none());
        assert_eq!(
            table.bind(0, EventKind::Click, Binding::ShowError),
            Some(Binding::TogglePlayback)
        );
        assert_eq!(table.len(), 1);
    }
}
