use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-show broadcast of committed events, for live seat maps.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a show's events, creating its channel on first use.
    pub fn subscribe(&self, show_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(show_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish a committed event. No-op if nobody is watching the show.
    pub fn send(&self, show_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&show_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a show's channel; open receivers see the channel close.
    pub fn remove(&self, show_id: &Ulid) {
        self.channels.remove(show_id);
    }
}
