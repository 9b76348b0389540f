use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-user fan-out of schedule events.
///
/// Teachers hear about their windows and every appointment with them;
/// students hear about their own appointments.
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

    pub fn subscribe(&self, user_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, user_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&user_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop the channel once its last subscriber is gone.
    pub fn release(&self, user_id: &Ulid) {
        self.channels
            .remove_if(user_id, |_, sender| sender.receiver_count() == 0);
    }
}
