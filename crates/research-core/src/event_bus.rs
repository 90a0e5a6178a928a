use tokio::sync::broadcast;

use research_types::EngineEvent;

/// In-process pub/sub for lifecycle events (C10). Publish never blocks on
/// slow subscribers: `broadcast::send` only fails when there are no
/// receivers, which is not an error from the publisher's point of view.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(2048);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
