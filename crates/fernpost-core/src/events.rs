//! Lifecycle events
//!
//! Everything the core wants to tell the outside world (new posts found,
//! inserts started and finished, documents removed) is a [`CoreEvent`] sent
//! over an unbounded channel. Sending never blocks and never fails from the
//! emitter's point of view; events for a dropped receiver are discarded.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::identity::{Address, IdentityId};
use crate::models::{Post, Reply};

/// Events emitted by the core
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// A document was seen for the first time
    DocumentDiscovered(IdentityId),
    /// A newer edition of a known document replaced the stored one
    DocumentUpdated { id: IdentityId, edition: u64 },
    /// A document was removed from the store
    DocumentRemoved(IdentityId),
    /// A post that was not known before appeared
    NewPostFound(Post),
    /// A reply that was not known before appeared
    NewReplyFound(Reply),
    /// A post disappeared from its document
    PostRemoved(Post),
    /// A reply disappeared from its document
    ReplyRemoved(Reply),
    /// An insert of a local document is starting
    Inserting(IdentityId),
    /// An insert finished
    Inserted {
        id: IdentityId,
        address: Address,
        duration: Duration,
    },
    /// An insert failed; the same content is retried later
    InsertAborted { id: IdentityId, reason: String },
    /// A rescue fetch replaced the document with an older edition
    Rescued { id: IdentityId, edition: u64 },
}

/// Sending half of the event channel, cheap to clone
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<CoreEvent>,
}

impl EventBus {
    /// Create a new bus and the receiver for its events
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::owner;

    #[test]
    fn test_emit_and_receive_in_order() {
        let (bus, mut rx) = EventBus::new();
        bus.emit(CoreEvent::Inserting(owner()));
        bus.emit(CoreEvent::DocumentRemoved(owner()));

        assert_eq!(
            drain(&mut rx),
            vec![
                CoreEvent::Inserting(owner()),
                CoreEvent::DocumentRemoved(owner())
            ]
        );
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (bus, rx) = EventBus::new();
        drop(rx);
        bus.emit(CoreEvent::Inserting(owner()));
    }
}
