//! Edition watching for followed documents
//!
//! Subscribes to edition changes of one identity. Each reported edition that
//! is newer than the known one is fetched; the first usable edition onboards
//! the document, later ones go through the [`DiffProcessor`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::diff::DiffProcessor;
use super::downloader::Downloader;
use crate::events::{CoreEvent, EventBus};
use crate::identity::IdentityId;
use crate::network::{EditionListener, NetworkStore, SubscriptionHandle};
use crate::storage::Persistence;
use crate::store::DocumentStore;

#[derive(Debug)]
enum WatcherMessage {
    Edition(u64),
    Stop,
}

/// Forwards store callbacks into the watcher task
struct Forwarder {
    tx: mpsc::UnboundedSender<WatcherMessage>,
}

impl EditionListener for Forwarder {
    fn edition_found(&self, key: &str, edition: u64, is_new: bool) {
        debug!(key, edition, is_new, "Edition found");
        let _ = self.tx.send(WatcherMessage::Edition(edition));
    }
}

/// Watches one followed identity for new editions
pub struct EditionWatcher {
    network: Arc<dyn NetworkStore>,
    subscription: SubscriptionHandle,
    tx: mpsc::UnboundedSender<WatcherMessage>,
    task: JoinHandle<()>,
}

impl EditionWatcher {
    /// Start watching an identity present in the store
    ///
    /// Returns `None` if the identity is unknown.
    pub async fn start(
        id: IdentityId,
        store: Arc<DocumentStore>,
        network: Arc<dyn NetworkStore>,
        downloader: Downloader,
        persistence: Arc<dyn Persistence>,
    ) -> Option<Self> {
        let key = store.slot(&id)?.lock().await.request_address().key.clone();

        let (tx, rx) = mpsc::unbounded_channel();
        let events = store.events().clone();
        let task = WatchTask {
            id,
            store,
            downloader,
            diff: DiffProcessor::new(events.clone()),
            persistence,
            events,
        };
        let task = tokio::spawn(task.run(rx));

        let forwarder = Arc::new(Forwarder { tx: tx.clone() });
        let subscription = network.subscribe_to_edition_changes(&key, forwarder);
        info!(%key, "Watching for new editions");

        Some(Self {
            network,
            subscription,
            tx,
            task,
        })
    }

    /// Unsubscribe and stop after the edition being handled
    pub fn stop(&self) {
        self.network.unsubscribe(self.subscription);
        let _ = self.tx.send(WatcherMessage::Stop);
    }

    /// Wait for the watcher task to finish
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("Edition watcher ended abnormally: {}", e);
        }
    }
}

struct WatchTask {
    id: IdentityId,
    store: Arc<DocumentStore>,
    downloader: Downloader,
    diff: DiffProcessor,
    persistence: Arc<dyn Persistence>,
    events: EventBus,
}

impl WatchTask {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<WatcherMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                WatcherMessage::Edition(edition) => {
                    let outcome = AssertUnwindSafe(self.handle(edition)).catch_unwind().await;
                    if outcome.is_err() {
                        error!(id = %self.id, edition, "Handling edition panicked");
                    }
                }
                WatcherMessage::Stop => break,
            }
        }
        debug!(id = %self.id, "Edition watcher stopped");
    }

    async fn handle(&self, edition: u64) {
        let Some(slot) = self.store.slot(&self.id) else {
            debug!(id = %self.id, "Identity removed, ignoring edition");
            return;
        };

        let address = {
            let guard = slot.lock().await;
            if guard.document().is_some() && edition <= guard.edition() {
                debug!(id = %self.id, edition, "Edition already known");
                return;
            }
            guard.request_address().with_edition(edition)
        };

        let Some(document) = self.downloader.fetch(&self.id, &address).await else {
            return;
        };

        let mut guard = slot.lock().await;
        if guard.document().is_none() {
            guard.replace_document(document);
            guard.mark_all_known();
            info!(id = %self.id, edition, "Discovered document");
            self.events
                .emit(CoreEvent::DocumentDiscovered(self.id.clone()));
        } else if !self.diff.update(&mut guard, document) {
            return;
        }
        let state = guard.persisted_state();
        drop(guard);

        self.persistence.touch(&state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DocumentParser;
    use crate::identity::Address;
    use crate::models::fixtures::*;
    use crate::models::Document;
    use crate::testing::{MockStore, RecordingPersistence};
    use tokio::sync::mpsc::UnboundedReceiver;

    const KEY: &str = "USK@friend/fernpost";

    fn edition(edition: u64, posts: &[(&str, i64)]) -> Document {
        let mut document = Document::new(friend(), Address::new(KEY, edition));
        document.time = at(edition as i64 * 10_000);
        for (id, millis) in posts {
            document.add_post(post(id, *millis));
        }
        document
    }

    struct Harness {
        store: Arc<DocumentStore>,
        network: Arc<MockStore>,
        persistence: Arc<RecordingPersistence>,
        rx: UnboundedReceiver<CoreEvent>,
        watcher: EditionWatcher,
    }

    async fn harness(since: i64) -> Harness {
        let (events, rx) = EventBus::new();
        let store = Arc::new(DocumentStore::new(events));
        store.follow(friend(), KEY, at(since)).await;

        let network = MockStore::new();
        let persistence = RecordingPersistence::new();
        let downloader = Downloader::new(network.clone(), DocumentParser::new());
        let watcher = EditionWatcher::start(
            friend(),
            store.clone(),
            network.clone(),
            downloader,
            persistence.clone(),
        )
        .await
        .unwrap();

        Harness {
            store,
            network,
            persistence,
            rx,
            watcher,
        }
    }

    #[tokio::test]
    async fn test_first_edition_onboards() {
        let mut h = harness(0).await;
        h.network
            .publish(&Address::new(KEY, 1), &edition(1, &[("p1", 1_000)]));

        h.network.announce(KEY, 1);

        assert_eq!(
            h.rx.recv().await,
            Some(CoreEvent::DocumentDiscovered(friend()))
        );
        let slot = h.store.slot(&friend()).unwrap();
        let guard = slot.lock().await;
        assert_eq!(guard.edition(), 1);
        assert!(guard.is_post_known("p1"));
        drop(guard);
        assert_eq!(h.persistence.touched().len(), 1);
    }

    #[tokio::test]
    async fn test_later_edition_is_diffed() {
        let mut h = harness(0).await;
        h.network
            .publish(&Address::new(KEY, 1), &edition(1, &[("p1", 1_000)]));
        h.network.publish(
            &Address::new(KEY, 2),
            &edition(2, &[("p1", 1_000), ("p2", 15_000)]),
        );

        h.network.announce(KEY, 1);
        h.rx.recv().await;
        h.network.announce(KEY, 2);

        match h.rx.recv().await {
            Some(CoreEvent::NewPostFound(post)) => assert_eq!(post.id, "p2"),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            h.rx.recv().await,
            Some(CoreEvent::DocumentUpdated {
                id: friend(),
                edition: 2
            })
        );
    }

    #[tokio::test]
    async fn test_known_editions_are_not_fetched() {
        let mut h = harness(0).await;
        h.network.publish(&Address::new(KEY, 2), &edition(2, &[]));
        h.network.publish(&Address::new(KEY, 3), &edition(3, &[]));

        h.network.announce(KEY, 2);
        h.rx.recv().await;
        h.network.announce(KEY, 1);
        h.network.announce(KEY, 2);
        h.network.announce(KEY, 3);
        h.rx.recv().await;

        assert_eq!(
            h.network.fetches(),
            vec![Address::new(KEY, 2), Address::new(KEY, 3)]
        );
    }

    #[tokio::test]
    async fn test_unusable_edition_is_skipped() {
        let mut h = harness(0).await;
        h.network.put(&Address::new(KEY, 1), "{}");
        h.network.publish(&Address::new(KEY, 2), &edition(2, &[]));

        h.network.announce(KEY, 1);
        h.network.announce(KEY, 2);

        assert_eq!(
            h.rx.recv().await,
            Some(CoreEvent::DocumentDiscovered(friend()))
        );
        let slot = h.store.slot(&friend()).unwrap();
        assert_eq!(slot.lock().await.edition(), 2);
    }

    #[tokio::test]
    async fn test_stop_unsubscribes() {
        let h = harness(0).await;
        assert_eq!(h.network.subscriptions(), 1);

        h.watcher.stop();
        assert_eq!(h.network.subscriptions(), 0);
        h.watcher.join().await;
    }

    #[tokio::test]
    async fn test_start_unknown_identity() {
        let (events, _rx) = EventBus::new();
        let store = Arc::new(DocumentStore::new(events));
        let network = MockStore::new();
        let downloader = Downloader::new(network.clone(), DocumentParser::new());

        let watcher = EditionWatcher::start(
            friend(),
            store,
            network.clone(),
            downloader,
            RecordingPersistence::new(),
        )
        .await;
        assert!(watcher.is_none());
        assert_eq!(network.subscriptions(), 0);
    }
}
