//! Debounced insert loop for local documents
//!
//! One loop runs per local identity. Every tick it asks the
//! [`ModificationDetector`] whether the document changed and has been quiet
//! long enough; if so it serializes the document and inserts it as a new
//! edition.
//!
//! ```text
//! Idle -> Checking -> (eligible) -> Inserting -> Idle
//!                  -> (not eligible) ---------> Idle
//! ```
//!
//! `stop()` is only seen between ticks, so an insert in flight always
//! finishes and reports `Inserted` or `InsertAborted`.
//!
//! The document lock is released while the insert runs. If the document was
//! rescued or moved to another edition meanwhile, the finished insert is
//! reported as aborted and leaves the slot alone.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SubsecRound, Utc};
use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::detector::ModificationDetector;
use crate::events::{CoreEvent, EventBus};
use crate::fingerprint::Fingerprint;
use crate::identity::{Address, IdentityId};
use crate::network::{Manifest, NetworkStore};
use crate::storage::Persistence;
use crate::store::DocumentStore;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// State of an insert loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InserterState {
    Idle,
    Checking,
    Inserting,
    Stopped,
}

/// Commands sent to an insert loop
#[derive(Debug, Clone)]
pub enum InserterCommand {
    /// Stop after the current tick
    Stop,
}

/// Handle to control a running insert loop
///
/// Dropping the handle stops the loop after its current tick.
pub struct InserterHandle {
    command_tx: mpsc::UnboundedSender<InserterCommand>,
    /// Watch the loop state
    pub status_rx: watch::Receiver<InserterState>,
    task: JoinHandle<()>,
}

impl InserterHandle {
    /// Request the loop to stop; an insert in flight still completes
    pub fn stop(&self) {
        let _ = self.command_tx.send(InserterCommand::Stop);
    }

    pub fn state(&self) -> InserterState {
        *self.status_rx.borrow()
    }

    /// Wait for the loop to finish
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("Insert loop ended abnormally: {}", e);
        }
    }
}

/// Insert loop of one local identity
pub struct Inserter {
    id: IdentityId,
    store: Arc<DocumentStore>,
    network: Arc<dyn NetworkStore>,
    persistence: Arc<dyn Persistence>,
    events: EventBus,
    detector: ModificationDetector,
    /// Whether the saved fingerprint of the slot was handed to the detector
    fingerprint_loaded: bool,
    /// Content the serializer refused; not retried until it changes
    refused: Option<Fingerprint>,
    poll_interval: Duration,
}

impl Inserter {
    pub fn new(
        id: IdentityId,
        store: Arc<DocumentStore>,
        network: Arc<dyn NetworkStore>,
        persistence: Arc<dyn Persistence>,
        delay: watch::Receiver<Duration>,
    ) -> Self {
        let events = store.events().clone();
        Self {
            id,
            store,
            network,
            persistence,
            events,
            detector: ModificationDetector::new(delay, None),
            fingerprint_loaded: false,
            refused: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Spawn the loop
    pub fn spawn(self) -> InserterHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(InserterState::Idle);

        let task = tokio::spawn(self.run(command_rx, status_tx));

        InserterHandle {
            command_tx,
            status_rx,
            task,
        }
    }

    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<InserterCommand>,
        status_tx: watch::Sender<InserterState>,
    ) {
        info!(id = %self.id, "Insert loop started");

        loop {
            let _ = status_tx.send(InserterState::Checking);
            let outcome = AssertUnwindSafe(self.tick(&status_tx)).catch_unwind().await;
            if outcome.is_err() {
                error!(id = %self.id, "Insert tick panicked");
            }
            let _ = status_tx.send(InserterState::Idle);

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(InserterCommand::Stop) | None => break,
                    }
                }
            }
        }

        let _ = status_tx.send(InserterState::Stopped);
        info!(id = %self.id, "Insert loop stopped");
    }

    async fn tick(&mut self, status_tx: &watch::Sender<InserterState>) {
        let Some(slot) = self.store.slot(&self.id) else {
            debug!(id = %self.id, "Document not present, skipping tick");
            return;
        };

        let (manifest, target, fingerprint) = {
            let mut guard = slot.lock().await;
            let locked = guard.is_locked();
            let edition = guard.edition();
            let Some(local) = guard.local() else {
                return;
            };
            let insert_key = local.insert_key.clone();
            if !self.fingerprint_loaded {
                if let Some(saved) = local.last_insert_fingerprint {
                    self.detector.set_fingerprint(saved);
                }
                self.fingerprint_loaded = true;
            }
            let Some(document) = guard.document_mut() else {
                return;
            };

            let fingerprint = Fingerprint::of(document);
            if self.refused == Some(fingerprint) {
                return;
            }
            if !self
                .detector
                .is_eligible_for_insert(fingerprint, locked, Instant::now())
            {
                return;
            }

            document.time = Utc::now().trunc_subsecs(3);
            let manifest = match Manifest::for_document(document) {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(id = %self.id, "Refusing to insert: {}", e);
                    self.refused = Some(fingerprint);
                    self.events.emit(CoreEvent::InsertAborted {
                        id: self.id.clone(),
                        reason: e.to_string(),
                    });
                    return;
                }
            };
            (manifest, Address::new(insert_key, edition + 1), fingerprint)
        };

        let _ = status_tx.send(InserterState::Inserting);
        self.events.emit(CoreEvent::Inserting(self.id.clone()));
        info!(id = %self.id, %target, "Inserting document");

        let started = Instant::now();
        match self.network.insert(manifest, &target).await {
            Ok(address) => {
                let state = {
                    let mut guard = slot.lock().await;
                    if guard.is_locked() || guard.edition() + 1 != target.edition {
                        drop(guard);
                        warn!(id = %self.id, %address, "Document changed hands during insert");
                        self.events.emit(CoreEvent::InsertAborted {
                            id: self.id.clone(),
                            reason: format!("{} was superseded while inserting", address),
                        });
                        return;
                    }
                    guard.set_edition(address.edition);
                    if let Some(local) = guard.local_mut() {
                        local.last_insert_fingerprint = Some(fingerprint);
                    }
                    guard.persisted_state()
                };
                self.detector.set_fingerprint(fingerprint);

                let duration = started.elapsed();
                info!(id = %self.id, %address, ?duration, "Inserted document");
                self.events.emit(CoreEvent::Inserted {
                    id: self.id.clone(),
                    address,
                    duration,
                });
                self.persistence.touch(&state);
            }
            Err(e) => {
                warn!(id = %self.id, %target, "Insert aborted: {}", e);
                self.events.emit(CoreEvent::InsertAborted {
                    id: self.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, DocumentParser};
    use crate::config::InsertionDelay;
    use crate::events::drain;
    use crate::models::fixtures::*;
    use crate::models::Album;
    use crate::storage::PersistedState;
    use crate::sync::downloader::Downloader;
    use crate::sync::rescuer::Rescuer;
    use crate::testing::{MockStore, RecordingPersistence};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::sleep;

    struct Harness {
        store: Arc<DocumentStore>,
        network: Arc<MockStore>,
        persistence: Arc<RecordingPersistence>,
        delay: InsertionDelay,
        rx: UnboundedReceiver<CoreEvent>,
    }

    impl Harness {
        fn new(delay_secs: u64) -> Self {
            let (events, rx) = EventBus::new();
            Self {
                store: Arc::new(DocumentStore::new(events)),
                network: MockStore::new(),
                persistence: RecordingPersistence::new(),
                delay: InsertionDelay::new(Duration::from_secs(delay_secs)),
                rx,
            }
        }

        fn create_local(&self) {
            self.store
                .create_local(owner(), "SSK@owner/fernpost", "SSK@owner/fernpost");
        }

        fn spawn(&self) -> InserterHandle {
            Inserter::new(
                owner(),
                self.store.clone(),
                self.network.clone(),
                self.persistence.clone(),
                self.delay.subscribe(),
            )
            .with_poll_interval(Duration::from_secs(1))
            .spawn()
        }

        fn kinds(&mut self) -> Vec<&'static str> {
            drain(&mut self.rx)
                .into_iter()
                .map(|event| match event {
                    CoreEvent::Inserting(_) => "inserting",
                    CoreEvent::Inserted { .. } => "inserted",
                    CoreEvent::InsertAborted { .. } => "aborted",
                    _ => "other",
                })
                .collect()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_inserts_once_after_delay() {
        let mut h = Harness::new(5);
        h.create_local();
        let handle = h.spawn();

        sleep(Duration::from_secs(3)).await;
        assert!(h.network.inserted().is_empty());

        sleep(Duration::from_secs(7)).await;
        let inserted = h.network.inserted();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].1, Address::new("SSK@owner/fernpost", 1));
        assert_eq!(h.kinds(), vec!["inserting", "inserted"]);

        let slot = h.store.slot(&owner()).unwrap();
        let guard = slot.lock().await;
        assert_eq!(guard.edition(), 1);
        let fingerprint = Fingerprint::of(guard.document().unwrap());
        assert_eq!(guard.local().unwrap().last_insert_fingerprint, Some(fingerprint));
        drop(guard);

        let touched = h.persistence.touched();
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].latest_edition, 1);
        assert_eq!(touched[0].last_insert_fingerprint, Some(fingerprint));

        // Unchanged content is not inserted again
        sleep(Duration::from_secs(30)).await;
        assert_eq!(h.network.inserted().len(), 1);

        handle.stop();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_after_insert_inserts_next_edition() {
        let h = Harness::new(2);
        h.create_local();
        let handle = h.spawn();

        sleep(Duration::from_secs(5)).await;
        assert_eq!(h.network.inserted().len(), 1);

        {
            let slot = h.store.slot(&owner()).unwrap();
            let mut guard = slot.lock().await;
            guard
                .document_mut()
                .unwrap()
                .add_post(post("post-1", 1_000));
        }

        sleep(Duration::from_secs(5)).await;
        let inserted = h.network.inserted();
        assert_eq!(inserted.len(), 2);
        assert_eq!(inserted[1].1.edition, 2);

        handle.stop();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_insert_is_retried() {
        let mut h = Harness::new(2);
        h.create_local();
        h.network.fail_inserts(1);
        let handle = h.spawn();

        sleep(Duration::from_secs(10)).await;

        assert_eq!(h.network.inserted().len(), 1);
        assert_eq!(
            h.kinds(),
            vec!["inserting", "aborted", "inserting", "inserted"]
        );
        assert_eq!(h.persistence.touched().len(), 1);

        handle.stop();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_document_is_not_inserted() {
        let h = Harness::new(1);
        h.create_local();
        let slot = h.store.slot(&owner()).unwrap();
        slot.lock().await.set_locked(true);
        let handle = h.spawn();

        sleep(Duration::from_secs(10)).await;
        assert!(h.network.inserted().is_empty());

        slot.lock().await.set_locked(false);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(h.network.inserted().len(), 1);

        handle.stop();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_document_keeps_looping() {
        let h = Harness::new(1);
        let handle = h.spawn();

        sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.state(), InserterState::Idle);

        h.create_local();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(h.network.inserted().len(), 1);

        handle.stop();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_change_applies_to_running_loop() {
        let h = Harness::new(3600);
        h.create_local();
        let handle = h.spawn();

        sleep(Duration::from_secs(10)).await;
        assert!(h.network.inserted().is_empty());

        h.delay.set(Duration::from_secs(1));
        sleep(Duration::from_secs(3)).await;
        assert_eq!(h.network.inserted().len(), 1);

        handle.stop();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_insert_in_flight_finish() {
        let mut h = Harness::new(1);
        h.create_local();
        let gate = h.network.gate_inserts();
        let handle = h.spawn();

        sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.state(), InserterState::Inserting);

        handle.stop();
        gate.notify_one();
        let mut status_rx = handle.status_rx.clone();
        handle.join().await;

        assert_eq!(*status_rx.borrow_and_update(), InserterState::Stopped);
        assert_eq!(h.kinds(), vec!["inserting", "inserted"]);
        assert_eq!(h.network.inserted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_fingerprint_suppresses_reinsert() {
        let h = Harness::new(1);
        h.create_local();
        {
            let slot = h.store.slot(&owner()).unwrap();
            let mut guard = slot.lock().await;
            let fingerprint = Fingerprint::of(guard.document().unwrap());
            guard.local_mut().unwrap().last_insert_fingerprint = Some(fingerprint);
        }
        let handle = h.spawn();

        sleep(Duration::from_secs(10)).await;
        assert!(h.network.inserted().is_empty());

        handle.stop();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_restored_after_start_keeps_its_fingerprint() {
        let h = Harness::new(1);
        let handle = h.spawn();
        sleep(Duration::from_secs(3)).await;

        let document = full();
        let mut state = PersistedState::new(owner(), document.address.key.clone(), 1);
        state.insert_key = Some(document.address.key.clone());
        state.last_insert_fingerprint = Some(Fingerprint::of(&document));
        state.document = Some(String::from_utf8(codec::serialize(&document).unwrap()).unwrap());
        h.store.restore(&state).unwrap();

        sleep(Duration::from_secs(10)).await;
        assert!(h.network.inserted().is_empty());

        handle.stop();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_document_is_refused_once() {
        let mut h = Harness::new(1);
        h.create_local();
        let slot = h.store.slot(&owner()).unwrap();
        let mut untitled = Album::new("", "");
        untitled.id = "album-1".to_string();
        assert!(slot.lock().await.document_mut().unwrap().add_album(None, untitled));
        let handle = h.spawn();

        sleep(Duration::from_secs(10)).await;
        assert!(h.network.inserted().is_empty());
        assert_eq!(h.kinds(), vec!["aborted"]);

        {
            let mut guard = slot.lock().await;
            let document = guard.document_mut().unwrap();
            document.root_album.find_mut("album-1").unwrap().title = "Named".to_string();
        }
        sleep(Duration::from_secs(5)).await;
        assert_eq!(h.network.inserted().len(), 1);
        assert_eq!(h.kinds(), vec!["inserting", "inserted"]);

        handle.stop();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescue_during_insert_keeps_rescued_edition() {
        let mut h = Harness::new(1);
        h.create_local();
        let slot = h.store.slot(&owner()).unwrap();
        let mut current = empty(3_000);
        current.address = Address::new("SSK@owner/fernpost", 3);
        current.add_post(post("post-3", 3_000));
        slot.lock().await.replace_document(current);

        let mut older = empty(2_000);
        older.address = Address::new("SSK@owner/fernpost", 2);
        h.network.publish(&older.address, &older);

        let gate = h.network.gate_inserts();
        let handle = h.spawn();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.state(), InserterState::Inserting);

        let downloader = Downloader::new(h.network.clone(), DocumentParser::new());
        let rescuer = Rescuer::new(owner(), h.store.clone(), downloader, h.persistence.clone())
            .spawn()
            .await;
        let mut status = rescuer.subscribe();
        assert!(rescuer.start_next_fetch());
        status.wait_for(|s| !s.is_fetching).await.unwrap();
        assert!(rescuer.last_fetch_successful());

        gate.notify_one();
        sleep(Duration::from_secs(3)).await;

        let guard = slot.lock().await;
        assert_eq!(guard.edition(), 2);
        assert!(guard.is_locked());
        assert_eq!(guard.local().unwrap().last_insert_fingerprint, None);
        drop(guard);

        let kinds = h.kinds();
        assert!(kinds.contains(&"aborted"));
        assert!(!kinds.contains(&"inserted"));
        assert!(h
            .persistence
            .touched()
            .iter()
            .all(|state| state.latest_edition == 2));

        rescuer.stop();
        rescuer.join().await;
        handle.stop();
        handle.join().await;
    }
}
