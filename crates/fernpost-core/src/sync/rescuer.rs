//! Operator-driven recovery of a broken document
//!
//! When the latest edition of a document cannot be fetched or parsed, the
//! operator walks backwards through older editions until one is usable. The
//! rescue loop holds the document's lock for the whole fetch so the insert
//! loop cannot publish over the document meanwhile.
//!
//! A successful rescue replaces the document, locks it against insertion
//! and persists the recovered edition. The operator unlocks it once the
//! document looks right.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::diff::DiffProcessor;
use super::downloader::Downloader;
use crate::events::{CoreEvent, EventBus};
use crate::identity::IdentityId;
use crate::storage::Persistence;
use crate::store::DocumentStore;

/// Observable state of a rescue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescueStatus {
    /// Edition the document currently stands at
    pub current_edition: u64,
    pub is_fetching: bool,
    pub last_fetch_successful: bool,
}

/// Commands sent to the rescue loop
#[derive(Debug, Clone)]
pub enum RescueCommand {
    /// Fetch the given edition
    Fetch(u64),
    /// Stop after the current fetch
    Stop,
}

/// Handle to drive a running rescue loop
pub struct RescuerHandle {
    command_tx: mpsc::UnboundedSender<RescueCommand>,
    status_tx: Arc<watch::Sender<RescueStatus>>,
    task: JoinHandle<()>,
}

impl RescuerHandle {
    pub fn status(&self) -> RescueStatus {
        *self.status_tx.borrow()
    }

    /// Watch the rescue state
    pub fn subscribe(&self) -> watch::Receiver<RescueStatus> {
        self.status_tx.subscribe()
    }

    pub fn current_edition(&self) -> u64 {
        self.status().current_edition
    }

    pub fn is_fetching(&self) -> bool {
        self.status().is_fetching
    }

    pub fn last_fetch_successful(&self) -> bool {
        self.status().last_fetch_successful
    }

    /// True if there is an older edition to try
    pub fn has_next_edition(&self) -> bool {
        self.current_edition() > 0
    }

    /// Fetch the edition before the current one
    ///
    /// Returns false if there is no older edition or a fetch is in flight.
    pub fn start_next_fetch(&self) -> bool {
        let current = self.current_edition();
        match current.checked_sub(1) {
            Some(target) => self.start_fetch(target),
            None => false,
        }
    }

    /// Fetch two editions back, skipping one known to be bad
    pub fn start_next_fetch_with_skip(&self) -> bool {
        let current = self.current_edition();
        match current.checked_sub(2) {
            Some(target) => self.start_fetch(target),
            None => false,
        }
    }

    /// Refused while another fetch is in flight
    fn start_fetch(&self, target: u64) -> bool {
        let started = self.status_tx.send_if_modified(|status| {
            if status.is_fetching {
                return false;
            }
            status.is_fetching = true;
            true
        });
        if !started {
            return false;
        }
        if self.command_tx.send(RescueCommand::Fetch(target)).is_err() {
            self.status_tx.send_modify(|status| status.is_fetching = false);
            return false;
        }
        true
    }

    /// Jump to an arbitrary edition; the next fetch starts below it
    pub fn set_edition(&self, edition: u64) {
        self.status_tx
            .send_modify(|status| status.current_edition = edition);
    }

    /// Request the loop to stop; a fetch in flight still completes
    pub fn stop(&self) {
        let _ = self.command_tx.send(RescueCommand::Stop);
    }

    /// Wait for the loop to finish
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("Rescue loop ended abnormally: {}", e);
        }
    }
}

/// Rescue loop of one identity
pub struct Rescuer {
    id: IdentityId,
    store: Arc<DocumentStore>,
    downloader: Downloader,
    diff: DiffProcessor,
    persistence: Arc<dyn Persistence>,
    events: EventBus,
}

impl Rescuer {
    pub fn new(
        id: IdentityId,
        store: Arc<DocumentStore>,
        downloader: Downloader,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        let events = store.events().clone();
        Self {
            id,
            store,
            downloader,
            diff: DiffProcessor::new(events.clone()),
            persistence,
            events,
        }
    }

    /// Spawn the loop, starting at the document's known edition
    pub async fn spawn(self) -> RescuerHandle {
        let current_edition = match self.store.slot(&self.id) {
            Some(slot) => slot.lock().await.edition(),
            None => 0,
        };
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, _status_rx) = watch::channel(RescueStatus {
            current_edition,
            is_fetching: false,
            last_fetch_successful: true,
        });
        let status_tx = Arc::new(status_tx);

        let task = tokio::spawn(self.run(command_rx, status_tx.clone()));

        RescuerHandle {
            command_tx,
            status_tx,
            task,
        }
    }

    async fn run(
        self,
        mut command_rx: mpsc::UnboundedReceiver<RescueCommand>,
        status_tx: Arc<watch::Sender<RescueStatus>>,
    ) {
        info!(id = %self.id, "Rescue loop started");

        while let Some(command) = command_rx.recv().await {
            match command {
                RescueCommand::Fetch(target) => {
                    let outcome = AssertUnwindSafe(self.fetch(target)).catch_unwind().await;
                    let successful = outcome.unwrap_or_else(|_| {
                        error!(id = %self.id, "Rescue fetch panicked");
                        false
                    });
                    status_tx.send_modify(|status| {
                        if successful {
                            status.current_edition = target;
                        }
                        status.last_fetch_successful = successful;
                        status.is_fetching = false;
                    });
                }
                RescueCommand::Stop => break,
            }
        }

        info!(id = %self.id, "Rescue loop stopped");
    }

    /// Fetch one edition under the document lock
    async fn fetch(&self, target: u64) -> bool {
        let Some(slot) = self.store.slot(&self.id) else {
            warn!(id = %self.id, "Cannot rescue an unknown identity");
            return false;
        };

        let mut guard = slot.lock().await;
        let address = guard.request_address().with_edition(target);
        info!(id = %self.id, %address, "Trying edition");

        let Some(document) = self.downloader.fetch(&self.id, &address).await else {
            warn!(id = %self.id, %address, "Edition is not usable");
            return false;
        };

        if guard.document().is_some() {
            self.diff.force_update(&mut guard, document);
        } else {
            guard.replace_document(document);
        }
        guard.set_locked(true);
        let state = guard.persisted_state();
        drop(guard);

        info!(id = %self.id, edition = target, "Rescued document");
        self.events.emit(CoreEvent::Rescued {
            id: self.id.clone(),
            edition: target,
        });
        self.persistence.touch(&state);
        true
    }
}
