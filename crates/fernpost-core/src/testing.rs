//! Test doubles shared by the unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::codec;
use crate::identity::Address;
use crate::models::Document;
use crate::network::{
    EditionListener, FetchHandler, Manifest, NetworkStore, StoreError, SubscriptionHandle,
};
use crate::storage::{PersistedState, Persistence};

/// Scripted in-memory network store
#[derive(Default)]
pub(crate) struct MockStore {
    payloads: Mutex<HashMap<Address, Vec<u8>>>,
    fetches: Mutex<Vec<Address>>,
    inserted: Mutex<Vec<(Manifest, Address)>>,
    insert_failures: AtomicUsize,
    insert_gate: Mutex<Option<Arc<Notify>>>,
    background: Mutex<Vec<(String, Arc<dyn FetchHandler>)>>,
    background_started: Mutex<Vec<String>>,
    listeners: Mutex<HashMap<u64, (String, Arc<dyn EditionListener>)>>,
    next_subscription: AtomicU64,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve a document at an address
    pub fn publish(&self, address: &Address, document: &Document) {
        let bytes = codec::serialize(document).unwrap();
        self.put(address, bytes);
    }

    /// Serve raw bytes at an address
    pub fn put(&self, address: &Address, bytes: impl Into<Vec<u8>>) {
        self.payloads
            .lock()
            .unwrap()
            .insert(address.clone(), bytes.into());
    }

    pub fn fetches(&self) -> Vec<Address> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn inserted(&self) -> Vec<(Manifest, Address)> {
        self.inserted.lock().unwrap().clone()
    }

    /// Make the next `count` inserts fail
    pub fn fail_inserts(&self, count: usize) {
        self.insert_failures.store(count, Ordering::SeqCst);
    }

    /// Hold every insert until the returned gate is notified
    pub fn gate_inserts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.insert_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Number of background fetches started for a link
    pub fn background_fetches(&self, link: &str) -> usize {
        self.background_started
            .lock()
            .unwrap()
            .iter()
            .filter(|l| *l == link)
            .count()
    }

    /// Finish the pending background fetches of a link with content
    pub fn complete(&self, link: &str, mime_type: &str, data: &[u8]) {
        for handler in self.take_pending(link) {
            if handler.should_cancel(mime_type, data.len() as u64) {
                handler.failed(link);
            } else {
                handler.loaded(link, mime_type, data.to_vec());
            }
        }
    }

    /// Fail the pending background fetches of a link
    pub fn fail(&self, link: &str) {
        for handler in self.take_pending(link) {
            handler.failed(link);
        }
    }

    fn take_pending(&self, link: &str) -> Vec<Arc<dyn FetchHandler>> {
        let mut background = self.background.lock().unwrap();
        let (matching, rest): (Vec<_>, Vec<_>) =
            background.drain(..).partition(|(l, _)| l == link);
        *background = rest;
        matching.into_iter().map(|(_, handler)| handler).collect()
    }

    /// Report a new edition to every subscriber of a key
    pub fn announce(&self, key: &str, edition: u64) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap()
            .values()
            .filter(|(k, _)| k == key)
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener.edition_found(key, edition, true);
        }
    }

    pub fn subscriptions(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

#[async_trait]
impl NetworkStore for MockStore {
    async fn fetch(&self, address: &Address) -> Result<Vec<u8>, StoreError> {
        self.fetches.lock().unwrap().push(address.clone());
        self.payloads
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(address.to_string()))
    }

    async fn insert(&self, manifest: Manifest, target: &Address) -> Result<Address, StoreError> {
        let gate = self.insert_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let failing = self
            .insert_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Network {
                address: target.to_string(),
                reason: "scripted failure".to_string(),
            });
        }

        if let Some(payload) = manifest.payload() {
            self.put(target, payload.to_vec());
        }
        self.inserted
            .lock()
            .unwrap()
            .push((manifest, target.clone()));
        Ok(target.clone())
    }

    fn start_background_fetch(&self, link: &str, handler: Arc<dyn FetchHandler>) {
        self.background_started
            .lock()
            .unwrap()
            .push(link.to_string());
        self.background
            .lock()
            .unwrap()
            .push((link.to_string(), handler));
    }

    fn subscribe_to_edition_changes(
        &self,
        key: &str,
        listener: Arc<dyn EditionListener>,
    ) -> SubscriptionHandle {
        let handle = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .unwrap()
            .insert(handle, (key.to_string(), listener));
        SubscriptionHandle(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.listeners.lock().unwrap().remove(&handle.0);
    }
}

/// Persistence that remembers every touch
#[derive(Default)]
pub(crate) struct RecordingPersistence {
    touched: Mutex<Vec<PersistedState>>,
}

impl RecordingPersistence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn touched(&self) -> Vec<PersistedState> {
        self.touched.lock().unwrap().clone()
    }
}

impl Persistence for RecordingPersistence {
    fn touch(&self, state: &PersistedState) {
        self.touched.lock().unwrap().push(state.clone());
    }
}
