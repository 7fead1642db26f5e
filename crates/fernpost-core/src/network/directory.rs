//! Directory-backed network store
//!
//! Stores inserted editions and resources on the local filesystem:
//!
//! - `<root>/editions/<hex key>/<edition>/<entry>`: inserted manifests, with
//!   a `.default` file naming the default entry
//! - `<root>/<link>`: resources fetched in the background
//!
//! Useful for operating on a store snapshot, and as a reference for what a
//! real store implementation has to provide.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{EditionListener, FetchHandler, Manifest, NetworkStore, StoreError, SubscriptionHandle};
use crate::identity::Address;
use crate::storage::atomic_write;

/// Name of the file recording the default entry of an edition
const DEFAULT_ENTRY_FILE: &str = ".default";

type Subscriptions = HashMap<u64, (String, Arc<dyn EditionListener>)>;

/// Network store over a local directory
pub struct DirectoryStore {
    root: PathBuf,
    subscriptions: Mutex<Subscriptions>,
    next_subscription: AtomicU64,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        self.root.join("editions").join(hex::encode(key))
    }

    fn edition_dir(&self, address: &Address) -> PathBuf {
        self.key_dir(&address.key).join(address.edition.to_string())
    }

    /// Highest edition stored for a key
    pub fn latest_edition(&self, key: &str) -> Option<u64> {
        latest_edition_in(&self.key_dir(key))
    }

    /// Resolve a resource link to a path inside the root
    ///
    /// Links that would escape the root are refused.
    fn resource_path(&self, link: &str) -> Option<PathBuf> {
        let relative = Path::new(link.trim_start_matches('/'));
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        (safe && !link.is_empty()).then(|| self.root.join(relative))
    }

    fn notify(&self, key: &str, edition: u64) {
        let listeners: Vec<_> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|(k, _)| k == key)
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener.edition_found(key, edition, true);
        }
    }
}

fn latest_edition_in(dir: &Path) -> Option<u64> {
    fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u64>().ok())
        .max()
}

/// Guess a mime type from a file extension
pub(crate) fn mime_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn read_edition(dir: &Path) -> Result<Vec<u8>, StoreError> {
    let default_path = dir.join(DEFAULT_ENTRY_FILE);
    let default_entry = fs::read_to_string(&default_path)
        .map_err(|e| StoreError::from_io(e, default_path.clone()))?;
    let payload_path = dir.join(default_entry.trim());
    fs::read(&payload_path).map_err(|e| StoreError::from_io(e, payload_path))
}

fn write_edition(dir: &Path, manifest: &Manifest) -> Result<(), StoreError> {
    fs::create_dir_all(dir).map_err(|e| StoreError::from_io(e, dir.to_path_buf()))?;
    for entry in &manifest.entries {
        let path = dir.join(&entry.name);
        atomic_write(&path, &entry.data).map_err(|e| StoreError::from_io(e, path.clone()))?;
    }
    let default_path = dir.join(DEFAULT_ENTRY_FILE);
    atomic_write(&default_path, manifest.default_entry.as_bytes())
        .map_err(|e| StoreError::from_io(e, default_path))
}

fn join_error(address: &Address, error: tokio::task::JoinError) -> StoreError {
    StoreError::Network {
        address: address.to_string(),
        reason: error.to_string(),
    }
}

#[async_trait]
impl NetworkStore for DirectoryStore {
    async fn fetch(&self, address: &Address) -> Result<Vec<u8>, StoreError> {
        let dir = self.edition_dir(address);
        debug!("Fetching {} from {:?}", address, dir);
        tokio::task::spawn_blocking(move || read_edition(&dir))
            .await
            .map_err(|e| join_error(address, e))?
    }

    async fn insert(&self, manifest: Manifest, target: &Address) -> Result<Address, StoreError> {
        if manifest.payload().is_none() {
            return Err(StoreError::InsertRejected {
                target: target.to_string(),
                reason: format!("default entry '{}' is missing", manifest.default_entry),
            });
        }

        // An occupied edition is never overwritten; the insert moves past it
        let edition = match self.latest_edition(&target.key) {
            Some(latest) if latest >= target.edition => latest + 1,
            _ => target.edition,
        };
        let address = target.with_edition(edition);
        let dir = self.edition_dir(&address);

        tokio::task::spawn_blocking(move || write_edition(&dir, &manifest))
            .await
            .map_err(|e| join_error(&address, e))??;

        debug!("Inserted {}", address);
        self.notify(&address.key, address.edition);
        Ok(address)
    }

    fn start_background_fetch(&self, link: &str, handler: Arc<dyn FetchHandler>) {
        let link = link.to_string();
        let path = self.resource_path(&link);

        std::thread::spawn(move || {
            let Some(path) = path else {
                warn!("Refusing to fetch link outside the store: {}", link);
                handler.failed(&link);
                return;
            };
            let mime_type = mime_type_for(&path);
            let mime_type = mime_type.as_str();
            let size = match fs::metadata(&path) {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    debug!("Background fetch of {} failed: {}", link, e);
                    handler.failed(&link);
                    return;
                }
            };
            if handler.should_cancel(mime_type, 0) || handler.should_cancel(mime_type, size) {
                debug!("Background fetch of {} cancelled ({}, {} bytes)", link, mime_type, size);
                handler.failed(&link);
                return;
            }
            match fs::read(&path) {
                Ok(data) => handler.loaded(&link, mime_type, data),
                Err(e) => {
                    debug!("Background fetch of {} failed: {}", link, e);
                    handler.failed(&link);
                }
            }
        });
    }

    fn subscribe_to_edition_changes(
        &self,
        key: &str,
        listener: Arc<dyn EditionListener>,
    ) -> SubscriptionHandle {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, (key.to_string(), listener.clone()));

        if let Some(latest) = self.latest_edition(key) {
            listener.edition_found(key, latest, false);
        }
        SubscriptionHandle(id)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.0);
    }
}
