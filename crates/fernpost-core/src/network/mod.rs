//! Network store interface
//!
//! The distributed, content-addressed publish store is an external
//! collaborator. This module defines what the core needs from it:
//!
//! - `fetch` / `insert`: block only the calling loop
//! - `start_background_fetch`: callback driven, completed on any thread
//! - `subscribe_to_edition_changes`: notifies when a newer edition appears
//!
//! Timeouts are the store's business; nothing here imposes one.
//!
//! [`DirectoryStore`] implements the interface over a local directory.

mod directory;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::codec::{self, ParseError, PAYLOAD_NAME};
use crate::identity::Address;
use crate::models::Document;

pub use directory::DirectoryStore;

/// Static page inserted next to every payload
const INDEX_HTML: &str = "<!DOCTYPE html>\n<html>\n<head><title>fernpost</title></head>\n\
<body><p>This edition was published by fernpost. \
The document itself is in <a href=\"document.json\">document.json</a>.</p></body>\n</html>\n";

/// Errors reported by a network store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Transient failure; retried at the caller's normal cadence
    #[error("Network failure for '{address}': {reason}")]
    Network { address: String, reason: String },

    #[error("Not found: '{0}'")]
    NotFound(String),

    #[error("Insert to '{target}' rejected: {reason}")]
    InsertRejected { target: String, reason: String },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Document would be rejected by readers: {0}")]
    Unpublishable(#[from] ParseError),
}

impl StoreError {
    /// Classify an I/O error, treating a missing file as not found
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(path.display().to_string()),
            _ => StoreError::Io {
                path,
                source: error,
            },
        }
    }
}

/// One file of a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// A named bundle of files produced for one insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Name of the entry served when the address is fetched
    pub default_entry: String,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Bundle the serialized document with its static assets
    ///
    /// Fails if the payload would not parse back.
    pub fn for_document(document: &Document) -> Result<Self, StoreError> {
        let payload = codec::serialize_checked(document)?;
        Ok(Self {
            default_entry: PAYLOAD_NAME.to_string(),
            entries: vec![
                ManifestEntry {
                    name: PAYLOAD_NAME.to_string(),
                    mime_type: "application/json".to_string(),
                    data: payload,
                },
                ManifestEntry {
                    name: "index.html".to_string(),
                    mime_type: "text/html".to_string(),
                    data: INDEX_HTML.as_bytes().to_vec(),
                },
            ],
        })
    }

    pub fn entry(&self, name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Data of the default entry
    pub fn payload(&self) -> Option<&[u8]> {
        self.entry(&self.default_entry).map(|e| e.data.as_slice())
    }
}

/// Callbacks of a background fetch
///
/// Exactly one of `loaded` or `failed` is called per fetch. A fetch that
/// `should_cancel` stops reports `failed`.
pub trait FetchHandler: Send + Sync + 'static {
    /// Called as content arrives; returning `true` aborts the download
    fn should_cancel(&self, mime_type: &str, size: u64) -> bool;

    fn loaded(&self, link: &str, mime_type: &str, data: Vec<u8>);

    fn failed(&self, link: &str);
}

/// Receives edition change notifications
pub trait EditionListener: Send + Sync + 'static {
    /// `is_new` is false for the edition reported when subscribing
    fn edition_found(&self, key: &str, edition: u64, is_new: bool);
}

/// Handle of an edition subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// The distributed publish store
#[async_trait]
pub trait NetworkStore: Send + Sync {
    /// Fetch the payload at an address
    async fn fetch(&self, address: &Address) -> Result<Vec<u8>, StoreError>;

    /// Insert a manifest, returning the address it ended up at
    async fn insert(&self, manifest: Manifest, target: &Address) -> Result<Address, StoreError>;

    /// Start fetching a resource link in the background
    fn start_background_fetch(&self, link: &str, handler: Arc<dyn FetchHandler>);

    fn subscribe_to_edition_changes(
        &self,
        key: &str,
        listener: Arc<dyn EditionListener>,
    ) -> SubscriptionHandle;

    fn unsubscribe(&self, handle: SubscriptionHandle);
}
