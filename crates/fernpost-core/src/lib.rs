//! fernpost Core Library
//!
//! This crate keeps self-published social documents (a profile, posts,
//! replies, an album tree and social lists owned by one identity) in sync
//! with a distributed, versioned publish store.
//!
//! # Architecture
//!
//! - **Remote documents**: a new edition is fetched, validated as a whole,
//!   diffed against the stored document and then replaces it
//! - **Local documents**: edits are debounced and published as a new edition
//! - **Rescue**: an operator walks back through older editions when the
//!   latest one is unusable
//! - **Linked resources**: images and pages linked from posts are loaded
//!   once and cached
//!
//! # Quick Start
//!
//! ```text
//! let (events, mut rx) = EventBus::new();
//! let store = Arc::new(DocumentStore::new(events));
//! let network = Arc::new(DirectoryStore::new(config.store_dir.clone()));
//!
//! store.create_local(id.clone(), key, insert_key);
//! let delay = InsertionDelay::from_config(&config);
//! let inserter = Inserter::new(id, store, network, persistence, delay.subscribe()).spawn();
//! ```
//!
//! # Modules
//!
//! - `store`: Per-document locked storage (main entry point)
//! - `models`: The document tree
//! - `codec`: Payload parser and serializer
//! - `sync`: Fetch, diff, insert and rescue loops
//! - `resource`: Linked resource cache
//! - `network`: The publish store interface and a directory-backed store
//! - `storage`: State persistence
//! - `config`: Application configuration

pub mod codec;
pub mod config;
pub mod events;
pub mod fingerprint;
pub mod identity;
pub mod metrics;
pub mod models;
pub mod network;
pub mod resource;
pub mod storage;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

pub use codec::{DocumentParser, ParseError};
pub use config::{Config, InsertionDelay};
pub use events::{CoreEvent, EventBus};
pub use fingerprint::Fingerprint;
pub use identity::{Address, IdentityError, IdentityId};
pub use metrics::{ParseMetrics, ParseStats};
pub use models::{Album, Client, Document, Image, Post, Profile, ProfileField, Reply};
pub use network::{DirectoryStore, Manifest, NetworkStore, StoreError};
pub use resource::{ResourceCache, ResourceLimits, ResourceMetadata, ResourceState};
pub use storage::{FilePersistence, PersistedState, Persistence, PersistenceError};
pub use store::{DocumentSlot, DocumentStore, SharedSlot};
pub use sync::{
    DiffProcessor, Downloader, EditionWatcher, Inserter, InserterHandle, ModificationDetector,
    RescueStatus, Rescuer, RescuerHandle,
};
