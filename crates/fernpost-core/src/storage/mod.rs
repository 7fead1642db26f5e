//! Storage layer
//!
//! Persists the insert-relevant state of every known identity so a restart
//! resumes where the previous run stopped.
//!
//! ## Layout
//!
//! ```text
//! <data_dir>/state/<identity id>.toml
//! ```
//!
//! Each file holds the latest edition, the fingerprint of the last
//! successful insert, the insertion lock flag, the follow bookkeeping and,
//! for local identities, the serialized document itself. Files are replaced
//! atomically so a crash never leaves a half-written state behind.

pub mod error;
pub mod persistence;

pub use error::PersistenceError;
pub use persistence::{FilePersistence, PersistedState, Persistence};

pub(crate) use persistence::atomic_write;
