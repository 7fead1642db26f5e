//! Document synchronization
//!
//! Moves documents between the local node and the network store:
//!
//! 1. [`EditionWatcher`] hears about a new edition of a followed identity
//! 2. [`Downloader`] fetches and parses it
//! 3. [`DiffProcessor`] reports what changed and replaces the stored document
//!
//! Local documents travel the other way: the [`Inserter`] publishes a new
//! edition once [`ModificationDetector`] says the content changed and has
//! settled. When the latest edition of a document is broken, the operator
//! drives a [`Rescuer`] backwards through older editions.
//!
//! ## Usage
//!
//! ```ignore
//! let inserter = Inserter::new(id, store, network, persistence, delay.subscribe()).spawn();
//! // ...
//! inserter.stop();
//! inserter.join().await;
//! ```

mod detector;
mod diff;
mod downloader;
mod inserter;
mod rescuer;
mod watcher;

pub use detector::ModificationDetector;
pub use diff::DiffProcessor;
pub use downloader::Downloader;
pub use inserter::{Inserter, InserterCommand, InserterHandle, InserterState};
pub use rescuer::{RescueCommand, RescueStatus, Rescuer, RescuerHandle};
pub use watcher::EditionWatcher;
