//! Linked resource cache
//!
//! Posts link to images and pages. The [`ResourceCache`] loads each link at
//! most once at a time through the network store's background fetch and
//! remembers the outcome:
//!
//! ```text
//! (unknown) --request--> Loading --loaded--> Loaded   (kept for good)
//!                           |
//!                           +----failed----> Failed --request--> Loading
//! ```
//!
//! Downloads that are neither images nor HTML, or that are too large, are
//! cancelled as soon as the store reports their type and size.

mod dimensions;
mod metadata;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::Config;
use crate::network::{FetchHandler, NetworkStore};

pub use metadata::{parse_html, ResourceKind, ResourceMetadata};

/// Result of looking up a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "metadata", rename_all = "lowercase")]
pub enum ResourceState {
    Loading,
    Loaded(ResourceMetadata),
    Failed,
}

/// Size limits for linked resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_image_size: u64,
    pub max_html_size: u64,
}

impl ResourceLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_image_size: config.max_image_size,
            max_html_size: config.max_html_size,
        }
    }

    /// True if a download of this type and size should be abandoned
    fn should_cancel(&self, mime_type: &str, size: u64) -> bool {
        if metadata::is_image(mime_type) {
            size > self.max_image_size
        } else if metadata::is_html(mime_type) {
            size > self.max_html_size
        } else {
            true
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

enum Entry {
    Loading(Vec<oneshot::Sender<ResourceState>>),
    Loaded(ResourceMetadata),
    Failed,
}

struct Registry {
    entries: Mutex<HashMap<String, Entry>>,
    limits: ResourceLimits,
}

impl Registry {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the terminal state of a link and wake everyone waiting for it
    fn finish(&self, link: &str, state: ResourceState) {
        let entry = match &state {
            ResourceState::Loaded(metadata) => Entry::Loaded(metadata.clone()),
            _ => Entry::Failed,
        };
        let previous = self.entries().insert(link.to_string(), entry);

        if let Some(Entry::Loading(waiters)) = previous {
            for waiter in waiters {
                let _ = waiter.send(state.clone());
            }
        }
    }
}

/// Callbacks of one background fetch
struct ResourceFetch {
    registry: Arc<Registry>,
}

impl FetchHandler for ResourceFetch {
    fn should_cancel(&self, mime_type: &str, size: u64) -> bool {
        self.registry.limits.should_cancel(mime_type, size)
    }

    fn loaded(&self, link: &str, mime_type: &str, data: Vec<u8>) {
        let state = match metadata::classify(mime_type, &data) {
            Some(metadata) => {
                debug!(link, ?metadata, "Resource loaded");
                ResourceState::Loaded(metadata)
            }
            None => {
                debug!(link, mime_type, "Resource could not be classified");
                ResourceState::Failed
            }
        };
        self.registry.finish(link, state);
    }

    fn failed(&self, link: &str) {
        debug!(link, "Resource failed to load");
        self.registry.finish(link, ResourceState::Failed);
    }
}

/// Deduplicating cache of linked resources
#[derive(Clone)]
pub struct ResourceCache {
    network: Arc<dyn NetworkStore>,
    registry: Arc<Registry>,
}

impl ResourceCache {
    pub fn new(network: Arc<dyn NetworkStore>, limits: ResourceLimits) -> Self {
        Self {
            network,
            registry: Arc::new(Registry {
                entries: Mutex::new(HashMap::new()),
                limits,
            }),
        }
    }

    /// Look up a link, starting a download if it is unknown or failed
    pub fn request(&self, link: &str) -> ResourceState {
        {
            let mut entries = self.registry.entries();
            match entries.get(link) {
                Some(Entry::Loading(_)) => return ResourceState::Loading,
                Some(Entry::Loaded(metadata)) => return ResourceState::Loaded(metadata.clone()),
                Some(Entry::Failed) | None => {
                    entries.insert(link.to_string(), Entry::Loading(Vec::new()));
                }
            }
        }

        self.start_fetch(link);
        ResourceState::Loading
    }

    /// Wait until a link is loaded or failed
    ///
    /// An unknown link is requested first; a failed one is not retried.
    pub async fn wait(&self, link: &str) -> ResourceState {
        let (tx, rx) = oneshot::channel();
        let start = {
            let mut entries = self.registry.entries();
            match entries.get_mut(link) {
                Some(Entry::Loaded(metadata)) => return ResourceState::Loaded(metadata.clone()),
                Some(Entry::Failed) => return ResourceState::Failed,
                Some(Entry::Loading(waiters)) => {
                    waiters.push(tx);
                    false
                }
                None => {
                    entries.insert(link.to_string(), Entry::Loading(vec![tx]));
                    true
                }
            }
        };

        if start {
            self.start_fetch(link);
        }
        rx.await.unwrap_or(ResourceState::Failed)
    }

    fn start_fetch(&self, link: &str) {
        debug!(link, "Starting resource fetch");
        let handler = Arc::new(ResourceFetch {
            registry: self.registry.clone(),
        });
        self.network.start_background_fetch(link, handler);
    }
}
