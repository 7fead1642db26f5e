//! Single fetch-and-parse attempt

use std::sync::Arc;

use tracing::{debug, info};

use crate::codec::DocumentParser;
use crate::identity::{Address, IdentityId};
use crate::models::Document;
use crate::network::NetworkStore;

/// Fetches one edition and parses it
///
/// A network failure and an unusable payload look the same to the caller:
/// there is no usable edition this round. Retrying is the caller's business.
#[derive(Clone)]
pub struct Downloader {
    network: Arc<dyn NetworkStore>,
    parser: DocumentParser,
}

impl Downloader {
    pub fn new(network: Arc<dyn NetworkStore>, parser: DocumentParser) -> Self {
        Self { network, parser }
    }

    /// Fetch and parse the edition at `address` for the identity `owner`
    pub async fn fetch(&self, owner: &IdentityId, address: &Address) -> Option<Document> {
        debug!(%owner, %address, "Fetching edition");

        let bytes = match self.network.fetch(address).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(%owner, %address, "Fetch failed: {}", e);
                return None;
            }
        };

        match self.parser.parse(owner, address, &bytes) {
            Ok(document) => Some(document),
            Err(e) => {
                info!(%owner, %address, "Discarding unusable edition: {}", e);
                None
            }
        }
    }
}
