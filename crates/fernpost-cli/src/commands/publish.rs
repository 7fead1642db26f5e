//! Publish command handler
//!
//! Runs a local identity through the regular insert loop with no insertion
//! delay, so a published edition is exactly what the loop would produce.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use fernpost_core::{
    Address, Config, CoreEvent, DirectoryStore, DocumentParser, DocumentStore, EventBus,
    FilePersistence, IdentityId, Inserter, InsertionDelay,
};

use super::document::parse_file;
use crate::output::Output;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Insert a payload file as a new edition of `key`
///
/// Without an explicit edition the one after the latest stored edition is
/// used.
pub async fn publish(
    config: &Config,
    path: &Path,
    key: &str,
    edition: Option<u64>,
    owner: IdentityId,
    output: &Output,
) -> Result<()> {
    let network = Arc::new(DirectoryStore::new(config.store_dir.clone()));
    let target = match edition {
        Some(edition) => edition,
        None => network.latest_edition(key).map_or(1, |latest| latest + 1),
    };
    if target == 0 {
        bail!("Edition 0 cannot be published");
    }

    // The insert loop writes the edition after the one it holds
    let held = Address::new(key, target - 1);
    let document = parse_file(path, &owner, &held, &DocumentParser::new())?;

    let (events, mut rx) = EventBus::new();
    let store = Arc::new(DocumentStore::new(events));
    let slot = store.create_local(owner.clone(), key, key);
    slot.lock().await.replace_document(document);

    let persistence = Arc::new(FilePersistence::from_config(config));
    let delay = InsertionDelay::new(Duration::ZERO);
    let handle = Inserter::new(owner, store, network, persistence, delay.subscribe())
        .with_poll_interval(POLL_INTERVAL)
        .spawn();

    let outcome = wait_for_insert(&mut rx).await;
    handle.stop();
    handle.join().await;

    let (address, duration) = outcome?;
    info!(%address, "Published");
    output.print_published(&address, duration);
    Ok(())
}

async fn wait_for_insert(rx: &mut UnboundedReceiver<CoreEvent>) -> Result<(Address, Duration)> {
    while let Some(event) = rx.recv().await {
        match event {
            CoreEvent::Inserted {
                address, duration, ..
            } => return Ok((address, duration)),
            CoreEvent::InsertAborted { reason, .. } => bail!("Insert failed: {}", reason),
            _ => {}
        }
    }
    bail!("Insert loop ended before inserting")
}
