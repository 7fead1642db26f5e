//! Rescue command handler

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tracing::info;

use fernpost_core::{
    Config, DirectoryStore, DocumentParser, DocumentStore, Downloader, EventBus, FilePersistence,
    IdentityId, Rescuer, RescuerHandle,
};

use crate::output::Output;

/// Walk back from a broken edition until one parses
///
/// The rescued document is locked and saved with the identity's state, so
/// the next start keeps it instead of the broken edition.
pub async fn rescue(
    config: &Config,
    key: &str,
    from: u64,
    skip: bool,
    owner: IdentityId,
    output: &Output,
) -> Result<()> {
    let network = Arc::new(DirectoryStore::new(config.store_dir.clone()));
    let persistence = Arc::new(FilePersistence::from_config(config));
    let (events, _rx) = EventBus::new();
    let store = Arc::new(DocumentStore::new(events));

    match persistence.load(&owner)? {
        Some(state) if state.request_key == key => {
            store
                .restore(&state)
                .context("Saved state of this identity is damaged")?;
        }
        _ => {
            store.follow(owner.clone(), key, Utc::now()).await;
        }
    }

    let downloader = Downloader::new(network, DocumentParser::new());
    let handle = Rescuer::new(owner.clone(), store.clone(), downloader, persistence)
        .spawn()
        .await;
    handle.set_edition(from);

    let outcome = walk(&handle, skip, output).await;
    handle.stop();
    handle.join().await;

    let edition = outcome?.ok_or_else(|| anyhow!("No usable edition below {}", from))?;
    info!(id = %owner, edition, "Rescue finished");

    let slot = store
        .slot(&owner)
        .context("Identity disappeared during rescue")?;
    let guard = slot.lock().await;
    let document = guard
        .document()
        .context("Rescue finished without a document")?;
    output.print_document(document, None);
    Ok(())
}

/// Try older editions one by one, returning the first usable one
async fn walk(handle: &RescuerHandle, skip: bool, output: &Output) -> Result<Option<u64>> {
    let mut status_rx = handle.subscribe();
    let mut skip = skip;

    loop {
        let step = if skip { 2 } else { 1 };
        let Some(target) = handle.current_edition().checked_sub(step) else {
            return Ok(None);
        };
        let started = if skip {
            handle.start_next_fetch_with_skip()
        } else {
            handle.start_next_fetch()
        };
        if !started {
            return Ok(None);
        }
        skip = false;

        let status = *status_rx
            .wait_for(|status| !status.is_fetching)
            .await
            .context("Rescue loop stopped unexpectedly")?;
        if status.last_fetch_successful {
            return Ok(Some(target));
        }

        output.message(&format!("Edition {} is not usable", target));
        handle.set_edition(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::document::parse_file;
    use crate::commands::test_support::{config, write_payload, KEY};
    use crate::output::OutputFormat;
    use fernpost_core::{Address, Manifest, NetworkStore};
    use tempfile::TempDir;

    async fn publish_raw(config: &Config, owner: &IdentityId, edition: u64) {
        let dir = TempDir::new().unwrap();
        let path = write_payload(dir.path());
        let address = Address::new(KEY, edition);
        let document = parse_file(&path, owner, &address, &DocumentParser::new()).unwrap();
        DirectoryStore::new(config.store_dir.clone())
            .insert(Manifest::for_document(&document).unwrap(), &address)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rescue_walks_past_missing_editions() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let owner = IdentityId::derive(KEY);
        publish_raw(&config, &owner, 1).await;

        let output = Output::new(OutputFormat::Quiet);
        rescue(&config, KEY, 4, false, owner.clone(), &output)
            .await
            .unwrap();

        let state = FilePersistence::from_config(&config)
            .load(&owner)
            .unwrap()
            .unwrap();
        assert_eq!(state.latest_edition, 1);
        assert!(state.following_since.is_some());
        assert!(!state.locked);
    }

    #[tokio::test]
    async fn test_rescue_locks_local_identity() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let owner = IdentityId::derive(KEY);
        let path = write_payload(dir.path());
        let output = Output::new(OutputFormat::Quiet);

        for _ in 0..2 {
            crate::commands::publish::publish(&config, &path, KEY, None, owner.clone(), &output)
                .await
                .unwrap();
        }

        rescue(&config, KEY, 2, false, owner.clone(), &output)
            .await
            .unwrap();

        let state = FilePersistence::from_config(&config)
            .load(&owner)
            .unwrap()
            .unwrap();
        assert_eq!(state.latest_edition, 1);
        assert!(state.locked);
        assert_eq!(state.insert_key.as_deref(), Some(KEY));
    }

    #[tokio::test]
    async fn test_rescue_with_skip() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let owner = IdentityId::derive(KEY);
        publish_raw(&config, &owner, 2).await;
        publish_raw(&config, &owner, 3).await;

        let output = Output::new(OutputFormat::Quiet);
        rescue(&config, KEY, 4, true, owner.clone(), &output)
            .await
            .unwrap();

        let state = FilePersistence::from_config(&config)
            .load(&owner)
            .unwrap()
            .unwrap();
        assert_eq!(state.latest_edition, 2);
    }

    #[tokio::test]
    async fn test_rescue_without_usable_edition() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());

        let output = Output::new(OutputFormat::Quiet);
        let err = rescue(&config, KEY, 3, false, IdentityId::derive(KEY), &output)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No usable edition below 3"));
    }
}
