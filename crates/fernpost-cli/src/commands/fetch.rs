//! Fetch command handler

use std::sync::Arc;

use anyhow::{Context, Result};

use fernpost_core::{
    Address, Config, DirectoryStore, DocumentParser, Downloader, IdentityId, ParseMetrics,
};

use crate::output::Output;

/// Fetch one edition from the store and print its summary
pub async fn fetch(
    config: &Config,
    key: &str,
    edition: u64,
    owner: IdentityId,
    output: &Output,
) -> Result<()> {
    let network = Arc::new(DirectoryStore::new(config.store_dir.clone()));
    let metrics = Arc::new(ParseMetrics::new());
    let downloader = Downloader::new(network, DocumentParser::new().with_metrics(metrics.clone()));

    let address = Address::new(key, edition);
    let document = downloader
        .fetch(&owner, &address)
        .await
        .with_context(|| format!("Edition {} is missing or not a valid document", address))?;

    output.print_document(&document, Some(metrics.snapshot()));
    Ok(())
}
