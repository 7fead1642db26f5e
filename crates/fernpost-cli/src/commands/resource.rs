//! Resource command handler

use std::sync::Arc;

use anyhow::{bail, Result};

use fernpost_core::{Config, DirectoryStore, ResourceCache, ResourceLimits, ResourceState};

use crate::output::Output;

/// Load a linked resource and print what it turned out to be
pub async fn resolve(config: &Config, link: &str, output: &Output) -> Result<()> {
    let network = Arc::new(DirectoryStore::new(config.store_dir.clone()));
    let cache = ResourceCache::new(network, ResourceLimits::from_config(config));

    let state = cache.wait(link).await;
    if state == ResourceState::Failed {
        bail!("Could not load '{}'", link);
    }
    output.print_resource(link, &state);
    Ok(())
}
