//! Payload inspection commands

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use fernpost_core::{Address, Document, DocumentParser, Fingerprint, IdentityId, ParseMetrics};

use crate::output::Output;

/// Parse a payload file and print its summary
pub fn validate(path: &Path, owner: IdentityId, strict: bool, output: &Output) -> Result<()> {
    let metrics = Arc::new(ParseMetrics::new());
    let parser = if strict {
        DocumentParser::strict()
    } else {
        DocumentParser::new()
    }
    .with_metrics(metrics.clone());

    let document = read_payload(path, &owner, &parser)?;
    output.print_document(&document, Some(metrics.snapshot()));
    Ok(())
}

/// Print the content fingerprint of a payload file
pub fn fingerprint(path: &Path, owner: IdentityId, output: &Output) -> Result<()> {
    let document = read_payload(path, &owner, &DocumentParser::new())?;
    output.print_fingerprint(&Fingerprint::of(&document));
    Ok(())
}

/// Read and parse a payload file at edition 0 of a key named after the file
pub(crate) fn read_payload(
    path: &Path,
    owner: &IdentityId,
    parser: &DocumentParser,
) -> Result<Document> {
    let address = Address::new(path.display().to_string(), 0);
    parse_file(path, owner, &address, parser)
}

/// Read and parse a payload file as if fetched from `address`
pub(crate) fn parse_file(
    path: &Path,
    owner: &IdentityId,
    address: &Address,
    parser: &DocumentParser,
) -> Result<Document> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    parser
        .parse(owner, address, &bytes)
        .with_context(|| format!("{} is not a valid document", path.display()))
}
