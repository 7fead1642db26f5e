//! Resource classification
//!
//! Turns a downloaded resource into metadata: dimensions for images, title
//! and description for HTML pages.

use scraper::{Html, Selector};
use serde::Serialize;

use super::dimensions;

/// What a loaded resource turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Image,
    Html,
}

/// Metadata extracted from a loaded resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceMetadata {
    Image {
        mime_type: String,
        width: u32,
        height: u32,
    },
    Html {
        title: Option<String>,
        description: Option<String>,
    },
}

impl ResourceMetadata {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceMetadata::Image { .. } => ResourceKind::Image,
            ResourceMetadata::Html { .. } => ResourceKind::Html,
        }
    }
}

/// Mime type without parameters, lowercased
pub(crate) fn base_mime_type(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub(crate) fn is_image(mime_type: &str) -> bool {
    base_mime_type(mime_type).starts_with("image/")
}

pub(crate) fn is_html(mime_type: &str) -> bool {
    base_mime_type(mime_type) == "text/html"
}

/// Classify a downloaded resource
///
/// Returns `None` for anything that is neither a decodable image nor HTML.
pub(crate) fn classify(mime_type: &str, data: &[u8]) -> Option<ResourceMetadata> {
    if is_image(mime_type) {
        image_metadata(mime_type, data)
    } else if is_html(mime_type) {
        Some(parse_html(&String::from_utf8_lossy(data)))
    } else {
        None
    }
}

fn image_metadata(mime_type: &str, data: &[u8]) -> Option<ResourceMetadata> {
    let (width, height) = dimensions::from_header(data)?;
    Some(ResourceMetadata::Image {
        mime_type: base_mime_type(mime_type),
        width,
        height,
    })
}

/// Parse title and description from HTML content
pub fn parse_html(html: &str) -> ResourceMetadata {
    let document = Html::parse_document(html);

    ResourceMetadata::Html {
        title: extract_title(&document),
        description: extract_description(&document),
    }
}

/// Extract title from HTML
fn extract_title(document: &Html) -> Option<String> {
    // Try og:title first
    if let Some(og_title) = extract_meta_content(document, "og:title") {
        return Some(og_title);
    }

    if let Some(twitter_title) = extract_meta_content(document, "twitter:title") {
        return Some(twitter_title);
    }

    // Fall back to <title> tag
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract description from HTML
fn extract_description(document: &Html) -> Option<String> {
    if let Some(og_desc) = extract_meta_content(document, "og:description") {
        return Some(og_desc);
    }

    if let Some(twitter_desc) = extract_meta_content(document, "twitter:description") {
        return Some(twitter_desc);
    }

    // Fall back to meta description
    let selector = Selector::parse(r#"meta[name="description"]"#).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract content from a meta tag by property or name
fn extract_meta_content(document: &Html, property: &str) -> Option<String> {
    ["property", "name"].iter().find_map(|attribute| {
        let selector = Selector::parse(&format!(r#"meta[{}="{}"]"#, attribute, property)).ok()?;
        document
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(str::trim)
            .filter(|content| !content.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
pub(crate) fn png_header(width: u32, height: u32) -> Vec<u8> {
    let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    data.extend_from_slice(&13u32.to_be_bytes());
    data.extend_from_slice(b"IHDR");
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&[8, 6, 0, 0, 0]);
    data
}
