//! Document wire format
//!
//! A document travels as a single JSON payload. The parser validates it and
//! builds the linked document tree; the serializer writes it back out.
//!
//! ## Payload
//!
//! ```text
//! {
//!   "protocol_version": 0,
//!   "time": 1700000000000,
//!   "client": { "name": "fernpost", "version": "0.3.0" },
//!   "profile": { "first_name": "...", "fields": [{ "name": "...", "value": "..." }] },
//!   "posts": [{ "id": "...", "recipient": "...", "time": 0, "text": "..." }],
//!   "replies": [{ "id": "...", "post_id": "...", "time": 0, "text": "..." }],
//!   "liked_post_ids": [], "liked_reply_ids": [], "friends": [],
//!   "albums": [{ "id": "...", "parent": "...", "title": "...", "description": "..." }],
//!   "images": [{ "id": "...", "album": "...", "creation_time": 0, "key": "...",
//!                "title": "...", "description": "...", "width": 1, "height": 1 }]
//! }
//! ```
//!
//! Albums are listed parents first; an album without `parent` hangs off the
//! root album.

mod parser;
mod serializer;
mod wire;

pub use parser::{DocumentParser, ParseError};
pub use serializer::{serialize, serialize_checked};

/// Highest protocol version this crate understands
pub const MAX_PROTOCOL_VERSION: u32 = 0;

/// File name of the payload inside an inserted manifest
pub const PAYLOAD_NAME: &str = "document.json";
