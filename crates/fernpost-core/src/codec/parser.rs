//! Document parser
//!
//! Validates a payload and builds the complete document tree. Parsing is
//! all-or-nothing: the first violated rule aborts the whole parse and no
//! partially built document ever escapes.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use super::wire::{WireAlbum, WireDocument, WireImage, WireProfile};
use super::MAX_PROTOCOL_VERSION;
use crate::identity::{Address, IdentityId};
use crate::metrics::ParseMetrics;
use crate::models::{Album, Client, Document, Image, Post, Profile, ProfileField, Reply};

/// Placeholder used in errors for entries without an id
const NO_ID: &str = "<no id>";

/// Reasons a payload is rejected
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported protocol version {0}")]
    UnsupportedProtocol(i64),

    #[error("Missing document time")]
    MissingTime,

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Client name and version must be given together")]
    IncompleteClient,

    #[error("Missing profile")]
    MissingProfile,

    #[error("Profile field without a name")]
    UnnamedProfileField,

    #[error("Duplicate profile field '{0}'")]
    DuplicateProfileField(String),

    #[error("Invalid post {id}: {reason}")]
    InvalidPost { id: String, reason: &'static str },

    #[error("Duplicate post id '{0}'")]
    DuplicatePost(String),

    #[error("Invalid reply {id}: {reason}")]
    InvalidReply { id: String, reason: &'static str },

    #[error("Duplicate reply id '{0}'")]
    DuplicateReply(String),

    #[error("Invalid album {id}: {reason}")]
    InvalidAlbum { id: String, reason: &'static str },

    #[error("Duplicate album id '{0}'")]
    DuplicateAlbum(String),

    #[error("Album {album} refers to unknown parent {parent}")]
    UnknownParentAlbum { album: String, parent: String },

    #[error("Invalid image {id}: {reason}")]
    InvalidImage { id: String, reason: &'static str },

    #[error("Image {image} refers to unknown album {album}")]
    UnknownImageAlbum { image: String, album: String },
}

/// Parses payloads into documents
///
/// The default parser is used for editions fetched from the network. The
/// strict parser additionally requires album descriptions and is used for
/// locally persisted documents.
#[derive(Debug, Clone, Default)]
pub struct DocumentParser {
    strict: bool,
    metrics: Option<Arc<ParseMetrics>>,
}

impl DocumentParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self {
            strict: true,
            metrics: None,
        }
    }

    /// Record every parse outcome and the duration of successful ones
    pub fn with_metrics(mut self, metrics: Arc<ParseMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Parse a payload fetched from `address` for the identity `owner`
    pub fn parse(
        &self,
        owner: &IdentityId,
        address: &Address,
        bytes: &[u8],
    ) -> Result<Document, ParseError> {
        let started = Instant::now();
        let result = serde_json::from_slice::<WireDocument>(bytes)
            .map_err(ParseError::from)
            .and_then(|wire| self.build(owner, address, wire));
        if let Some(ref metrics) = self.metrics {
            match &result {
                Ok(_) => metrics.record(started.elapsed()),
                Err(_) => metrics.record_failure(),
            }
        }
        result
    }

    fn build(
        &self,
        owner: &IdentityId,
        address: &Address,
        wire: WireDocument,
    ) -> Result<Document, ParseError> {
        let protocol_version = wire.protocol_version.unwrap_or(0);
        if !(0..=i64::from(MAX_PROTOCOL_VERSION)).contains(&protocol_version) {
            return Err(ParseError::UnsupportedProtocol(protocol_version));
        }

        let time = timestamp(wire.time.ok_or(ParseError::MissingTime)?)?;

        let client = match wire.client {
            None => None,
            Some(client) => match (non_empty(&client.name), non_empty(&client.version)) {
                (Some(name), Some(version)) => Some(Client {
                    name: name.to_string(),
                    version: version.to_string(),
                }),
                (None, None) => None,
                _ => return Err(ParseError::IncompleteClient),
            },
        };

        let profile = parse_profile(wire.profile.ok_or(ParseError::MissingProfile)?)?;

        let mut posts = Vec::with_capacity(wire.posts.len());
        let mut post_ids = HashSet::new();
        for post in wire.posts {
            let invalid = |reason| ParseError::InvalidPost {
                id: post.id.clone().unwrap_or_else(|| NO_ID.to_string()),
                reason,
            };
            let id = non_empty(&post.id).ok_or_else(|| invalid("missing id"))?;
            let time = positive_time(post.time).ok_or_else(|| invalid("missing time"))?;
            let text = non_empty(&post.text).ok_or_else(|| invalid("missing text"))?;
            if !post_ids.insert(id.to_string()) {
                return Err(ParseError::DuplicatePost(id.to_string()));
            }
            posts.push(Post {
                id: id.to_string(),
                sender: owner.clone(),
                recipient: post.recipient.as_deref().and_then(IdentityId::parse),
                time: timestamp(time)?,
                text: text.to_string(),
            });
        }

        let mut replies = Vec::with_capacity(wire.replies.len());
        let mut reply_ids = HashSet::new();
        for reply in wire.replies {
            let invalid = |reason| ParseError::InvalidReply {
                id: reply.id.clone().unwrap_or_else(|| NO_ID.to_string()),
                reason,
            };
            let id = non_empty(&reply.id).ok_or_else(|| invalid("missing id"))?;
            let post_id = non_empty(&reply.post_id).ok_or_else(|| invalid("missing post id"))?;
            let time = positive_time(reply.time).ok_or_else(|| invalid("missing time"))?;
            let text = non_empty(&reply.text).ok_or_else(|| invalid("missing text"))?;
            if !reply_ids.insert(id.to_string()) {
                return Err(ParseError::DuplicateReply(id.to_string()));
            }
            replies.push(Reply {
                id: id.to_string(),
                post_id: post_id.to_string(),
                sender: owner.clone(),
                time: timestamp(time)?,
                text: text.to_string(),
            });
        }

        let liked_post_ids = non_blank(wire.liked_post_ids);
        let liked_reply_ids = non_blank(wire.liked_reply_ids);
        let friends = wire
            .friends
            .iter()
            .filter_map(|id| IdentityId::parse(id))
            .collect();

        let root_album = self.build_album_tree(owner, wire.albums, wire.images)?;

        Ok(Document {
            id: owner.clone(),
            address: address.clone(),
            time,
            protocol_version: protocol_version as u32,
            client,
            profile,
            posts,
            replies,
            liked_post_ids,
            liked_reply_ids,
            friends,
            root_album,
        })
    }

    /// Build the album tree below a fresh root album
    ///
    /// Albums must be listed after their parent; images may refer to any
    /// listed album.
    fn build_album_tree(
        &self,
        owner: &IdentityId,
        wire_albums: Vec<WireAlbum>,
        wire_images: Vec<WireImage>,
    ) -> Result<Album, ParseError> {
        let mut albums: Vec<Option<Album>> = Vec::with_capacity(wire_albums.len());
        let mut index: HashMap<String, usize> = HashMap::new();
        // children[0] belongs to the root, children[i + 1] to albums[i]
        let mut children: Vec<Vec<usize>> = vec![Vec::new()];

        for album in wire_albums {
            let invalid = |reason| ParseError::InvalidAlbum {
                id: album.id.clone().unwrap_or_else(|| NO_ID.to_string()),
                reason,
            };
            let id = non_empty(&album.id).ok_or_else(|| invalid("missing id"))?;
            let title = non_empty(&album.title).ok_or_else(|| invalid("missing title"))?;
            let description = match album.description.as_deref() {
                Some(description) => description.to_string(),
                None if self.strict => return Err(invalid("missing description")),
                None => String::new(),
            };
            if index.contains_key(id) {
                return Err(ParseError::DuplicateAlbum(id.to_string()));
            }
            let parent_slot = match non_empty(&album.parent) {
                None => 0,
                Some(parent) => match index.get(parent) {
                    Some(&position) => position + 1,
                    None => {
                        return Err(ParseError::UnknownParentAlbum {
                            album: id.to_string(),
                            parent: parent.to_string(),
                        })
                    }
                },
            };

            let position = albums.len();
            index.insert(id.to_string(), position);
            children[parent_slot].push(position);
            children.push(Vec::new());
            albums.push(Some(Album {
                id: id.to_string(),
                title: title.to_string(),
                description,
                album_image: non_empty(&album.album_image).map(str::to_string),
                albums: Vec::new(),
                images: Vec::new(),
            }));
        }

        for image in wire_images {
            let invalid = |reason| ParseError::InvalidImage {
                id: image.id.clone().unwrap_or_else(|| NO_ID.to_string()),
                reason,
            };
            let id = non_empty(&image.id).ok_or_else(|| invalid("missing id"))?;
            let album_id = non_empty(&image.album).ok_or_else(|| invalid("missing album"))?;
            let position =
                *index
                    .get(album_id)
                    .ok_or_else(|| ParseError::UnknownImageAlbum {
                        image: id.to_string(),
                        album: album_id.to_string(),
                    })?;
            let creation_time = image
                .creation_time
                .ok_or_else(|| invalid("missing creation time"))?;
            let key = non_empty(&image.key).ok_or_else(|| invalid("missing key"))?;
            let title = non_empty(&image.title).ok_or_else(|| invalid("missing title"))?;
            let description = image
                .description
                .as_deref()
                .ok_or_else(|| invalid("missing description"))?;
            let width = dimension(image.width).ok_or_else(|| invalid("missing width"))?;
            let height = dimension(image.height).ok_or_else(|| invalid("missing height"))?;

            let parsed = Image {
                id: id.to_string(),
                creation_time: timestamp(creation_time)?,
                key: key.to_string(),
                title: title.to_string(),
                description: description.to_string(),
                width,
                height,
            };
            if let Some(album) = albums[position].as_mut() {
                album.images.push(parsed);
            }
        }

        let mut root = Album::root(owner);
        root.albums = assemble(0, &mut albums, &children);
        Ok(root)
    }
}

/// Move the albums listed in `children[slot]` out of the arena, with their
/// own children attached
fn assemble(slot: usize, albums: &mut [Option<Album>], children: &[Vec<usize>]) -> Vec<Album> {
    let mut result = Vec::with_capacity(children[slot].len());
    for &position in &children[slot] {
        if let Some(mut album) = albums[position].take() {
            album.albums = assemble(position + 1, albums, children);
            result.push(album);
        }
    }
    result
}

fn parse_profile(wire: WireProfile) -> Result<Profile, ParseError> {
    let mut fields = Vec::with_capacity(wire.fields.len());
    let mut names = HashSet::new();
    for field in wire.fields {
        let name = non_empty(&field.name).ok_or(ParseError::UnnamedProfileField)?;
        if !names.insert(name.to_string()) {
            return Err(ParseError::DuplicateProfileField(name.to_string()));
        }
        fields.push(ProfileField {
            name: name.to_string(),
            value: field.value.unwrap_or_default(),
        });
    }

    Ok(Profile {
        first_name: wire.first_name,
        middle_name: wire.middle_name,
        last_name: wire.last_name,
        birth_day: wire.birth_day,
        birth_month: wire.birth_month,
        birth_year: wire.birth_year,
        avatar: wire.avatar,
        fields,
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

fn non_blank(ids: Vec<String>) -> BTreeSet<String> {
    ids.into_iter().filter(|id| !id.trim().is_empty()).collect()
}

fn positive_time(time: Option<i64>) -> Option<i64> {
    time.filter(|&t| t > 0)
}

fn dimension(value: Option<i64>) -> Option<u32> {
    value
        .filter(|&v| v > 0)
        .and_then(|v| u32::try_from(v).ok())
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>, ParseError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(ParseError::InvalidTimestamp(millis))
}
