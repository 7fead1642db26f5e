//! Data models for fernpost
//!
//! Defines the document tree: profile, posts, replies, the album tree with
//! its images, and the social lists. A [`Document`] is always replaced as a
//! whole when a new edition is parsed; it is never patched in place from the
//! network.

use std::collections::BTreeSet;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::{Address, IdentityId};

/// Name and version of the client that produced a document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Client {
    pub name: String,
    pub version: String,
}

impl Client {
    /// The client identity written into every inserted document
    pub fn current() -> Self {
        Self {
            name: "fernpost".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A free-form profile field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileField {
    pub name: String,
    pub value: String,
}

/// Profile of the owning identity
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub birth_day: Option<u32>,
    pub birth_month: Option<u32>,
    pub birth_year: Option<i32>,
    /// Image id of the avatar
    pub avatar: Option<String>,
    /// Ordered fields, names unique
    pub fields: Vec<ProfileField>,
}

impl Profile {
    /// Add a field, refusing empty or duplicate names
    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        if name.trim().is_empty() || self.field(&name).is_some() {
            return false;
        }
        self.fields.push(ProfileField {
            name,
            value: value.into(),
        });
        true
    }

    /// Get a field value by name
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Remove a field by name
    pub fn remove_field(&mut self, name: &str) {
        self.fields.retain(|f| f.name != name);
    }
}

/// A post
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub sender: IdentityId,
    /// Identity this post is directed at, if any
    pub recipient: Option<IdentityId>,
    pub time: DateTime<Utc>,
    pub text: String,
}

impl Post {
    /// Create a new post with a random id
    ///
    /// `time` is truncated to the millisecond precision of the wire format.
    pub fn new(sender: IdentityId, time: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            recipient: None,
            time: time.trunc_subsecs(3),
            text: text.into(),
        }
    }

    pub fn with_recipient(mut self, recipient: IdentityId) -> Self {
        self.recipient = Some(recipient);
        self
    }
}

/// A reply to a post
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reply {
    pub id: String,
    pub post_id: String,
    pub sender: IdentityId,
    pub time: DateTime<Utc>,
    pub text: String,
}

impl Reply {
    /// Create a new reply with a random id
    pub fn new(
        sender: IdentityId,
        post_id: impl Into<String>,
        time: DateTime<Utc>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            post_id: post_id.into(),
            sender,
            time: time.trunc_subsecs(3),
            text: text.into(),
        }
    }
}

/// An image inside an album
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Image {
    pub id: String,
    pub creation_time: DateTime<Utc>,
    /// Address of the image data
    pub key: String,
    pub title: String,
    pub description: String,
    pub width: u32,
    pub height: u32,
}

/// An album; albums nest, forming a tree below the root album
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Album {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Image id used as the album cover
    pub album_image: Option<String>,
    pub albums: Vec<Album>,
    pub images: Vec<Image>,
}

impl Album {
    /// Create a new empty album with a random id
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            album_image: None,
            albums: Vec::new(),
            images: Vec::new(),
        }
    }

    /// The synthetic root album of a document
    ///
    /// The root is never serialized; top-level albums are its children.
    pub fn root(owner: &IdentityId) -> Self {
        Self {
            id: format!("{}-root", owner),
            title: String::new(),
            description: String::new(),
            album_image: None,
            albums: Vec::new(),
            images: Vec::new(),
        }
    }

    /// Depth-first walk over all descendant albums, parents before children
    ///
    /// Each album is yielded with the id of its parent, `None` for albums
    /// directly below `self`.
    pub fn descendants(&self) -> Vec<(Option<&str>, &Album)> {
        let mut result = Vec::new();
        collect_descendants(self, None, &mut result);
        result
    }

    /// All images in this album and its descendants
    pub fn all_images(&self) -> Vec<(&str, &Image)> {
        let mut images: Vec<_> = self.images.iter().map(|i| (self.id.as_str(), i)).collect();
        for (_, album) in self.descendants() {
            images.extend(album.images.iter().map(|i| (album.id.as_str(), i)));
        }
        images
    }

    /// Find an album by id in this subtree (including self)
    pub fn find(&self, id: &str) -> Option<&Album> {
        if self.id == id {
            return Some(self);
        }
        self.albums.iter().find_map(|a| a.find(id))
    }

    /// Find an album by id in this subtree (including self), mutably
    pub fn find_mut(&mut self, id: &str) -> Option<&mut Album> {
        if self.id == id {
            return Some(self);
        }
        self.albums.iter_mut().find_map(|a| a.find_mut(id))
    }
}

fn collect_descendants<'a>(
    album: &'a Album,
    parent: Option<&'a str>,
    out: &mut Vec<(Option<&'a str>, &'a Album)>,
) {
    for child in &album.albums {
        out.push((parent, child));
        collect_descendants(child, Some(child.id.as_str()), out);
    }
}

/// A versioned document owned by one identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: IdentityId,
    /// Request address; its edition is the current edition
    pub address: Address,
    /// Logical last-modified time
    pub time: DateTime<Utc>,
    pub protocol_version: u32,
    pub client: Option<Client>,
    pub profile: Profile,
    /// Posts in document order
    pub posts: Vec<Post>,
    /// Replies, unique by id
    pub replies: Vec<Reply>,
    pub liked_post_ids: BTreeSet<String>,
    pub liked_reply_ids: BTreeSet<String>,
    /// Followed identities
    pub friends: BTreeSet<IdentityId>,
    pub root_album: Album,
}

impl Document {
    /// Create an empty document for a new local identity
    pub fn new(id: IdentityId, address: Address) -> Self {
        let root_album = Album::root(&id);
        Self {
            id,
            address,
            time: Utc::now().trunc_subsecs(3),
            protocol_version: 0,
            client: None,
            profile: Profile::default(),
            posts: Vec::new(),
            replies: Vec::new(),
            liked_post_ids: BTreeSet::new(),
            liked_reply_ids: BTreeSet::new(),
            friends: BTreeSet::new(),
            root_album,
        }
    }

    /// The current edition
    pub fn edition(&self) -> u64 {
        self.address.edition
    }

    pub fn post(&self, id: &str) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == id)
    }

    pub fn reply(&self, id: &str) -> Option<&Reply> {
        self.replies.iter().find(|r| r.id == id)
    }

    pub fn post_ids(&self) -> BTreeSet<&str> {
        self.posts.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn reply_ids(&self) -> BTreeSet<&str> {
        self.replies.iter().map(|r| r.id.as_str()).collect()
    }

    /// Replies to the given post, oldest first
    pub fn replies_to(&self, post_id: &str) -> Vec<&Reply> {
        let mut replies: Vec<_> = self.replies.iter().filter(|r| r.post_id == post_id).collect();
        replies.sort_by_key(|r| r.time);
        replies
    }

    /// Add a post, ignoring ids that are already present
    pub fn add_post(&mut self, post: Post) {
        if self.post(&post.id).is_none() {
            self.posts.push(post);
        }
    }

    /// Add a reply, ignoring ids that are already present
    pub fn add_reply(&mut self, reply: Reply) {
        if self.reply(&reply.id).is_none() {
            self.replies.push(reply);
        }
    }

    pub fn remove_post(&mut self, id: &str) {
        self.posts.retain(|p| p.id != id);
    }

    pub fn remove_reply(&mut self, id: &str) {
        self.replies.retain(|r| r.id != id);
    }

    /// Add an album below the given parent (the root when `None`)
    ///
    /// Returns `false` if the parent does not exist.
    pub fn add_album(&mut self, parent: Option<&str>, album: Album) -> bool {
        let parent = match parent {
            Some(id) => self.root_album.find_mut(id),
            None => Some(&mut self.root_album),
        };
        match parent {
            Some(parent) => {
                parent.albums.push(album);
                true
            }
            None => false,
        }
    }

    /// Add an image to an album
    ///
    /// Returns `false` if the album does not exist or is the root album,
    /// which cannot hold images.
    pub fn add_image(&mut self, album_id: &str, image: Image) -> bool {
        if album_id == self.root_album.id {
            return false;
        }
        match self.root_album.find_mut(album_id) {
            Some(album) => {
                album.images.push(image);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Documents shared by the tests of several modules

    use chrono::TimeZone;

    use super::*;

    pub const OWNER: &str = "nwa8lHa271k2QvJ8aa0Ov7IHAV-DFOCFgmDt3X6BpCI";
    pub const FRIEND: &str = "3-ZWQ2oFkPe1VD6Ox0LRNnHFwAhCPe2mSd5zEbd26gU";

    pub fn owner() -> IdentityId {
        IdentityId::new_unchecked(OWNER)
    }

    pub fn friend() -> IdentityId {
        IdentityId::new_unchecked(FRIEND)
    }

    pub fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    pub fn post(id: &str, millis: i64) -> Post {
        Post {
            id: id.to_string(),
            sender: owner(),
            recipient: None,
            time: at(millis),
            text: format!("post {}", id),
        }
    }

    pub fn reply(id: &str, post_id: &str, millis: i64) -> Reply {
        Reply {
            id: id.to_string(),
            post_id: post_id.to_string(),
            sender: owner(),
            time: at(millis),
            text: format!("reply {}", id),
        }
    }

    pub fn image(id: &str) -> Image {
        Image {
            id: id.to_string(),
            creation_time: at(1_500),
            key: format!("CHK@{}/image.png", id),
            title: format!("Image {}", id),
            description: "an image".to_string(),
            width: 640,
            height: 480,
        }
    }

    /// An empty document at edition 1
    pub fn empty(millis: i64) -> Document {
        let mut doc = Document::new(owner(), Address::new("SSK@owner/fernpost", 1));
        doc.time = at(millis);
        doc
    }

    /// A document exercising every part of the tree
    pub fn full() -> Document {
        let mut doc = empty(10_000);
        doc.profile.first_name = Some("Ada".to_string());
        doc.profile.last_name = Some("Lovelace".to_string());
        doc.profile.birth_year = Some(1815);
        doc.profile.add_field("Homepage", "example.org");
        doc.profile.add_field("Pronouns", "they/them");

        doc.add_post(post("post-1", 1_000));
        doc.add_post(post("post-2", 2_000).with_recipient(friend()));
        doc.add_reply(reply("reply-1", "post-1", 1_100));
        doc.add_reply(reply("reply-2", "post-2", 2_100));

        doc.liked_post_ids.insert("remote-post".to_string());
        doc.liked_reply_ids.insert("remote-reply".to_string());
        doc.friends.insert(friend());

        let mut holiday = Album::new("Holiday", "Summer");
        holiday.id = "album-1".to_string();
        let mut beach = Album::new("Beach", "");
        beach.id = "album-2".to_string();
        doc.add_album(None, holiday);
        doc.add_album(Some("album-1"), beach);
        doc.add_image("album-1", image("image-1"));
        doc.add_image("album-2", image("image-2"));
        doc
    }
}
