//! Content fingerprints
//!
//! A [`Fingerprint`] is a SHA-256 digest over every piece of mutable content
//! of a document: profile, posts, replies, likes, friends and the album tree.
//! The document time, edition and client are not part of it, so inserting
//! the same content twice yields the same fingerprint.
//!
//! Lists are hashed in order. Sets (replies, likes, friends) are hashed in
//! sorted order so two documents with equal content always agree.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::models::{Album, Document, Profile};

/// Digest of the mutable content of a document
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Compute the fingerprint of a document
    pub fn of(document: &Document) -> Self {
        let mut hasher = FieldHasher::default();

        hasher.section("profile");
        hash_profile(&mut hasher, &document.profile);

        hasher.section("posts");
        for post in &document.posts {
            hasher.str(&post.id);
            hasher.opt(post.recipient.as_ref().map(|r| r.as_str()));
            hasher.int(post.time.timestamp_millis());
            hasher.str(&post.text);
        }

        hasher.section("replies");
        let mut replies: Vec<_> = document.replies.iter().collect();
        replies.sort_by(|a, b| a.id.cmp(&b.id));
        for reply in replies {
            hasher.str(&reply.id);
            hasher.str(&reply.post_id);
            hasher.int(reply.time.timestamp_millis());
            hasher.str(&reply.text);
        }

        hasher.section("liked-posts");
        for id in &document.liked_post_ids {
            hasher.str(id);
        }

        hasher.section("liked-replies");
        for id in &document.liked_reply_ids {
            hasher.str(id);
        }

        hasher.section("friends");
        for id in &document.friends {
            hasher.str(id.as_str());
        }

        hasher.section("albums");
        hash_album(&mut hasher, &document.root_album);

        Self(hasher.finish())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

fn hash_profile(hasher: &mut FieldHasher, profile: &Profile) {
    hasher.opt(profile.first_name.as_deref());
    hasher.opt(profile.middle_name.as_deref());
    hasher.opt(profile.last_name.as_deref());
    hasher.opt_int(profile.birth_day.map(i64::from));
    hasher.opt_int(profile.birth_month.map(i64::from));
    hasher.opt_int(profile.birth_year.map(i64::from));
    hasher.opt(profile.avatar.as_deref());
    for field in &profile.fields {
        hasher.str(&field.name);
        hasher.str(&field.value);
    }
}

fn hash_album(hasher: &mut FieldHasher, album: &Album) {
    hasher.str(&album.id);
    hasher.str(&album.title);
    hasher.str(&album.description);
    hasher.opt(album.album_image.as_deref());
    for image in &album.images {
        hasher.str(&image.id);
        hasher.int(image.creation_time.timestamp_millis());
        hasher.str(&image.key);
        hasher.str(&image.title);
        hasher.str(&image.description);
        hasher.int(i64::from(image.width));
        hasher.int(i64::from(image.height));
    }
    hasher.int(album.albums.len() as i64);
    for child in &album.albums {
        hash_album(hasher, child);
    }
}

/// Length-prefixed field writer, so that adjacent fields cannot run together
#[derive(Default)]
struct FieldHasher(Sha256);

impl FieldHasher {
    fn section(&mut self, name: &str) {
        self.0.update([0xff]);
        self.str(name);
    }

    fn str(&mut self, value: &str) {
        self.0.update((value.len() as u64).to_be_bytes());
        self.0.update(value.as_bytes());
    }

    fn opt(&mut self, value: Option<&str>) {
        match value {
            Some(value) => {
                self.0.update([1]);
                self.str(value);
            }
            None => self.0.update([0]),
        }
    }

    fn int(&mut self, value: i64) {
        self.0.update(value.to_be_bytes());
    }

    fn opt_int(&mut self, value: Option<i64>) {
        match value {
            Some(value) => {
                self.0.update([1]);
                self.int(value);
            }
            None => self.0.update([0]),
        }
    }

    fn finish(self) -> [u8; 32] {
        self.0.finalize().into()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &hex::encode(self.0)[..12])
    }
}

impl FromStr for Fingerprint {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
