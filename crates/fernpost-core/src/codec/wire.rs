//! Wire representation of a document
//!
//! Every field is optional on the way in so that the parser, not serde,
//! decides what is mandatory and reports exactly which rule was broken.

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<i64>,
    pub time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<WireClient>,
    pub profile: Option<WireProfile>,
    #[serde(default)]
    pub posts: Vec<WirePost>,
    #[serde(default)]
    pub replies: Vec<WireReply>,
    #[serde(default)]
    pub liked_post_ids: Vec<String>,
    #[serde(default)]
    pub liked_reply_ids: Vec<String>,
    #[serde(default)]
    pub friends: Vec<String>,
    #[serde(default)]
    pub albums: Vec<WireAlbum>,
    #[serde(default)]
    pub images: Vec<WireImage>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireClient {
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_day: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_month: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub fields: Vec<WireField>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireField {
    pub name: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WirePost {
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub time: Option<i64>,
    pub text: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireReply {
    pub id: Option<String>,
    pub post_id: Option<String>,
    pub time: Option<i64>,
    pub text: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireAlbum {
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_image: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireImage {
    pub id: Option<String>,
    pub album: Option<String>,
    pub creation_time: Option<i64>,
    pub key: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}
