//! Document serializer
//!
//! Produces the payload that [`super::DocumentParser`] reads back. The
//! current protocol version and this client's identity are always written,
//! whatever the document carried when it was parsed.

use super::wire::{
    WireAlbum, WireClient, WireDocument, WireField, WireImage, WirePost, WireProfile, WireReply,
};
use super::{DocumentParser, ParseError, MAX_PROTOCOL_VERSION};
use crate::models::{Client, Document};

/// Serialize a document into its wire payload
pub fn serialize(document: &Document) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec_pretty(&to_wire(document))
}

/// Serialize a document, refusing content a reader would reject
///
/// The payload is parsed back with the default parser, so anything inserted
/// this way is readable by every peer.
pub fn serialize_checked(document: &Document) -> Result<Vec<u8>, ParseError> {
    if let Some(image) = document.root_album.images.first() {
        return Err(ParseError::InvalidImage {
            id: image.id.clone(),
            reason: "not in an album",
        });
    }
    let bytes = serialize(document)?;
    DocumentParser::new().parse(&document.id, &document.address, &bytes)?;
    Ok(bytes)
}

fn to_wire(document: &Document) -> WireDocument {
    let client = Client::current();
    let profile = &document.profile;

    let albums = document
        .root_album
        .descendants()
        .into_iter()
        .map(|(parent, album)| WireAlbum {
            id: Some(album.id.clone()),
            parent: parent.map(str::to_string),
            title: Some(album.title.clone()),
            description: Some(album.description.clone()),
            album_image: album.album_image.clone(),
        })
        .collect();

    // Images of the synthetic root album have nowhere to go on the wire
    let images = document
        .root_album
        .all_images()
        .into_iter()
        .filter(|(album, _)| *album != document.root_album.id)
        .map(|(album, image)| WireImage {
            id: Some(image.id.clone()),
            album: Some(album.to_string()),
            creation_time: Some(image.creation_time.timestamp_millis()),
            key: Some(image.key.clone()),
            title: Some(image.title.clone()),
            description: Some(image.description.clone()),
            width: Some(i64::from(image.width)),
            height: Some(i64::from(image.height)),
        })
        .collect();

    WireDocument {
        protocol_version: Some(i64::from(MAX_PROTOCOL_VERSION)),
        time: Some(document.time.timestamp_millis()),
        client: Some(WireClient {
            name: Some(client.name),
            version: Some(client.version),
        }),
        profile: Some(WireProfile {
            first_name: profile.first_name.clone(),
            middle_name: profile.middle_name.clone(),
            last_name: profile.last_name.clone(),
            birth_day: profile.birth_day,
            birth_month: profile.birth_month,
            birth_year: profile.birth_year,
            avatar: profile.avatar.clone(),
            fields: profile
                .fields
                .iter()
                .map(|f| WireField {
                    name: Some(f.name.clone()),
                    value: Some(f.value.clone()),
                })
                .collect(),
        }),
        posts: document
            .posts
            .iter()
            .map(|p| WirePost {
                id: Some(p.id.clone()),
                recipient: p.recipient.as_ref().map(|r| r.to_string()),
                time: Some(p.time.timestamp_millis()),
                text: Some(p.text.clone()),
            })
            .collect(),
        replies: document
            .replies
            .iter()
            .map(|r| WireReply {
                id: Some(r.id.clone()),
                post_id: Some(r.post_id.clone()),
                time: Some(r.time.timestamp_millis()),
                text: Some(r.text.clone()),
            })
            .collect(),
        liked_post_ids: document.liked_post_ids.iter().cloned().collect(),
        liked_reply_ids: document.liked_reply_ids.iter().cloned().collect(),
        friends: document.friends.iter().map(|f| f.to_string()).collect(),
        albums,
        images,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::fixtures::*;
    use crate::models::{Album, Post, Reply};

    #[test]
    fn test_round_trip_preserves_content() {
        let original = full();
        let bytes = serialize(&original).unwrap();
        let parsed = DocumentParser::new()
            .parse(&original.id, &original.address, &bytes)
            .unwrap();

        assert_eq!(parsed.time, original.time);
        assert_eq!(parsed.profile, original.profile);
        assert_eq!(parsed.posts, original.posts);
        assert_eq!(parsed.replies, original.replies);
        assert_eq!(parsed.liked_post_ids, original.liked_post_ids);
        assert_eq!(parsed.liked_reply_ids, original.liked_reply_ids);
        assert_eq!(parsed.friends, original.friends);
        assert_eq!(parsed.root_album, original.root_album);
    }

    #[test]
    fn test_round_trip_through_strict_parser() {
        let original = full();
        let bytes = serialize(&original).unwrap();
        assert!(DocumentParser::strict()
            .parse(&original.id, &original.address, &bytes)
            .is_ok());
    }

    #[test]
    fn test_writes_current_client() {
        let bytes = serialize(&empty(1)).unwrap();
        let parsed = DocumentParser::new()
            .parse(&owner(), &empty(1).address, &bytes)
            .unwrap();
        assert_eq!(parsed.client, Some(Client::current()));
    }

    #[test]
    fn test_parents_written_before_children() {
        let bytes = serialize(&full()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let albums = value["albums"].as_array().unwrap();
        assert_eq!(albums[0]["id"], "album-1");
        assert!(albums[0].get("parent").is_none());
        assert_eq!(albums[1]["parent"], "album-1");
    }

    #[test]
    fn test_round_trip_of_locally_created_content() {
        let mut original = Document::new(owner(), empty(0).address);
        let post = Post::new(owner(), Utc::now(), "written just now");
        let reply = Reply::new(owner(), post.id.clone(), Utc::now(), "and answered");
        original.add_post(post);
        original.add_reply(reply);

        let bytes = serialize_checked(&original).unwrap();
        let parsed = DocumentParser::new()
            .parse(&original.id, &original.address, &bytes)
            .unwrap();

        assert_eq!(parsed.time, original.time);
        assert_eq!(parsed.posts, original.posts);
        assert_eq!(parsed.replies, original.replies);
    }

    #[test]
    fn test_checked_refuses_content_readers_reject() {
        let mut untitled = empty(1_000);
        assert!(untitled.add_album(None, Album::new("", "")));
        assert!(matches!(
            serialize_checked(&untitled),
            Err(ParseError::InvalidAlbum { .. })
        ));

        let mut blank_reply = full();
        blank_reply.replies[0].text = String::new();
        assert!(matches!(
            serialize_checked(&blank_reply),
            Err(ParseError::InvalidReply { .. })
        ));

        let mut flat_image = full();
        flat_image.root_album.albums[0].images[0].width = 0;
        assert!(matches!(
            serialize_checked(&flat_image),
            Err(ParseError::InvalidImage { .. })
        ));

        let mut root_image = full();
        root_image.root_album.images.push(image("loose"));
        assert!(matches!(
            serialize_checked(&root_image),
            Err(ParseError::InvalidImage { .. })
        ));

        assert!(serialize_checked(&full()).is_ok());
    }
}
