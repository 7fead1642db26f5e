//! Edition diffing
//!
//! Compares a freshly fetched document with the stored one, reports what
//! appeared and what disappeared, then replaces the stored document as a
//! whole.
//!
//! Events for one document always come in the same order: removed replies,
//! removed posts, new posts, new replies, then the update itself.

use std::collections::BTreeSet;

use tracing::debug;

use crate::events::{CoreEvent, EventBus};
use crate::models::Document;
use crate::store::DocumentSlot;

/// Applies fetched editions to document slots
#[derive(Debug, Clone)]
pub struct DiffProcessor {
    events: EventBus,
}

impl DiffProcessor {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }

    /// Apply a newer edition
    ///
    /// Does nothing if the slot has no document yet (first sight is
    /// onboarding, not an update) or if `document` is not newer than the
    /// stored one. Returns whether the stored document was replaced.
    pub fn update(&self, slot: &mut DocumentSlot, document: Document) -> bool {
        let Some(stored) = slot.document() else {
            debug!(id = %slot.id(), "No stored document, not diffing");
            return false;
        };
        if document.time <= stored.time {
            debug!(
                id = %slot.id(),
                edition = document.edition(),
                "Edition is not newer than the stored document"
            );
            return false;
        }
        self.apply(slot, document);
        true
    }

    /// Apply an edition regardless of its time
    ///
    /// Used when the operator walks back to an older edition.
    pub fn force_update(&self, slot: &mut DocumentSlot, document: Document) -> bool {
        if slot.document().is_none() {
            return false;
        }
        self.apply(slot, document);
        true
    }

    fn apply(&self, slot: &mut DocumentSlot, document: Document) {
        let mut new_posts = Vec::new();
        let mut new_replies = Vec::new();

        if let Some(stored) = slot.document() {
            let stored_posts = stored.post_ids();
            let stored_replies = stored.reply_ids();
            let posts: BTreeSet<&str> = document.post_ids();
            let replies: BTreeSet<&str> = document.reply_ids();

            for reply in stored.replies.iter().filter(|r| !replies.contains(r.id.as_str())) {
                self.events.emit(CoreEvent::ReplyRemoved(reply.clone()));
            }
            for post in stored.posts.iter().filter(|p| !posts.contains(p.id.as_str())) {
                self.events.emit(CoreEvent::PostRemoved(post.clone()));
            }

            new_posts.extend(
                document
                    .posts
                    .iter()
                    .filter(|p| !stored_posts.contains(p.id.as_str()))
                    .cloned(),
            );
            new_replies.extend(
                document
                    .replies
                    .iter()
                    .filter(|r| !stored_replies.contains(r.id.as_str()))
                    .cloned(),
            );
        }

        let since = slot.following_since();
        for post in new_posts {
            if since.is_some_and(|since| post.time < since) {
                slot.mark_post_known(&post.id);
            } else if !slot.is_post_known(&post.id) {
                slot.mark_post_known(&post.id);
                self.events.emit(CoreEvent::NewPostFound(post));
            }
        }
        for reply in new_replies {
            if since.is_some_and(|since| reply.time < since) {
                slot.mark_reply_known(&reply.id);
            } else if !slot.is_reply_known(&reply.id) {
                slot.mark_reply_known(&reply.id);
                self.events.emit(CoreEvent::NewReplyFound(reply));
            }
        }

        let id = document.id.clone();
        let edition = document.edition();
        slot.replace_document(document);
        self.events
            .emit(CoreEvent::DocumentUpdated { id, edition });
    }
}
