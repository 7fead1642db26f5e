//! Document store
//!
//! The `DocumentStore` keeps every known document behind its own lock. The
//! diff pipeline, the rescue loop and the insert loop of one identity take
//! that identity's lock; different identities never contend.
//!
//! ## Slots
//!
//! A [`DocumentSlot`] holds everything known about one identity:
//! - the current document, if one was fetched or created
//! - the follow bookkeeping (following-since, known post and reply ids)
//! - for local identities, the insert key and the insertion lock
//!
//! ## Usage
//!
//! ```ignore
//! let (events, rx) = EventBus::new();
//! let store = DocumentStore::new(events);
//!
//! let slot = store.create_local(id, "USK@key/fernpost", "USK@insert/fernpost");
//! slot.lock().await.document_mut().unwrap().add_post(post);
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::codec::{self, ParseError};
use crate::events::{CoreEvent, EventBus};
use crate::fingerprint::Fingerprint;
use crate::identity::{Address, IdentityId};
use crate::models::Document;
use crate::storage::PersistedState;

/// A slot shared between the loops of one identity
pub type SharedSlot = Arc<AsyncMutex<DocumentSlot>>;

/// Data only a locally owned identity has
#[derive(Debug, Clone, PartialEq)]
pub struct LocalIdentity {
    /// Key new editions are inserted under
    pub insert_key: String,
    /// A locked document is never inserted
    pub locked: bool,
    pub last_insert_fingerprint: Option<Fingerprint>,
}

/// Everything known about one identity
#[derive(Debug)]
pub struct DocumentSlot {
    id: IdentityId,
    request: Address,
    document: Option<Document>,
    following_since: Option<DateTime<Utc>>,
    known_posts: HashSet<String>,
    known_replies: HashSet<String>,
    local: Option<LocalIdentity>,
}

impl DocumentSlot {
    fn new(id: IdentityId, request: Address) -> Self {
        Self {
            id,
            request,
            document: None,
            following_since: None,
            known_posts: HashSet::new(),
            known_replies: HashSet::new(),
            local: None,
        }
    }

    pub fn id(&self) -> &IdentityId {
        &self.id
    }

    /// Request address at the latest known edition
    pub fn request_address(&self) -> &Address {
        &self.request
    }

    /// Latest edition known for this identity
    pub fn edition(&self) -> u64 {
        self.request.edition
    }

    /// Record a newer edition; older ones are ignored
    pub fn set_edition(&mut self, edition: u64) {
        if edition > self.request.edition {
            self.request.edition = edition;
            if let Some(document) = &mut self.document {
                document.address.edition = edition;
            }
        }
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn document_mut(&mut self) -> Option<&mut Document> {
        self.document.as_mut()
    }

    /// Replace the stored document wholesale
    ///
    /// The known edition follows the document's edition. This is the only
    /// place where an edition may go backwards, which only a rescue does.
    pub fn replace_document(&mut self, document: Document) {
        self.request.edition = document.edition();
        self.document = Some(document);
    }

    pub fn following_since(&self) -> Option<DateTime<Utc>> {
        self.following_since
    }

    pub fn is_post_known(&self, id: &str) -> bool {
        self.known_posts.contains(id)
    }

    pub fn mark_post_known(&mut self, id: &str) {
        self.known_posts.insert(id.to_string());
    }

    pub fn is_reply_known(&self, id: &str) -> bool {
        self.known_replies.contains(id)
    }

    pub fn mark_reply_known(&mut self, id: &str) {
        self.known_replies.insert(id.to_string());
    }

    /// Mark every post and reply of the current document as known
    pub fn mark_all_known(&mut self) {
        if let Some(document) = &self.document {
            self.known_posts
                .extend(document.posts.iter().map(|p| p.id.clone()));
            self.known_replies
                .extend(document.replies.iter().map(|r| r.id.clone()));
        }
    }

    pub fn local(&self) -> Option<&LocalIdentity> {
        self.local.as_ref()
    }

    pub fn local_mut(&mut self) -> Option<&mut LocalIdentity> {
        self.local.as_mut()
    }

    pub fn is_local(&self) -> bool {
        self.local.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.local.as_ref().is_some_and(|l| l.locked)
    }

    /// Lock or unlock insertion; returns false for remote identities
    pub fn set_locked(&mut self, locked: bool) -> bool {
        match &mut self.local {
            Some(local) => {
                local.locked = locked;
                true
            }
            None => false,
        }
    }

    /// Snapshot for the persistence collaborator
    pub fn persisted_state(&self) -> PersistedState {
        let mut state = PersistedState::new(
            self.id.clone(),
            self.request.key.clone(),
            self.request.edition,
        );
        state.following_since = self.following_since;
        if let Some(document) = &self.document {
            state.friends = document.friends.iter().cloned().collect();
        }
        if let Some(local) = &self.local {
            state.insert_key = Some(local.insert_key.clone());
            state.locked = local.locked;
            state.last_insert_fingerprint = local.last_insert_fingerprint;
            state.document = self
                .document
                .as_ref()
                .and_then(|d| codec::serialize(d).ok())
                .and_then(|bytes| String::from_utf8(bytes).ok());
        }
        state
    }
}

/// Keyed store of all known documents
pub struct DocumentStore {
    slots: Mutex<BTreeMap<IdentityId, SharedSlot>>,
    events: EventBus,
}

impl DocumentStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, BTreeMap<IdentityId, SharedSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Establish a local identity with an empty document
    ///
    /// An existing slot for the id is returned unchanged.
    pub fn create_local(
        &self,
        id: IdentityId,
        request_key: impl Into<String>,
        insert_key: impl Into<String>,
    ) -> SharedSlot {
        let mut slots = self.slots();
        if let Some(slot) = slots.get(&id) {
            debug!(%id, "Identity already present");
            return slot.clone();
        }

        let request = Address::new(request_key, 0);
        let mut slot = DocumentSlot::new(id.clone(), request.clone());
        slot.document = Some(Document::new(id.clone(), request));
        slot.local = Some(LocalIdentity {
            insert_key: insert_key.into(),
            locked: false,
            last_insert_fingerprint: None,
        });

        info!(%id, "Created local identity");
        let slot = Arc::new(AsyncMutex::new(slot));
        slots.insert(id, slot.clone());
        slot
    }

    /// Start following a remote identity
    ///
    /// Posts and replies older than `since` are marked known without an
    /// event. Following an identity that is already present only sets
    /// `since` if none was recorded.
    pub async fn follow(
        &self,
        id: IdentityId,
        request_key: impl Into<String>,
        since: DateTime<Utc>,
    ) -> SharedSlot {
        let slot = {
            let mut slots = self.slots();
            slots
                .entry(id.clone())
                .or_insert_with(|| {
                    let slot = DocumentSlot::new(id.clone(), Address::new(request_key, 0));
                    Arc::new(AsyncMutex::new(slot))
                })
                .clone()
        };

        {
            let mut guard = slot.lock().await;
            if guard.following_since.is_none() {
                guard.following_since = Some(since);
                debug!(%id, %since, "Following identity");
            }
        }
        slot
    }

    /// Rebuild a slot from a persisted state
    pub fn restore(&self, state: &PersistedState) -> Result<SharedSlot, ParseError> {
        let mut slot = DocumentSlot::new(state.id.clone(), state.address());
        slot.following_since = state.following_since;
        slot.document = state.restore_document()?;
        slot.local = state.insert_key.as_ref().map(|insert_key| LocalIdentity {
            insert_key: insert_key.clone(),
            locked: state.locked,
            last_insert_fingerprint: state.last_insert_fingerprint,
        });
        slot.mark_all_known();

        info!(id = %state.id, edition = state.latest_edition, "Restored identity");
        let slot = Arc::new(AsyncMutex::new(slot));
        self.slots().insert(state.id.clone(), slot.clone());
        Ok(slot)
    }

    pub fn slot(&self, id: &IdentityId) -> Option<SharedSlot> {
        self.slots().get(id).cloned()
    }

    pub fn contains(&self, id: &IdentityId) -> bool {
        self.slots().contains_key(id)
    }

    /// Ids of all known identities, sorted
    pub fn ids(&self) -> Vec<IdentityId> {
        self.slots().keys().cloned().collect()
    }

    pub async fn mark_post_known(&self, id: &IdentityId, post_id: &str) -> bool {
        match self.slot(id) {
            Some(slot) => {
                slot.lock().await.mark_post_known(post_id);
                true
            }
            None => false,
        }
    }

    pub async fn mark_reply_known(&self, id: &IdentityId, reply_id: &str) -> bool {
        match self.slot(id) {
            Some(slot) => {
                slot.lock().await.mark_reply_known(reply_id);
                true
            }
            None => false,
        }
    }

    /// Remove an identity and everything it owns
    ///
    /// Emits one `ReplyRemoved` per reply, then one `PostRemoved` per post,
    /// then `DocumentRemoved`. Returns false if the id was unknown.
    pub async fn remove(&self, id: &IdentityId) -> bool {
        let Some(slot) = self.slots().remove(id) else {
            return false;
        };

        let mut guard = slot.lock().await;
        if let Some(document) = guard.document.take() {
            for reply in document.replies {
                self.events.emit(CoreEvent::ReplyRemoved(reply));
            }
            for post in document.posts {
                self.events.emit(CoreEvent::PostRemoved(post));
            }
        }
        self.events.emit(CoreEvent::DocumentRemoved(id.clone()));

        info!(%id, "Removed identity");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::drain;
    use crate::models::fixtures::*;

    fn store() -> (DocumentStore, tokio::sync::mpsc::UnboundedReceiver<CoreEvent>) {
        let (events, rx) = EventBus::new();
        (DocumentStore::new(events), rx)
    }

    #[tokio::test]
    async fn test_create_local() {
        let (store, _rx) = store();
        let slot = store.create_local(owner(), "USK@owner/fernpost", "USK@insert/fernpost");

        let guard = slot.lock().await;
        let document = guard.document().unwrap();
        assert_eq!(document.id, owner());
        assert_eq!(document.edition(), 0);
        assert!(document.posts.is_empty());
        assert!(guard.is_local());
        assert!(!guard.is_locked());
        assert_eq!(guard.local().unwrap().insert_key, "USK@insert/fernpost");
    }

    #[tokio::test]
    async fn test_create_local_keeps_existing() {
        let (store, _rx) = store();
        let first = store.create_local(owner(), "USK@owner/fernpost", "USK@insert/fernpost");
        first
            .lock()
            .await
            .document_mut()
            .unwrap()
            .add_post(post("post-1", 1_000));

        let second = store.create_local(owner(), "USK@other/fernpost", "USK@other/fernpost");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.ids(), vec![owner()]);
    }

    #[tokio::test]
    async fn test_follow_sets_since_once() {
        let (store, _rx) = store();
        store.follow(friend(), "USK@friend/fernpost", at(1_000)).await;
        let slot = store.follow(friend(), "USK@friend/fernpost", at(9_000)).await;

        let guard = slot.lock().await;
        assert_eq!(guard.following_since(), Some(at(1_000)));
        assert!(guard.document().is_none());
        assert!(!guard.is_local());
    }

    #[tokio::test]
    async fn test_mark_known() {
        let (store, _rx) = store();
        store.follow(friend(), "USK@friend/fernpost", at(0)).await;

        assert!(store.mark_post_known(&friend(), "post-1").await);
        assert!(store.mark_reply_known(&friend(), "reply-1").await);
        assert!(!store.mark_post_known(&owner(), "post-1").await);

        let slot = store.slot(&friend()).unwrap();
        let guard = slot.lock().await;
        assert!(guard.is_post_known("post-1"));
        assert!(guard.is_reply_known("reply-1"));
        assert!(!guard.is_post_known("post-2"));
    }

    #[tokio::test]
    async fn test_set_edition_never_decreases() {
        let (store, _rx) = store();
        let slot = store.follow(friend(), "USK@friend/fernpost", at(0)).await;
        let mut guard = slot.lock().await;

        guard.set_edition(5);
        guard.set_edition(3);
        assert_eq!(guard.edition(), 5);
    }

    #[tokio::test]
    async fn test_lock_only_local() {
        let (store, _rx) = store();
        let local = store.create_local(owner(), "USK@owner/fernpost", "USK@insert/fernpost");
        let remote = store.follow(friend(), "USK@friend/fernpost", at(0)).await;

        assert!(local.lock().await.set_locked(true));
        assert!(local.lock().await.is_locked());
        assert!(!remote.lock().await.set_locked(true));
        assert!(!remote.lock().await.is_locked());
    }

    #[tokio::test]
    async fn test_remove_cascades_in_order() {
        let (store, mut rx) = store();
        let slot = store.create_local(owner(), "USK@owner/fernpost", "USK@insert/fernpost");
        {
            let mut guard = slot.lock().await;
            let document = guard.document_mut().unwrap();
            document.add_post(post("post-1", 1_000));
            document.add_reply(reply("reply-1", "post-1", 1_100));
            document.add_reply(reply("reply-2", "post-1", 1_200));
        }

        assert!(store.remove(&owner()).await);
        assert!(!store.contains(&owner()));

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                CoreEvent::ReplyRemoved(reply("reply-1", "post-1", 1_100)),
                CoreEvent::ReplyRemoved(reply("reply-2", "post-1", 1_200)),
                CoreEvent::PostRemoved(post("post-1", 1_000)),
                CoreEvent::DocumentRemoved(owner()),
            ]
        );

        assert!(!store.remove(&owner()).await);
    }

    #[tokio::test]
    async fn test_persisted_state_round_trip() {
        let (store, _rx) = store();
        let slot = store.create_local(owner(), "SSK@owner/fernpost", "SSK@insert/fernpost");
        let state = {
            let mut guard = slot.lock().await;
            guard.replace_document(full());
            guard.set_locked(true);
            guard.local_mut().unwrap().last_insert_fingerprint = Some(Fingerprint::of(&full()));
            guard.persisted_state()
        };
        assert_eq!(state.latest_edition, 1);
        assert_eq!(state.friends, vec![friend()]);
        assert!(state.document.is_some());

        let (other, _rx) = self::store();
        let restored = other.restore(&state).unwrap();
        let guard = restored.lock().await;
        assert!(guard.is_locked());
        assert_eq!(guard.document().unwrap().posts, full().posts);
        assert!(guard.is_post_known("post-1"));
        assert_eq!(
            guard.local().unwrap().last_insert_fingerprint,
            Some(Fingerprint::of(&full()))
        );
    }
}
