//! Modification detection for local documents
//!
//! A local document is inserted once its content differs from the last
//! inserted content and has stayed unchanged for the insertion delay. Each
//! content change restarts the delay, so a burst of edits produces a single
//! insert.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::fingerprint::Fingerprint;

/// Decides if and when a local document should be inserted
#[derive(Debug)]
pub struct ModificationDetector {
    delay: watch::Receiver<Duration>,
    last_insert: Option<Fingerprint>,
    last_check: Option<Fingerprint>,
    last_modification: Option<Instant>,
}

impl ModificationDetector {
    /// `last_insert` is the fingerprint of the content inserted last, if any
    pub fn new(delay: watch::Receiver<Duration>, last_insert: Option<Fingerprint>) -> Self {
        Self {
            delay,
            last_insert,
            last_check: last_insert,
            last_modification: None,
        }
    }

    pub fn last_insert_fingerprint(&self) -> Option<Fingerprint> {
        self.last_insert
    }

    /// True if the content differs from the last inserted content
    pub fn is_modified(&self, current: &Fingerprint) -> bool {
        self.last_insert.as_ref() != Some(current)
    }

    /// True if the document is modified and has been quiet for the delay
    ///
    /// A locked document is never eligible and restarts the delay once it
    /// is unlocked.
    pub fn is_eligible_for_insert(
        &mut self,
        current: Fingerprint,
        locked: bool,
        now: Instant,
    ) -> bool {
        if locked {
            self.last_check = None;
            self.last_modification = None;
            return false;
        }

        if !self.is_modified(&current) {
            self.last_check = Some(current);
            self.last_modification = None;
            return false;
        }

        if self.last_check != Some(current) {
            self.last_check = Some(current);
            self.last_modification = Some(now);
            return false;
        }

        let delay = *self.delay.borrow();
        self.last_modification
            .is_some_and(|modified| now.saturating_duration_since(modified) >= delay)
    }

    /// Record the fingerprint of a successful insert
    pub fn set_fingerprint(&mut self, fingerprint: Fingerprint) {
        self.last_insert = Some(fingerprint);
        self.last_check = Some(fingerprint);
        self.last_modification = None;
    }
}
