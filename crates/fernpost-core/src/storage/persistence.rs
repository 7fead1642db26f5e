//! Identity state persistence
//!
//! Saves the insert-relevant state of an identity whenever it changes so a
//! restart resumes with the right edition, fingerprint and follow lists.
//! Uses atomic writes (write to temp file, then rename) to prevent
//! corruption.
//!
//! Storage location: `~/.local/share/fernpost/state/` (configurable via
//! `Config`)

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::PersistenceError;
use crate::codec::{DocumentParser, ParseError};
use crate::config::Config;
use crate::fingerprint::Fingerprint;
use crate::identity::{Address, IdentityId};
use crate::models::Document;

/// Receives a signal whenever insert-relevant state changes
///
/// Called after a successful insert, after a rescue and when follow lists
/// change. Implementations must not block for long; failures are theirs to
/// report.
pub trait Persistence: Send + Sync {
    fn touch(&self, state: &PersistedState);
}

/// Snapshot of everything needed to resume an identity after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub id: IdentityId,
    /// Key part of the request address
    pub request_key: String,
    pub latest_edition: u64,
    /// Only present for local identities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_insert_fingerprint: Option<Fingerprint>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub following_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub friends: Vec<IdentityId>,
    /// Serialized local document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

impl PersistedState {
    pub fn new(id: IdentityId, request_key: impl Into<String>, latest_edition: u64) -> Self {
        Self {
            id,
            request_key: request_key.into(),
            latest_edition,
            insert_key: None,
            last_insert_fingerprint: None,
            locked: false,
            following_since: None,
            friends: Vec::new(),
            document: None,
        }
    }

    pub fn address(&self) -> Address {
        Address::new(self.request_key.clone(), self.latest_edition)
    }

    /// Rebuild the saved local document with the strict parser
    ///
    /// Returns `Ok(None)` when no document was saved.
    pub fn restore_document(&self) -> Result<Option<Document>, ParseError> {
        let Some(payload) = &self.document else {
            return Ok(None);
        };
        DocumentParser::strict()
            .parse(&self.id, &self.address(), payload.as_bytes())
            .map(Some)
    }
}

/// Stores one TOML file per identity
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Use the state directory of a configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.state_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &IdentityId) -> PathBuf {
        self.dir.join(format!("{}.toml", id))
    }

    /// Save a state using atomic write
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        let path = self.path_for(&state.id);
        let content = toml::to_string_pretty(state).map_err(PersistenceError::from)?;

        fs::create_dir_all(&self.dir)
            .map_err(|e| PersistenceError::CreateDirectory {
                path: self.dir.clone(),
                source: e,
            })
            .with_context(|| format!("Failed to save state of {}", state.id))?;

        atomic_write(&path, content.as_bytes())
            .map_err(|e| PersistenceError::from_io(e, path.clone()))
            .with_context(|| format!("Failed to save state of {}", state.id))?;

        debug!(id = %state.id, edition = state.latest_edition, "Saved state");
        Ok(())
    }

    /// Load the state of one identity
    ///
    /// Returns `None` if nothing was saved for it.
    pub fn load(&self, id: &IdentityId) -> Result<Option<PersistedState>> {
        let path = self.path_for(id);

        if !path.exists() {
            return Ok(None);
        }

        read_state(&path).map(Some)
    }

    /// Load every saved state, skipping files that cannot be read
    pub fn load_all(&self) -> Result<Vec<PersistedState>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list state directory {:?}", self.dir))?;

        let mut states = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            match read_state(&path) {
                Ok(state) => states.push(state),
                Err(e) => warn!("Skipping state file {:?}: {:#}", path, e),
            }
        }
        states.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(states)
    }

    /// Delete the state of one identity
    pub fn remove(&self, id: &IdentityId) -> Result<()> {
        let path = self.path_for(id);
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("Failed to delete {:?}", path))?;
        }
        Ok(())
    }
}

impl Persistence for FilePersistence {
    fn touch(&self, state: &PersistedState) {
        if let Err(e) = self.save(state) {
            warn!("Failed to persist state of {}: {:#}", state.id, e);
        }
    }
}

fn read_state(path: &Path) -> Result<PersistedState> {
    let content = fs::read_to_string(path).map_err(|e| PersistenceError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let state = toml::from_str(&content).map_err(|e| PersistenceError::InvalidFormat {
        path: path.to_path_buf(),
        details: e.to_string(),
    })?;

    Ok(state)
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
///
/// The target file is never left in a partially-written state.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::models::fixtures::*;
    use tempfile::TempDir;

    fn local_state() -> PersistedState {
        let doc = full();
        let mut state = PersistedState::new(owner(), doc.address.key.clone(), 7);
        state.insert_key = Some("SSK@insert/fernpost".to_string());
        state.last_insert_fingerprint = Some(Fingerprint::of(&doc));
        state.friends = vec![friend()];
        state.document = Some(String::from_utf8(codec::serialize(&doc).unwrap()).unwrap());
        state
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = FilePersistence::new(temp_dir.path());

        assert!(persistence.load(&owner()).unwrap().is_none());

        let state = local_state();
        persistence.save(&state).unwrap();

        let loaded = persistence.load(&owner()).unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_save_reports_unusable_state_directory() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let persistence = FilePersistence::new(blocker.join("state"));

        let err = persistence.save(&local_state()).unwrap_err();
        let cause = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<PersistenceError>())
            .unwrap();
        assert!(matches!(cause, PersistenceError::CreateDirectory { .. }));
        assert!(cause.recovery_suggestion().is_some());
    }

    #[test]
    fn test_restore_document() {
        let state = local_state();
        let restored = state.restore_document().unwrap().unwrap();

        assert_eq!(restored.edition(), 7);
        assert_eq!(restored.posts, full().posts);
        assert_eq!(
            state.last_insert_fingerprint,
            Some(Fingerprint::of(&restored))
        );
    }

    #[test]
    fn test_restore_without_document() {
        let state = PersistedState::new(friend(), "USK@friend/fernpost", 3);
        assert!(state.restore_document().unwrap().is_none());
    }

    #[test]
    fn test_touch_overwrites_previous_state() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = FilePersistence::new(temp_dir.path());

        let mut state = PersistedState::new(friend(), "USK@friend/fernpost", 3);
        persistence.touch(&state);
        state.latest_edition = 4;
        state.following_since = Some(at(5_000));
        persistence.touch(&state);

        let loaded = persistence.load(&friend()).unwrap().unwrap();
        assert_eq!(loaded.latest_edition, 4);
        assert_eq!(loaded.following_since, Some(at(5_000)));
    }

    #[test]
    fn test_load_all_skips_invalid_files() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = FilePersistence::new(temp_dir.path());

        persistence.save(&local_state()).unwrap();
        persistence
            .save(&PersistedState::new(friend(), "USK@friend/fernpost", 1))
            .unwrap();
        fs::write(temp_dir.path().join("broken.toml"), "not = [valid").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

        let states = persistence.load_all().unwrap();
        assert_eq!(states.len(), 2);
    }

    #[test]
    fn test_load_invalid_file_is_typed_error() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = FilePersistence::new(temp_dir.path());
        fs::write(temp_dir.path().join(format!("{}.toml", owner())), "id = 1").unwrap();

        let err = persistence.load(&owner()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PersistenceError>(),
            Some(PersistenceError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_remove() {
        let temp_dir = TempDir::new().unwrap();
        let persistence = FilePersistence::new(temp_dir.path());

        persistence.save(&local_state()).unwrap();
        persistence.remove(&owner()).unwrap();
        assert!(persistence.load(&owner()).unwrap().is_none());
        persistence.remove(&owner()).unwrap();
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir
            .path()
            .join("a")
            .join("b")
            .join("c")
            .join("file.txt");

        atomic_write(&nested_path, b"test data").unwrap();

        assert!(nested_path.exists());
        let content = fs::read_to_string(&nested_path).unwrap();
        assert_eq!(content, "test data");
        assert!(!temp_dir.path().join("a/b/c/file.txt.tmp").exists());
    }
}
