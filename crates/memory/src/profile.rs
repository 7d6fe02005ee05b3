//! Persistent profile store: durable identity facts.
//!
//! One JSON object on disk, rewritten whole on every update and re-read on
//! every load, so the file on disk is always the authority. A store that has
//! never been written seeds itself with the built-in profile on first read.
//!
//! The fallible [`ProfileStore::load`] surfaces a typed error on corrupt or
//! unreachable storage; [`ProfileStore::load_or_default`] is the degrading
//! variant that substitutes the built-in profile and logs a warning.

use emberkeep_core::error::MemoryError;
use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Keys present in the built-in seed profile, in render order.
pub const SEED_KEYS: [&str; 3] = ["identity", "bond", "tone"];

/// The profile mapping: fact name to fact value.
///
/// Seed keys are ordinary entries; any other key is accepted and survives
/// merges untouched unless explicitly overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile {
    fields: BTreeMap<String, String>,
}

impl Profile {
    /// An empty mapping (what an explicit write starts from when no file
    /// is readable).
    pub fn empty() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// The built-in seed profile.
    pub fn seed() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(
            "identity".to_string(),
            "Companion assistant with a durable long-term memory.".to_string(),
        );
        fields.insert(
            "bond".to_string(),
            "Steady, attentive, personal; keeps continuity across sessions.".to_string(),
        );
        fields.insert("tone".to_string(), "Warm, direct, concise.".to_string());
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Merge `fields` into this profile, last writer wins per key.
    pub fn merge(&mut self, fields: BTreeMap<String, String>) {
        self.fields.extend(fields);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in deterministic render order: seed keys first, then the rest
    /// alphabetically.
    pub fn ordered_fields(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> = Vec::with_capacity(self.fields.len());
        for key in SEED_KEYS {
            if let Some(value) = self.fields.get(key) {
                out.push((key, value.as_str()));
            }
        }
        for (key, value) in &self.fields {
            if !SEED_KEYS.contains(&key.as_str()) {
                out.push((key.as_str(), value.as_str()));
            }
        }
        out
    }
}

impl Default for Profile {
    /// The built-in default is the seed profile, not an empty mapping.
    fn default() -> Self {
        Self::seed()
    }
}

/// File-backed profile store.
///
/// Reads are lazy (every load re-reads the file); writes are read-merge-
/// rewrite under a single-writer lock so concurrent updates cannot
/// interleave.
pub struct ProfileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ProfileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Load the full profile.
    ///
    /// If no file exists yet, the seed profile is persisted and returned.
    /// Corrupt or unreachable storage is a typed error; callers that want
    /// degradation use [`ProfileStore::load_or_default`].
    pub async fn load(&self) -> Result<Profile, MemoryError> {
        let _guard = self.lock.lock().await;
        match self.read_from_disk()? {
            Some(profile) => Ok(profile),
            None => {
                let seed = Profile::seed();
                self.write_to_disk(&seed)?;
                debug!(path = %self.path.display(), "Seeded profile store");
                Ok(seed)
            }
        }
    }

    /// Load the profile, substituting the built-in default on any failure.
    pub async fn load_or_default(&self) -> Profile {
        match self.load().await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, "Profile unreadable, using built-in default");
                Profile::default()
            }
        }
    }

    /// Merge `fields` into the stored profile and rewrite the file.
    ///
    /// The merge base is whatever is currently readable; an unreadable file
    /// is logged and treated as empty rather than blocking the write.
    pub async fn set(&self, fields: BTreeMap<String, String>) -> Result<(), MemoryError> {
        let _guard = self.lock.lock().await;
        let mut profile = match self.read_from_disk() {
            Ok(Some(profile)) => profile,
            Ok(None) => Profile::empty(),
            Err(e) => {
                warn!(error = %e, "Unreadable profile, merging into empty mapping");
                Profile::empty()
            }
        };
        profile.merge(fields);
        self.write_to_disk(&profile)
    }

    fn read_from_disk(&self) -> Result<Option<Profile>, MemoryError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| MemoryError::Corrupt {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MemoryError::Storage(format!(
                "Failed to read profile file: {e}"
            ))),
        }
    }

    fn write_to_disk(&self, profile: &Profile) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemoryError::Storage(format!("Failed to create profile directory: {e}"))
            })?;
        }

        let content = serde_json::to_string_pretty(profile)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize profile: {e}")))?;

        std::fs::write(&self.path, content)
            .map_err(|e| MemoryError::Storage(format!("Failed to write profile file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[tokio::test]
    async fn first_load_seeds_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("profile.json");

        let store = ProfileStore::new(path.clone());
        let profile = store.load().await.unwrap();
        assert!(profile.get("identity").is_some());
        assert!(profile.get("bond").is_some());
        assert!(profile.get("tone").is_some());
        assert_eq!(profile.len(), 3);

        // The seed landed on disk, so a fresh store sees the same mapping.
        assert!(path.exists());
        let again = ProfileStore::new(path).load().await.unwrap();
        assert_eq!(again, profile);
    }

    #[tokio::test]
    async fn set_merges_last_writer_wins() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profile.json"));
        store.load().await.unwrap();

        let mut fields = BTreeMap::new();
        fields.insert("tone".to_string(), "Dry and brief.".to_string());
        fields.insert("name".to_string(), "Marisol".to_string());
        store.set(fields).await.unwrap();

        let profile = store.load().await.unwrap();
        assert_eq!(profile.get("tone"), Some("Dry and brief."));
        assert_eq!(profile.get("name"), Some("Marisol"));
        // Untouched seed keys survive the merge.
        assert!(profile.get("identity").is_some());
    }

    #[tokio::test]
    async fn set_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profile.json"));

        let mut fields = BTreeMap::new();
        fields.insert("project".to_string(), "emberkeep".to_string());
        store.set(fields.clone()).await.unwrap();
        let once = store.load().await.unwrap();
        store.set(fields).await.unwrap();
        let twice = store.load().await.unwrap();

        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn set_before_first_load_skips_seed() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profile.json"));

        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), "Ada".to_string());
        store.set(fields).await.unwrap();

        // The file now exists, so load never re-seeds.
        let profile = store.load().await.unwrap();
        assert_eq!(profile.get("name"), Some("Ada"));
        assert!(profile.get("identity").is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_typed_error_and_degrades() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("profile.json");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{{ not json").unwrap();

        let store = ProfileStore::new(path);
        assert!(matches!(
            store.load().await,
            Err(MemoryError::Corrupt { .. })
        ));

        let fallback = store.load_or_default().await;
        assert!(fallback.get("identity").is_some());
    }

    #[test]
    fn ordered_fields_put_seed_keys_first() {
        let mut profile = Profile::seed();
        profile.insert("allergies", "none");
        profile.insert("name", "Ada");

        let keys: Vec<&str> = profile.ordered_fields().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["identity", "bond", "tone", "allergies", "name"]);
    }
}
