//! Per-user profiles: the name the bot should use, if the user gave one.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::json_file::JsonFile;
use crate::error::StorageError;

/// Stored profile for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: Option<String>,
    /// Set while the bot waits for the user to type a name.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub awaiting_name: bool,
}

/// What happened to a submitted name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameOutcome {
    Accepted(String),
    Rejected,
}

/// Accept at most two words without digits.
pub fn validate_name(text: &str) -> Option<String> {
    let name = text.trim();
    let words = name.split_whitespace().count();
    if words == 0 || words > 2 || name.chars().any(|c| c.is_numeric()) {
        return None;
    }
    Some(name.to_string())
}

/// Profiles cached in memory and mirrored to a JSON file on every change.
pub struct ProfileStore {
    file: Option<JsonFile>,
    profiles: RwLock<BTreeMap<String, UserProfile>>,
}

impl ProfileStore {
    /// Profiles that live only in memory.
    pub fn in_memory() -> Self {
        Self {
            file: None,
            profiles: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load profiles from `path` (empty if the file doesn't exist).
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let file = JsonFile::new(path);
        let profiles = file.load().await?;
        Ok(Self {
            file: Some(file),
            profiles: RwLock::new(profiles),
        })
    }

    /// Start waiting for a name. Any previous name is cleared.
    pub async fn begin_naming(&self, user_id: &str) -> Result<(), StorageError> {
        let mut profiles = self.profiles.write().await;
        profiles.insert(
            user_id.to_string(),
            UserProfile {
                name: None,
                awaiting_name: true,
            },
        );
        self.persist(&profiles).await
    }

    pub async fn is_awaiting_name(&self, user_id: &str) -> bool {
        self.profiles
            .read()
            .await
            .get(user_id)
            .is_some_and(|p| p.awaiting_name)
    }

    /// Store the name the user typed, or `None` if it doesn't look like one.
    pub async fn submit_name(&self, user_id: &str, text: &str) -> Result<NameOutcome, StorageError> {
        let name = validate_name(text);
        let mut profiles = self.profiles.write().await;
        profiles.insert(
            user_id.to_string(),
            UserProfile {
                name: name.clone(),
                awaiting_name: false,
            },
        );
        self.persist(&profiles).await?;
        Ok(match name {
            Some(name) => NameOutcome::Accepted(name),
            None => NameOutcome::Rejected,
        })
    }

    pub async fn name_of(&self, user_id: &str) -> Option<String> {
        self.profiles
            .read()
            .await
            .get(user_id)
            .and_then(|p| p.name.clone())
    }

    async fn persist(&self, profiles: &BTreeMap<String, UserProfile>) -> Result<(), StorageError> {
        match &self.file {
            Some(file) => file.save(profiles).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert_eq!(validate_name("  Маша "), Some("Маша".to_string()));
        assert_eq!(validate_name("Анна Мария"), Some("Анна Мария".to_string()));
        assert_eq!(validate_name("меня зовут Маша"), None);
        assert_eq!(validate_name("Маша2000"), None);
        assert_eq!(validate_name("   "), None);
    }

    #[tokio::test]
    async fn naming_flow() {
        let store = ProfileStore::in_memory();
        assert!(!store.is_awaiting_name("1").await);
        store.begin_naming("1").await.unwrap();
        assert!(store.is_awaiting_name("1").await);

        let outcome = store.submit_name("1", "Лиза").await.unwrap();
        assert_eq!(outcome, NameOutcome::Accepted("Лиза".into()));
        assert!(!store.is_awaiting_name("1").await);
        assert_eq!(store.name_of("1").await.as_deref(), Some("Лиза"));
    }

    #[tokio::test]
    async fn rejected_name_clears_profile_name() {
        let store = ProfileStore::in_memory();
        store.begin_naming("1").await.unwrap();
        let outcome = store.submit_name("1", "123").await.unwrap();
        assert_eq!(outcome, NameOutcome::Rejected);
        assert_eq!(store.name_of("1").await, None);
    }

    #[tokio::test]
    async fn profiles_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_profiles.json");
        {
            let store = ProfileStore::open(&path).await.unwrap();
            store.begin_naming("5").await.unwrap();
            store.submit_name("5", "Оля").await.unwrap();
        }
        let store = ProfileStore::open(&path).await.unwrap();
        assert_eq!(store.name_of("5").await.as_deref(), Some("Оля"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("awaiting_name"));
    }
}
