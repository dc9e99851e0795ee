// src/services/profile_store.rs
use crate::errors::DiffError;
use crate::models::{ModelProfile, ModelSpec};
use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// Id of the profile seeded from the environment.
pub const ENV_PROFILE_ID: &str = "env-default";

/// Immutable copy of the profile list taken at the start of a call.
#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    profiles: Vec<ModelProfile>,
}

/// A profile that passed resolution: it has credentials and at least one model.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub profile: ModelProfile,
    pub models: Vec<ModelSpec>,
}

impl ProfileSet {
    pub fn new(profiles: Vec<ModelProfile>) -> Self {
        Self { profiles }
    }

    pub fn profiles(&self) -> &[ModelProfile] {
        &self.profiles
    }

    /// Picks the profile by id, then the default one, then the first one.
    pub fn resolve(&self, id: Option<&str>) -> Result<ResolvedProfile, DiffError> {
        let by_id = id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .and_then(|id| self.profiles.iter().find(|p| p.id == id));

        let profile = by_id
            .or_else(|| self.profiles.iter().find(|p| p.is_default))
            .or_else(|| self.profiles.first())
            .ok_or_else(|| {
                DiffError::ConfigurationMissing("no model profile is configured".to_string())
            })?;

        if !profile.has_credentials() {
            return Err(DiffError::ConfigurationMissing(format!(
                "profile '{}' has no API key",
                profile.name
            )));
        }

        let models = profile.usable_models();
        if models.is_empty() {
            return Err(DiffError::ConfigurationMissing(format!(
                "profile '{}' lists no model names",
                profile.name
            )));
        }

        Ok(ResolvedProfile {
            profile: profile.clone(),
            models,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProfile {
    pub name: String,
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub models: Option<Vec<ModelSpec>>,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn snapshot(&self) -> ProfileSet;
    async fn create(&self, new: NewProfile) -> Result<ModelProfile, DiffError>;
    async fn update(&self, id: &str, update: ProfileUpdate) -> Result<ModelProfile, DiffError>;
    async fn delete(&self, id: &str) -> Result<(), DiffError>;
    async fn set_default(&self, id: &str) -> Result<(), DiffError>;
}

/// Process-local profile store. The environment profile is always present.
pub struct InMemoryProfileStore {
    profiles: RwLock<Vec<ModelProfile>>,
}

impl InMemoryProfileStore {
    pub fn new(env_profile: ModelProfile) -> Self {
        let env_profile = ModelProfile {
            id: ENV_PROFILE_ID.to_string(),
            is_default: true,
            ..env_profile
        };
        Self {
            profiles: RwLock::new(vec![env_profile]),
        }
    }

    fn guard_sentinel(id: &str, action: &str) -> Result<(), DiffError> {
        if id == ENV_PROFILE_ID {
            return Err(DiffError::Validation(format!(
                "the environment profile cannot be {}",
                action
            )));
        }
        Ok(())
    }

    fn make_default(profiles: &mut [ModelProfile], id: &str) {
        for profile in profiles.iter_mut() {
            profile.is_default = profile.id == id;
        }
    }
}

fn validate_name(name: &str) -> Result<String, DiffError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DiffError::Validation("profile name is required".to_string()));
    }
    Ok(name.to_string())
}

fn clean_base_url(base_url: Option<String>) -> Option<String> {
    base_url
        .map(|u| u.trim().trim_end_matches('/').to_string())
        .filter(|u| !u.is_empty())
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn snapshot(&self) -> ProfileSet {
        let profiles = self.profiles.read().unwrap_or_else(PoisonError::into_inner);
        ProfileSet::new(profiles.clone())
    }

    async fn create(&self, new: NewProfile) -> Result<ModelProfile, DiffError> {
        let profile = ModelProfile {
            id: Uuid::new_v4().to_string(),
            name: validate_name(&new.name)?,
            api_key: new.api_key.trim().to_string(),
            base_url: clean_base_url(new.base_url),
            models: new.models,
            is_default: false,
        };

        let mut profiles = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        profiles.push(profile.clone());
        if new.is_default {
            Self::make_default(&mut profiles, &profile.id);
        }
        info!("Created model profile '{}' ({})", profile.name, profile.id);

        Ok(profiles
            .iter()
            .find(|p| p.id == profile.id)
            .cloned()
            .unwrap_or(profile))
    }

    async fn update(&self, id: &str, update: ProfileUpdate) -> Result<ModelProfile, DiffError> {
        Self::guard_sentinel(id, "edited")?;
        let name = update.name.as_deref().map(validate_name).transpose()?;

        let mut profiles = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        let profile = profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| DiffError::NotFound(format!("profile {}", id)))?;

        if let Some(name) = name {
            profile.name = name;
        }
        if let Some(api_key) = update.api_key {
            profile.api_key = api_key.trim().to_string();
        }
        if update.base_url.is_some() {
            profile.base_url = clean_base_url(update.base_url);
        }
        if let Some(models) = update.models {
            profile.models = models;
        }
        Ok(profile.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), DiffError> {
        Self::guard_sentinel(id, "deleted")?;

        let mut profiles = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        let index = profiles
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| DiffError::NotFound(format!("profile {}", id)))?;
        let removed = profiles.remove(index);
        if removed.is_default {
            Self::make_default(&mut profiles, ENV_PROFILE_ID);
        }
        info!("Deleted model profile '{}' ({})", removed.name, removed.id);
        Ok(())
    }

    async fn set_default(&self, id: &str) -> Result<(), DiffError> {
        let mut profiles = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        if !profiles.iter().any(|p| p.id == id) {
            return Err(DiffError::NotFound(format!("profile {}", id)));
        }
        Self::make_default(&mut profiles, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, key: &str, models: &[&str], is_default: bool) -> ModelProfile {
        ModelProfile {
            id: id.to_string(),
            name: id.to_uppercase(),
            api_key: key.to_string(),
            base_url: None,
            models: models.iter().map(|m| ModelSpec::from_name(*m)).collect(),
            is_default,
        }
    }

    fn new_profile(name: &str, is_default: bool) -> NewProfile {
        NewProfile {
            name: name.to_string(),
            api_key: "secret".to_string(),
            base_url: Some("https://proxy.example.com/".to_string()),
            models: vec![ModelSpec::from_name("gemini-2.0-flash")],
            is_default,
        }
    }

    #[test]
    fn resolves_by_id_then_default_then_first() {
        let set = ProfileSet::new(vec![
            profile("a", "k", &["m1"], false),
            profile("b", "k", &["m2"], true),
        ]);
        assert_eq!(set.resolve(Some("a")).unwrap().profile.id, "a");
        assert_eq!(set.resolve(Some(" a ")).unwrap().profile.id, "a");
        assert_eq!(set.resolve(Some("missing")).unwrap().profile.id, "b");
        assert_eq!(set.resolve(None).unwrap().profile.id, "b");

        let no_default = ProfileSet::new(vec![
            profile("x", "k", &["m"], false),
            profile("y", "k", &["m"], false),
        ]);
        assert_eq!(no_default.resolve(None).unwrap().profile.id, "x");
    }

    #[test]
    fn resolution_requires_key_and_models() {
        assert!(matches!(
            ProfileSet::default().resolve(None),
            Err(DiffError::ConfigurationMissing(_))
        ));
        let keyless = ProfileSet::new(vec![profile("a", "  ", &["m"], true)]);
        assert!(matches!(
            keyless.resolve(None),
            Err(DiffError::ConfigurationMissing(_))
        ));
        let modelless = ProfileSet::new(vec![profile("a", "k", &[" ", ""], true)]);
        assert!(matches!(
            modelless.resolve(None),
            Err(DiffError::ConfigurationMissing(_))
        ));
    }

    #[tokio::test]
    async fn sentinel_cannot_be_edited_or_deleted() {
        let store = InMemoryProfileStore::new(profile("ignored", "k", &["m"], false));
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.profiles()[0].id, ENV_PROFILE_ID);
        assert!(snapshot.profiles()[0].is_default);

        assert!(matches!(
            store.delete(ENV_PROFILE_ID).await,
            Err(DiffError::Validation(_))
        ));
        assert!(matches!(
            store.update(ENV_PROFILE_ID, ProfileUpdate::default()).await,
            Err(DiffError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn exactly_one_default_is_kept() {
        let store = InMemoryProfileStore::new(profile("env", "k", &["m"], true));
        let created = store.create(new_profile("Team", true)).await.unwrap();
        assert!(created.is_default);
        assert_eq!(created.base_url.as_deref(), Some("https://proxy.example.com"));

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.profiles().iter().filter(|p| p.is_default).count(), 1);

        store.delete(&created.id).await.unwrap();
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.profiles().len(), 1);
        assert!(snapshot.profiles()[0].is_default);
    }

    #[tokio::test]
    async fn set_default_and_update() {
        let store = InMemoryProfileStore::new(profile("env", "k", &["m"], true));
        let created = store.create(new_profile("Backup", false)).await.unwrap();
        assert!(!created.is_default);

        store.set_default(&created.id).await.unwrap();
        let resolved = store.snapshot().await.resolve(None).unwrap();
        assert_eq!(resolved.profile.id, created.id);

        let updated = store
            .update(
                &created.id,
                ProfileUpdate {
                    name: Some("Renamed".into()),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Renamed");
        assert!(matches!(
            store.set_default("nope").await,
            Err(DiffError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn snapshot_is_isolated_from_later_edits() {
        let store = InMemoryProfileStore::new(profile("env", "k", &["m"], true));
        let before = store.snapshot().await;
        store.create(new_profile("Later", true)).await.unwrap();
        assert_eq!(before.profiles().len(), 1);
        assert_eq!(before.resolve(None).unwrap().profile.id, ENV_PROFILE_ID);
    }
}
