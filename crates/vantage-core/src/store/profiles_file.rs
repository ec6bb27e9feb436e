// ── Canonical profile source ──
//
// Where hydration fetches confirmed profile data from. The application's
// `profiles.yaml` is the default source; tests and embedders can supply
// any async function.

use std::future::Future;
use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{ProfileItem, ProfilesConfig};

/// Fetches the canonical profile index.
pub trait ProfileSource: Send + Sync + 'static {
    fn fetch(&self) -> BoxFuture<'static, Result<ProfilesConfig, CoreError>>;
}

impl<F, Fut> ProfileSource for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ProfilesConfig, CoreError>> + Send + 'static,
{
    fn fetch(&self) -> BoxFuture<'static, Result<ProfilesConfig, CoreError>> {
        Box::pin(self())
    }
}

/// The on-disk profile index (`profiles.yaml`).
///
/// Profile files live in a `profiles/` directory next to the index.
#[derive(Debug, Clone)]
pub struct ProfilesFile {
    path: PathBuf,
}

impl ProfilesFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map_or_else(|| PathBuf::from("profiles"), |dir| dir.join("profiles"))
    }

    /// Absolute path of an item's config file.
    pub fn item_path(&self, item: &ProfileItem) -> Result<PathBuf, CoreError> {
        let file = item.file.as_deref().ok_or_else(|| CoreError::Config {
            message: format!("profile {} has no file", item.uid),
        })?;
        Ok(self.profiles_dir().join(file))
    }

    pub async fn load(&self) -> Result<ProfilesConfig, CoreError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| self.io_error(source))?;
        if raw.trim().is_empty() {
            return Ok(ProfilesConfig::default());
        }
        serde_yaml::from_str(&raw).map_err(|e| CoreError::Config {
            message: format!("invalid {}: {e}", self.path.display()),
        })
    }

    /// Write the index atomically (temp file, then rename).
    pub async fn save(&self, profiles: &ProfilesConfig) -> Result<(), CoreError> {
        let raw = serde_yaml::to_string(profiles).map_err(|e| CoreError::Internal(e.to_string()))?;
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| self.io_error(source))?;
        }
        let tmp = self.path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|source| self.io_error(source))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| self.io_error(source))?;
        debug!(path = %self.path.display(), "profiles saved");
        Ok(())
    }

    /// Point `current` at `uid`, which must name an existing item.
    pub async fn set_current(&self, uid: &str) -> Result<ProfilesConfig, CoreError> {
        let profiles = self.load().await?;
        if profiles.item(uid).is_none() {
            return Err(CoreError::ProfileNotFound { uid: uid.to_owned() });
        }
        let updated = profiles.with_current(uid);
        self.save(&updated).await?;
        Ok(updated)
    }

    fn io_error(&self, source: std::io::Error) -> CoreError {
        CoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl ProfileSource for ProfilesFile {
    fn fetch(&self) -> BoxFuture<'static, Result<ProfilesConfig, CoreError>> {
        let file = self.clone();
        Box::pin(async move { file.load().await })
    }
}
