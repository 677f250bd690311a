//! Persisted monitoring settings.
//!
//! The document lives in a JSON file. A missing file means defaults; writes
//! go to a sibling temp file that is renamed over the original, so a crash
//! mid-write never leaves a torn document behind.

use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tracing::info;

use common::errors::{AppError, AppResult};
use common::models::MonitoringSettings;

pub struct SettingsStore {
    path: Option<PathBuf>,
    current: RwLock<MonitoringSettings>,
}

impl SettingsStore {
    /// Loads the document at `path`, falling back to defaults when the file
    /// does not exist yet.
    pub async fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let settings = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let settings: MonitoringSettings = serde_json::from_slice(&bytes)?;
                settings.check()?;
                info!(path = %path.display(), "Monitoring settings loaded");
                settings
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No settings file, using defaults");
                MonitoringSettings::default()
            }
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        Ok(Self {
            path: Some(path),
            current: RwLock::new(settings),
        })
    }

    /// A store that never touches the filesystem.
    pub fn in_memory(settings: MonitoringSettings) -> Self {
        Self {
            path: None,
            current: RwLock::new(settings),
        }
    }

    pub async fn get(&self) -> MonitoringSettings {
        self.current.read().await.clone()
    }

    /// Validates, persists, then swaps in the new document. On any failure
    /// the previous settings stay in effect.
    pub async fn update(&self, settings: MonitoringSettings) -> AppResult<MonitoringSettings> {
        settings.check()?;
        let mut current = self.current.write().await;
        if let Some(path) = &self.path {
            persist(path, &settings).await?;
        }
        *current = settings.clone();
        Ok(settings)
    }
}

async fn persist(path: &Path, settings: &MonitoringSettings) -> AppResult<()> {
    let json = serde_json::to_vec_pretty(settings)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &json)
        .await
        .map_err(|e| AppError::Storage(format!("cannot write {}: {}", tmp.display(), e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| AppError::Storage(format!("cannot replace {}: {}", path.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "monitor-settings-{}-{}.json",
            name,
            common::utils::IdGenerator::short_id()
        ))
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let store = SettingsStore::load(temp_path("missing")).await.unwrap();
        assert_eq!(store.get().await, MonitoringSettings::default());
    }

    #[tokio::test]
    async fn test_update_persists_and_reloads() {
        let path = temp_path("roundtrip");
        let store = SettingsStore::load(&path).await.unwrap();
        let updated = MonitoringSettings {
            sampling_interval_seconds: 60,
            cpu_threshold: 70.0,
            ..Default::default()
        };
        store.update(updated.clone()).await.unwrap();

        let reloaded = SettingsStore::load(&path).await.unwrap();
        assert_eq!(reloaded.get().await, updated);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_invalid_update_keeps_previous() {
        let store = SettingsStore::in_memory(MonitoringSettings::default());
        let bad = MonitoringSettings {
            sampling_interval_seconds: 0,
            ..Default::default()
        };
        assert!(matches!(store.update(bad).await, Err(AppError::Validation(_))));
        assert_eq!(store.get().await.sampling_interval_seconds, 300);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let path = temp_path("corrupt");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(SettingsStore::load(&path).await.is_err());
        let _ = std::fs::remove_file(&path);
    }
}
