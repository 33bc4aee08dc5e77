use std::path::PathBuf;

use log::{info, warn};
use rocket::serde::json::serde_json;
use rocket::tokio::fs;
use serde::{Deserialize, Serialize};

/// Operator settings that outlive any single vote session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Target port for tally broadcasts, exactly as the operator entered it.
    /// Out-of-range values are kept here and only resolved at broadcast time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_port: Option<i64>,
}

/// A JSON file holding [`Settings`].
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
}

impl SettingsStore {
    /// Load the settings file. A missing or unreadable file yields defaults.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable settings file {}: {e}", path.display());
                Settings::default()
            }),
            Err(_) => {
                info!("No saved settings at {}, using defaults", path.display());
                Settings::default()
            }
        };
        Self { path, settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Record a new broadcast port and write the settings file.
    pub async fn set_broadcast_port(&mut self, port: i64) -> std::io::Result<()> {
        self.settings.broadcast_port = Some(port);
        self.save().await
    }

    async fn save(&self) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(&self.settings)?;
        fs::write(&self.path, json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::persistence::SETTINGS_FILE;

    #[rocket::async_test]
    async fn defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join(SETTINGS_FILE)).await;
        assert_eq!(store.settings(), &Settings::default());
    }

    #[rocket::async_test]
    async fn port_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);

        let mut store = SettingsStore::load(&path).await;
        store.set_broadcast_port(9100).await.unwrap();

        let reloaded = SettingsStore::load(&path).await;
        assert_eq!(reloaded.settings().broadcast_port, Some(9100));
    }

    #[rocket::async_test]
    async fn garbage_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, "{ not json").await.unwrap();

        let store = SettingsStore::load(&path).await;
        assert_eq!(store.settings(), &Settings::default());
    }
}
