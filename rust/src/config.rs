//! Settings file handling. Server profiles keep their passwords as stored
//! credential strings; plaintext passwords are never written here.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::servers::ServerProfile;

/// Environment variable that points at the settings file.
pub const CONFIG_ENV: &str = "FLUIG_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings file unreadable: {0}")]
    Io(String),
    #[error("settings parse failed: {0}")]
    Parse(String),
    #[error("no configuration directory available; set {CONFIG_ENV}")]
    NoConfigDir,
}

/// Defaults used by the form fast export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FastExportSettings {
    pub default_server_id: Option<String>,
    pub default_parent_id: Option<String>,
    pub default_dataset_name: Option<String>,
    pub default_persistence_type: Option<u8>,
    pub default_description_field: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub configurations: Vec<ServerProfile>,
    pub fast_export: FastExportSettings,
}

impl Settings {
    /// Loads settings from `path`. A missing file yields empty settings.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "settings file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(format!("{}: {e}", path.display()))),
        };
        let settings: Settings =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(format!("{e}")))?;
        debug!(
            path = %path.display(),
            servers = settings.configurations.len(),
            "settings loaded"
        );
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io(format!("{e}")))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(format!("{e}")))?;
        fs::write(path, json).map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), "settings saved");
        Ok(())
    }
}

/// Resolves the settings path: explicit flag, then `FLUIG_CONFIG`, then the
/// per-user configuration directory.
pub fn resolve_settings_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    dirs::config_dir()
        .map(|dir| dir.join("fluig").join("settings.json"))
        .ok_or(ConfigError::NoConfigDir)
}

#[cfg(test)]
mod tests {
    use super::{resolve_settings_path, FastExportSettings, Settings};
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(dir.path().join("absent.json")).expect("defaults");
        assert!(settings.configurations.is_empty());
        assert_eq!(settings.fast_export, FastExportSettings::default());
    }

    #[test]
    fn loads_camel_case_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let payload = json!({
            "configurations": [{
                "id": "srv-1",
                "name": "Homologação",
                "host": "fluig.example.com",
                "ssl": true,
                "port": 443,
                "username": "admin",
                "password": "stored",
                "companyId": 1,
                "userCode": "admin",
                "confirmExporting": true
            }],
            "fastExport": {
                "defaultServerId": "srv-1",
                "defaultParentId": "42",
                "defaultDatasetName": "ds_forms",
                "defaultPersistenceType": 1
            }
        });
        fs::write(&path, serde_json::to_vec(&payload).unwrap()).unwrap();

        let settings = Settings::load(&path).expect("settings should load");
        assert_eq!(settings.configurations.len(), 1);
        assert!(settings.configurations[0].confirm_exporting);
        assert_eq!(settings.fast_export.default_parent_id.as_deref(), Some("42"));
        assert_eq!(settings.fast_export.default_persistence_type, Some(1));
        assert_eq!(settings.fast_export.default_description_field, None);
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = Settings::default();
        settings.fast_export.default_dataset_name = Some("ds_forms".to_string());
        settings.save(&path).expect("save should succeed");

        let reloaded = Settings::load(&path).unwrap();
        assert_eq!(reloaded.fast_export.default_dataset_name.as_deref(), Some("ds_forms"));
    }

    #[test]
    fn rejects_invalid_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        let err = Settings::load(&path).unwrap_err();
        assert!(format!("{err}").contains("settings parse failed"));
    }

    #[test]
    fn explicit_path_wins() {
        let path = resolve_settings_path(Some(PathBuf::from("/tmp/custom.json"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/custom.json"));
    }
}
