//! Everything a command needs: loaded settings, where they live, the machine
//! secret, and the workspace the artifacts are read from and written to.

use std::path::{Path, PathBuf};

use crate::config::{ConfigError, Settings};
use crate::crypto::LazyMachineSecret;

#[derive(Debug)]
pub struct AppContext {
    pub settings: Settings,
    pub settings_path: PathBuf,
    pub secret: LazyMachineSecret,
    pub workspace: PathBuf,
}

impl AppContext {
    pub fn load(settings_path: PathBuf, secret: LazyMachineSecret, workspace: PathBuf) -> Result<Self, ConfigError> {
        let settings = Settings::load(&settings_path)?;
        Ok(Self {
            settings,
            settings_path,
            secret,
            workspace,
        })
    }

    pub fn persist(&self) -> Result<(), ConfigError> {
        self.settings.save(&self.settings_path)
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }
}
