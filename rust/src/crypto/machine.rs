//! Machine-bound secret used as key material for stored passwords.
//!
//! The secret is never read implicitly by the cipher. Callers resolve it once
//! (usually through [`MachineSecret::from_environment`]) and pass it to every
//! encrypt/decrypt call.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use tracing::debug;
use zeroize::Zeroizing;

use super::CipherError;

/// Environment variable that overrides the machine identity.
pub const MACHINE_ID_ENV: &str = "FLUIG_MACHINE_ID";

const MACHINE_ID_FILES: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

pub struct MachineSecret {
    value: Zeroizing<String>,
}

impl MachineSecret {
    pub fn new(value: impl Into<String>) -> Result<Self, CipherError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(CipherError::InvalidInput("machine secret must not be empty".to_string()));
        }
        Ok(Self {
            value: Zeroizing::new(value),
        })
    }

    /// Resolves the secret from `FLUIG_MACHINE_ID`, then the system machine-id files.
    pub fn from_environment() -> Result<Self, CipherError> {
        if let Ok(value) = std::env::var(MACHINE_ID_ENV) {
            if !value.trim().is_empty() {
                debug!(source = MACHINE_ID_ENV, "machine secret resolved");
                return Self::new(value);
            }
        }
        for candidate in MACHINE_ID_FILES {
            if let Some(secret) = Self::from_file(Path::new(candidate)) {
                debug!(source = %candidate, "machine secret resolved");
                return Ok(secret);
            }
        }
        Err(CipherError::InvalidInput(format!(
            "no machine identity available; set {MACHINE_ID_ENV}"
        )))
    }

    fn from_file(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        Self::new(content.trim().to_string()).ok()
    }

    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for MachineSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MachineSecret(<redacted>)")
    }
}

/// Machine secret resolved from the environment the first time it is needed,
/// so commands that never touch a credential work on hosts without one.
#[derive(Debug, Default)]
pub struct LazyMachineSecret {
    cell: OnceLock<MachineSecret>,
}

impl LazyMachineSecret {
    /// Resolves through [`MachineSecret::from_environment`] on first use.
    pub fn from_environment() -> Self {
        Self::default()
    }

    pub fn resolved(secret: MachineSecret) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(secret);
        Self { cell }
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn get(&self) -> Result<&MachineSecret, CipherError> {
        if let Some(secret) = self.cell.get() {
            return Ok(secret);
        }
        let secret = MachineSecret::from_environment()?;
        Ok(self.cell.get_or_init(|| secret))
    }
}

#[cfg(test)]
mod tests {
    use super::{LazyMachineSecret, MachineSecret};
    use crate::crypto::CipherError;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn rejects_empty_secrets() {
        for value in ["", "   "] {
            let err = MachineSecret::new(value).unwrap_err();
            assert!(matches!(err, CipherError::InvalidInput(_)));
        }
    }

    #[test]
    fn reads_trimmed_machine_id_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("machine-id");
        fs::write(&path, "4f1c2a\n").unwrap();
        let secret = MachineSecret::from_file(&path).expect("file holds an id");
        assert_eq!(secret.expose(), "4f1c2a");
    }

    #[test]
    fn debug_output_is_redacted() {
        let secret = MachineSecret::new("machine-abc").unwrap();
        assert!(!format!("{secret:?}").contains("machine-abc"));
    }

    #[test]
    fn lazy_secret_keeps_the_resolved_value() {
        let lazy = LazyMachineSecret::resolved(MachineSecret::new("machine-abc").unwrap());
        assert!(lazy.is_resolved());
        assert_eq!(lazy.get().unwrap().expose(), "machine-abc");
        assert!(!LazyMachineSecret::from_environment().is_resolved());
        assert!(!format!("{lazy:?}").contains("machine-abc"));
    }
}
