//! Credential protection for passwords stored in the settings file.
//!
//! New passwords are always written in the versioned envelope format. The
//! legacy submodule only exists so previously saved passwords can still be read
//! and migrated; it is slated for removal once stored credentials are upgraded.

pub mod envelope;
pub mod legacy;
pub mod machine;

use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

pub use envelope::{decrypt, encrypt, Envelope};
pub use machine::{LazyMachineSecret, MachineSecret};

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("malformed credential envelope: {0}")]
    MalformedEnvelope(String),
    /// Wrong machine secret and corrupted ciphertext are indistinguishable.
    #[error("credential decryption failed")]
    Decryption,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

/// A stored password, classified by the format it was written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredCredential {
    Legacy(legacy::LegacyCiphertext),
    Versioned(Envelope),
}

impl StoredCredential {
    /// Classifies an opaque stored string without touching key material.
    pub fn classify(stored: &str) -> Result<Self, CipherError> {
        let trimmed = stored.trim();
        if let Ok(raw) = STANDARD.decode(trimmed.as_bytes()) {
            if raw.starts_with(legacy::SALTED_MAGIC) {
                return legacy::LegacyCiphertext::from_bytes(&raw).map(StoredCredential::Legacy);
            }
        }
        Envelope::parse(trimmed).map(StoredCredential::Versioned)
    }

    pub fn decrypt(&self, secret: &MachineSecret) -> Result<String, CipherError> {
        match self {
            StoredCredential::Legacy(blob) => legacy::decrypt_legacy(blob, secret),
            StoredCredential::Versioned(envelope) => envelope.open(secret),
        }
    }

    pub fn needs_migration(&self) -> bool {
        matches!(self, StoredCredential::Legacy(_))
    }
}

/// Decrypts a stored password in whichever format it was written.
pub fn decrypt_stored(stored: &str, secret: &MachineSecret) -> Result<String, CipherError> {
    StoredCredential::classify(stored)?.decrypt(secret)
}

#[cfg(test)]
mod tests {
    use super::{decrypt_stored, CipherError, MachineSecret, StoredCredential};

    const LEGACY_HUNTER2: &str = "U2FsdGVkX18BAgMEBQYHCA5zfP6ibR3LJkxgqlZ78OQ=";

    fn secret(value: &str) -> MachineSecret {
        MachineSecret::new(value).expect("non-empty secret")
    }

    #[test]
    fn classifies_legacy_blobs() {
        let stored = StoredCredential::classify(LEGACY_HUNTER2).expect("legacy blob parses");
        assert!(stored.needs_migration());
        assert_eq!(stored.decrypt(&secret("machine-abc")).unwrap(), "hunter2");
    }

    #[test]
    fn classifies_fresh_envelopes() {
        let sealed = super::encrypt("hunter2", &secret("machine-abc")).unwrap();
        let stored = StoredCredential::classify(&sealed).expect("envelope parses");
        assert!(!stored.needs_migration());
        assert_eq!(decrypt_stored(&sealed, &secret("machine-abc")).unwrap(), "hunter2");
    }

    #[test]
    fn rejects_garbage() {
        let err = StoredCredential::classify("not-an-envelope").unwrap_err();
        assert!(matches!(err, CipherError::MalformedEnvelope(_)));
    }
}
