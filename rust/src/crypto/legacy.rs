//! Read-only support for passwords saved before the envelope format existed.
//!
//! Those values are OpenSSL "salted" blobs keyed directly on the machine
//! secret: `base64("Salted__" || salt[8] || ciphertext)`, with key and IV from
//! EVP_BytesToKey (MD5, one round) and AES-256-CBC. Nothing new is ever written
//! in this format; remove this module once stored credentials are migrated.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use md5::{Digest, Md5};
use zeroize::Zeroizing;

use super::{CipherError, MachineSecret};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const SALTED_MAGIC: &[u8] = b"Salted__";
const SALT_LEN: usize = 8;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyCiphertext {
    pub salt: [u8; SALT_LEN],
    pub ciphertext: Vec<u8>,
}

impl LegacyCiphertext {
    /// Splits base64-decoded bytes into salt and ciphertext.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, CipherError> {
        let rest = raw
            .strip_prefix(SALTED_MAGIC)
            .ok_or_else(|| CipherError::MalformedEnvelope("missing Salted__ header".to_string()))?;
        if rest.len() <= SALT_LEN || (rest.len() - SALT_LEN) % 16 != 0 {
            return Err(CipherError::MalformedEnvelope(
                "legacy ciphertext has an invalid length".to_string(),
            ));
        }
        let (salt, ciphertext) = rest.split_at(SALT_LEN);
        let mut salt_bytes = [0u8; SALT_LEN];
        salt_bytes.copy_from_slice(salt);
        Ok(Self {
            salt: salt_bytes,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// OpenSSL's EVP_BytesToKey with MD5 and a single iteration.
fn evp_bytes_to_key(passphrase: &[u8], salt: &[u8]) -> Zeroizing<[u8; KEY_LEN + IV_LEN]> {
    let mut derived = Zeroizing::new([0u8; KEY_LEN + IV_LEN]);
    let mut previous: Vec<u8> = Vec::new();
    let mut filled = 0;
    while filled < derived.len() {
        let mut hasher = Md5::new();
        hasher.update(&previous);
        hasher.update(passphrase);
        hasher.update(salt);
        previous = hasher.finalize().to_vec();

        let take = previous.len().min(derived.len() - filled);
        derived[filled..filled + take].copy_from_slice(&previous[..take]);
        filled += take;
    }
    derived
}

pub fn decrypt_legacy(blob: &LegacyCiphertext, secret: &MachineSecret) -> Result<String, CipherError> {
    let material = evp_bytes_to_key(secret.expose().as_bytes(), &blob.salt);
    let (key, iv) = material.split_at(KEY_LEN);
    let plaintext = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| CipherError::KeyDerivation(format!("{e}")))?
        .decrypt_padded_vec_mut::<Pkcs7>(&blob.ciphertext)
        .map_err(|_| CipherError::Decryption)?;
    String::from_utf8(plaintext).map_err(|_| CipherError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::{decrypt_legacy, evp_bytes_to_key, LegacyCiphertext};
    use crate::crypto::{CipherError, MachineSecret, StoredCredential};
    use base64::{engine::general_purpose::STANDARD, Engine};

    // `openssl enc -aes-256-cbc -md md5 -S 0102030405060708 -pass pass:machine-abc` of "hunter2".
    const LEGACY_HUNTER2: &str = "U2FsdGVkX18BAgMEBQYHCA5zfP6ibR3LJkxgqlZ78OQ=";

    fn blob() -> LegacyCiphertext {
        let raw = STANDARD.decode(LEGACY_HUNTER2).unwrap();
        LegacyCiphertext::from_bytes(&raw).expect("valid legacy blob")
    }

    #[test]
    fn decrypts_openssl_blob() {
        let secret = MachineSecret::new("machine-abc").unwrap();
        assert_eq!(blob().salt, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(decrypt_legacy(&blob(), &secret).unwrap(), "hunter2");
    }

    #[test]
    fn wrong_secret_fails() {
        let secret = MachineSecret::new("machine-xyz").unwrap();
        assert!(matches!(decrypt_legacy(&blob(), &secret), Err(CipherError::Decryption)));
    }

    #[test]
    fn legacy_blob_is_not_an_envelope() {
        let stored = StoredCredential::classify(LEGACY_HUNTER2).unwrap();
        assert!(matches!(stored, StoredCredential::Legacy(_)));
        assert!(crate::crypto::envelope::Envelope::parse(LEGACY_HUNTER2).is_err());
    }

    #[test]
    fn rejects_truncated_blobs() {
        let err = LegacyCiphertext::from_bytes(b"Salted__1234").unwrap_err();
        assert!(matches!(err, CipherError::MalformedEnvelope(_)));
        assert!(LegacyCiphertext::from_bytes(b"plain bytes").is_err());
    }

    #[test]
    fn derives_48_bytes() {
        let material = evp_bytes_to_key(b"machine-abc", &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(material.len(), 48);
        assert_ne!(&material[..16], &material[16..32]);
    }
}
