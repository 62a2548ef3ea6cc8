//! Versioned credential envelope: scrypt-derived AES-256-CBC.
//!
//! Every encryption draws a fresh salt and IV, derives a key from the machine
//! secret, and packs `{iv, salt, text}` as hex fields inside a base64-encoded
//! JSON object. There is no authentication tag; a modified ciphertext either
//! fails the padding check or decrypts to the wrong plaintext.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{CipherError, MachineSecret};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 16;
const KEY_LEN: usize = 32;
const BLOCK_LEN: usize = 16;

/// scrypt cost parameters the stored data was written with: N = 2^14, r = 8, p = 1.
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Decoded envelope fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
}

/// On-disk shape of the envelope before base64 wrapping.
#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    iv: String,
    salt: String,
    text: String,
}

fn derive_key(secret: &MachineSecret, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, CipherError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|e| CipherError::KeyDerivation(format!("{e}")))?;
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    scrypt::scrypt(secret.expose().as_bytes(), salt, &params, &mut *key)
        .map_err(|e| CipherError::KeyDerivation(format!("{e}")))?;
    Ok(key)
}

fn decode_fixed<const N: usize>(field: &str, value: &str) -> Result<[u8; N], CipherError> {
    let bytes = hex::decode(value)
        .map_err(|e| CipherError::MalformedEnvelope(format!("{field} is not hex: {e}")))?;
    bytes.try_into().map_err(|raw: Vec<u8>| {
        CipherError::MalformedEnvelope(format!("{field} must be {N} bytes, got {}", raw.len()))
    })
}

impl Envelope {
    /// Encrypts `plaintext` under a key derived from `secret` and fresh random salt/IV.
    pub fn seal(plaintext: &str, secret: &MachineSecret) -> Result<Self, CipherError> {
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);
        Self::seal_with(plaintext, secret, salt, iv)
    }

    fn seal_with(
        plaintext: &str,
        secret: &MachineSecret,
        salt: [u8; SALT_LEN],
        iv: [u8; IV_LEN],
    ) -> Result<Self, CipherError> {
        let key = derive_key(secret, &salt)?;
        let ciphertext = Aes256CbcEnc::new_from_slices(&key[..], &iv)
            .map_err(|e| CipherError::KeyDerivation(format!("{e}")))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        Ok(Self { salt, iv, ciphertext })
    }

    /// Decrypts the envelope. Any key or data mismatch surfaces as `Decryption`.
    pub fn open(&self, secret: &MachineSecret) -> Result<String, CipherError> {
        let key = derive_key(secret, &self.salt)?;
        let plaintext = Aes256CbcDec::new_from_slices(&key[..], &self.iv)
            .map_err(|e| CipherError::KeyDerivation(format!("{e}")))?
            .decrypt_padded_vec_mut::<Pkcs7>(&self.ciphertext)
            .map_err(|_| CipherError::Decryption)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::Decryption)
    }

    /// Serializes to the opaque string stored in the settings file.
    pub fn encode(&self) -> String {
        let wire = WireEnvelope {
            iv: hex::encode(self.iv),
            salt: hex::encode(self.salt),
            text: hex::encode(&self.ciphertext),
        };
        // A struct of three strings always serializes.
        let json = serde_json::to_string(&wire).unwrap_or_default();
        STANDARD.encode(json.as_bytes())
    }

    /// Parses a stored string. Legacy blobs and arbitrary text are rejected.
    pub fn parse(stored: &str) -> Result<Self, CipherError> {
        let raw = STANDARD
            .decode(stored.trim().as_bytes())
            .map_err(|e| CipherError::MalformedEnvelope(format!("base64 decoding failed: {e}")))?;
        let wire: WireEnvelope = serde_json::from_slice(&raw)
            .map_err(|e| CipherError::MalformedEnvelope(format!("envelope is not valid json: {e}")))?;

        let salt = decode_fixed::<SALT_LEN>("salt", &wire.salt)?;
        let iv = decode_fixed::<IV_LEN>("iv", &wire.iv)?;
        let ciphertext = hex::decode(&wire.text)
            .map_err(|e| CipherError::MalformedEnvelope(format!("text is not hex: {e}")))?;
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(CipherError::MalformedEnvelope(format!(
                "ciphertext length {} is not a positive multiple of {BLOCK_LEN}",
                ciphertext.len()
            )));
        }

        Ok(Self { salt, iv, ciphertext })
    }
}

/// Encrypts a password into a fresh stored envelope string.
pub fn encrypt(plaintext: &str, secret: &MachineSecret) -> Result<String, CipherError> {
    Envelope::seal(plaintext, secret).map(|envelope| envelope.encode())
}

/// Decrypts a stored envelope string produced by [`encrypt`].
pub fn decrypt(stored: &str, secret: &MachineSecret) -> Result<String, CipherError> {
    Envelope::parse(stored)?.open(secret)
}
