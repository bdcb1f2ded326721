//! Encrypted-credential handling.
//!
//! Passwords in the configuration may be stored AES-128-CBC encrypted and
//! base64 encoded, with the key derived from a shared password and a salt
//! via PBKDF2-HMAC-SHA1 (128 iterations, 128-bit key) — the output of
//!
//! ```text
//! openssl enc -aes-128-cbc -pbkdf2 -iter 128 -md sha1 -k <key> -S <salt>
//! ```
//!
//! A credential without salt and iv is taken as plaintext. Supplying only
//! one of the two, or both without a configured key, is an error rather
//! than a guess.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;

use crate::error::ConfigError;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

const PBKDF2_ROUNDS: u32 = 128;

/// Decrypts credentials with a shared password.
#[derive(Debug, Clone, Default)]
pub struct Decrypter {
    key: Option<String>,
}

impl Decrypter {
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: key.filter(|k| !k.is_empty()),
        }
    }

    /// `true` once a non-empty password is configured.
    pub fn is_ready(&self) -> bool {
        self.key.is_some()
    }

    /// Decrypts `text`. With neither salt nor iv the input is returned
    /// unchanged; with exactly one of them, or both but no configured
    /// password, the settings are ambiguous and refused.
    pub fn decrypt(
        &self,
        text: &str,
        salt: Option<&str>,
        iv: Option<&str>,
    ) -> Result<String, ConfigError> {
        let (salt, iv) = match (salt, iv) {
            (None, None) => return Ok(text.to_string()),
            (Some(salt), Some(iv)) => (salt, iv),
            _ => return Err(ConfigError::AmbiguousDecryption),
        };
        let Some(password) = &self.key else {
            return Err(ConfigError::AmbiguousDecryption);
        };

        let salt = BASE64
            .decode(salt)
            .map_err(|e| ConfigError::Decrypt(format!("bad salt: {e}")))?;
        let iv = BASE64
            .decode(iv)
            .map_err(|e| ConfigError::Decrypt(format!("bad iv: {e}")))?;
        let ciphertext = BASE64
            .decode(text)
            .map_err(|e| ConfigError::Decrypt(format!("bad ciphertext: {e}")))?;

        let key = derive_key(password, &salt);
        let plaintext = Aes128CbcDec::new_from_slices(&key, &iv)
            .map_err(|e| ConfigError::Decrypt(format!("bad iv length: {e}")))?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| ConfigError::Decrypt("bad padding".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| ConfigError::Decrypt("plaintext is not UTF-8".to_string()))
    }

    /// Encrypts `text` with the configured password, yielding the base64
    /// ciphertext. The inverse of [`Self::decrypt`], used when writing
    /// credentials into a configuration.
    pub fn encrypt(&self, text: &str, salt: &str, iv: &str) -> Result<String, ConfigError> {
        let Some(password) = &self.key else {
            return Err(ConfigError::AmbiguousDecryption);
        };
        let salt = BASE64
            .decode(salt)
            .map_err(|e| ConfigError::Decrypt(format!("bad salt: {e}")))?;
        let iv = BASE64
            .decode(iv)
            .map_err(|e| ConfigError::Decrypt(format!("bad iv: {e}")))?;

        let key = derive_key(password, &salt);
        let ciphertext = Aes128CbcEnc::new_from_slices(&key, &iv)
            .map_err(|e| ConfigError::Decrypt(format!("bad iv length: {e}")))?
            .encrypt_padded_vec_mut::<Pkcs7>(text.as_bytes());
        Ok(BASE64.encode(ciphertext))
    }
}

fn derive_key(password: &str, salt: &[u8]) -> [u8; 16] {
    let mut key = [0u8; 16];
    pbkdf2_hmac::<Sha1>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    key
}
