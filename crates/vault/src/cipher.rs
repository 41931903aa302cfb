//! AEAD cipher service bound to a single key.
//!
//! Stored layout: `base64(nonce || ciphertext || tag)` using the standard
//! alphabet with padding. The layout carries no version byte; the key
//! generation is tracked beside the value by the owning record.

use std::fmt;

use {base64::Engine, zeroize::Zeroizing};

use crate::{
    error::VaultError,
    rng,
    traits::{Cipher, KEY_LEN},
    xchacha20::XChaCha20Poly1305Cipher,
};

/// An encrypted field as persisted by the storage layer.
#[derive(Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct EncryptedValue(String);

impl EncryptedValue {
    /// Wrap a stored string without validating it.
    ///
    /// Validation happens on decrypt.
    #[must_use]
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for EncryptedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EncryptedValue")
            .field(&format_args!("{} chars", self.0.len()))
            .finish()
    }
}

impl From<String> for EncryptedValue {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Authenticated encrypt/decrypt over one fixed 256-bit key.
///
/// Holds no mutable state, so a single instance can serve any number of
/// concurrent callers.
#[derive(Clone)]
pub struct CipherService<C: Cipher = XChaCha20Poly1305Cipher> {
    backend: C,
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl CipherService<XChaCha20Poly1305Cipher> {
    /// Bind the default XChaCha20-Poly1305 backend to `key`.
    #[must_use]
    pub fn xchacha20(key: &[u8; KEY_LEN]) -> Self {
        Self::new(XChaCha20Poly1305Cipher, key)
    }
}

impl<C: Cipher> CipherService<C> {
    #[must_use]
    pub fn new(backend: C, key: &[u8; KEY_LEN]) -> Self {
        Self {
            backend,
            key: Zeroizing::new(*key),
        }
    }

    /// Encrypt `plaintext` under a freshly drawn nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedValue, VaultError> {
        let nonce_len = self.backend.nonce_len();
        let mut nonce = vec![0u8; nonce_len];
        rng::fill(&mut nonce)?;

        let sealed = self.backend.seal(&self.key, &nonce, plaintext)?;

        let mut blob = Vec::with_capacity(nonce_len + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(EncryptedValue(
            base64::engine::general_purpose::STANDARD.encode(blob),
        ))
    }

    /// Decrypt a value produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, value: &EncryptedValue) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let blob = base64::engine::general_purpose::STANDARD
            .decode(value.as_str())
            .map_err(|_| VaultError::MalformedCiphertext {
                reason: "invalid base64",
            })?;

        let nonce_len = self.backend.nonce_len();
        if blob.len() < nonce_len {
            return Err(VaultError::MalformedCiphertext {
                reason: "shorter than nonce",
            });
        }

        let (nonce, sealed) = blob.split_at(nonce_len);
        self.backend
            .open(&self.key, nonce, sealed)
            .map(Zeroizing::new)
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<EncryptedValue, VaultError> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_str(&self, value: &EncryptedValue) -> Result<Zeroizing<String>, VaultError> {
        let bytes = self.decrypt(value)?;
        String::from_utf8(bytes.to_vec())
            .map(Zeroizing::new)
            .map_err(|_| VaultError::MalformedCiphertext {
                reason: "plaintext is not utf-8",
            })
    }

    /// Name of the bound AEAD backend.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

impl<C: Cipher> fmt::Debug for CipherService<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherService")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}
