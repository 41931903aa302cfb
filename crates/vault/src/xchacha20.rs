//! XChaCha20-Poly1305 implementation of the [`Cipher`] trait.

#[allow(deprecated)] // upstream generic-array 0.x deprecation
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};

use crate::{
    error::VaultError,
    traits::{Cipher, KEY_LEN},
};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_LEN: usize = 24;

/// Poly1305 tag size.
pub const TAG_LEN: usize = 16;

/// XChaCha20-Poly1305 AEAD cipher.
///
/// The 192-bit nonce makes randomly drawn nonces safe for the number of
/// values a single key generation protects.
#[derive(Debug, Clone, Copy, Default)]
pub struct XChaCha20Poly1305Cipher;

impl Cipher for XChaCha20Poly1305Cipher {
    fn name(&self) -> &'static str {
        "xchacha20poly1305"
    }

    fn nonce_len(&self) -> usize {
        NONCE_LEN
    }

    #[allow(deprecated)]
    fn seal(
        &self,
        key: &[u8; KEY_LEN],
        nonce: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, VaultError> {
        if nonce.len() != NONCE_LEN {
            return Err(VaultError::MalformedCiphertext {
                reason: "nonce has wrong length",
            });
        }
        let cipher = XChaCha20Poly1305::new(key.into());
        cipher
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|_| VaultError::AuthenticationFailure)
    }

    #[allow(deprecated)]
    fn open(
        &self,
        key: &[u8; KEY_LEN],
        nonce: &[u8],
        sealed: &[u8],
    ) -> Result<Vec<u8>, VaultError> {
        if nonce.len() != NONCE_LEN {
            return Err(VaultError::MalformedCiphertext {
                reason: "nonce has wrong length",
            });
        }
        let cipher = XChaCha20Poly1305::new(key.into());
        cipher
            .decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|_| VaultError::AuthenticationFailure)
    }
}
