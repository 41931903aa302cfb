//! Cipher trait for swappable authenticated encryption backends.

use crate::error::VaultError;

/// Length in bytes of every data key handled by the vault.
pub const KEY_LEN: usize = 32;

/// Trait for authenticated encryption (AEAD) over a single 256-bit key.
///
/// Implementations only seal and open; nonce generation and the stored
/// `nonce || ciphertext || tag` framing live in
/// [`CipherService`](crate::cipher::CipherService) so every backend shares
/// the same persisted representation.
pub trait Cipher: Clone + Send + Sync + 'static {
    /// Human-readable backend name, used in logs.
    fn name(&self) -> &'static str;

    /// Nonce length required by the primitive.
    fn nonce_len(&self) -> usize;

    /// Seal `plaintext` under `key` and `nonce` with no associated data.
    ///
    /// Returns `ciphertext || tag`.
    fn seal(&self, key: &[u8; KEY_LEN], nonce: &[u8], plaintext: &[u8])
    -> Result<Vec<u8>, VaultError>;

    /// Open a `ciphertext || tag` buffer produced by [`seal`](Self::seal).
    ///
    /// Any verification failure must map to
    /// [`VaultError::AuthenticationFailure`].
    fn open(&self, key: &[u8; KEY_LEN], nonce: &[u8], sealed: &[u8])
    -> Result<Vec<u8>, VaultError>;
}
