//! Operating-system randomness.
//!
//! Every nonce and every key generation is drawn from the OS source
//! directly. An unreadable source is surfaced as
//! [`VaultError::RandomSource`] and never retried.

use rand::{TryRngCore, rngs::OsRng};

use crate::error::VaultError;

/// Fill `buf` from the operating system CSPRNG.
pub fn fill(buf: &mut [u8]) -> Result<(), VaultError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| VaultError::RandomSource(e.to_string()))
}
