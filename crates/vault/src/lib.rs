//! Key-versioned field encryption with in-place key rotation.
//!
//! Every sealed value carries the version of the key generation that sealed
//! it. The [`KeyManager`] retains exactly two generations (current and
//! previous), and [`Vault::rotate_and_reencrypt`] moves stored records onto
//! a fresh generation without taking readers offline.
//!
//! The AEAD backend sits behind the [`Cipher`] trait; the default is
//! XChaCha20-Poly1305.

pub mod cipher;
pub mod error;
pub mod keys;
pub mod record;
mod rng;
pub mod traits;
pub mod vault;
pub mod xchacha20;

pub use {
    cipher::{CipherService, EncryptedValue},
    error::VaultError,
    keys::{KeyGeneration, KeyManager},
    record::{
        GenerationAudit, RecordPersister, SensitiveRecord, SweepAction, SweepOutcome, SweepReport,
    },
    traits::{Cipher, KEY_LEN},
    vault::{KeyStatus, Vault},
    xchacha20::XChaCha20Poly1305Cipher,
};
