//! Key generations and the two-generation key ring.
//!
//! The manager retains exactly the `current` generation and at most one
//! retired `previous` generation. Rotating again discards whatever was
//! `previous`; values still sealed under it become unrecoverable.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use {
    chrono::{DateTime, Utc},
    sha2::{Digest, Sha256},
    zeroize::Zeroizing,
};

use crate::{error::VaultError, rng, traits::KEY_LEN};

/// One versioned data key.
pub struct KeyGeneration {
    version: u32,
    secret: Zeroizing<[u8; KEY_LEN]>,
    created_at: DateTime<Utc>,
}

impl KeyGeneration {
    /// Draw a fresh random secret for `version`.
    pub fn generate(version: u32) -> Result<Self, VaultError> {
        let mut secret = Zeroizing::new([0u8; KEY_LEN]);
        rng::fill(secret.as_mut())?;
        Ok(Self::from_secret(version, secret))
    }

    /// Build a generation from existing key material.
    #[must_use]
    pub fn from_secret(version: u32, secret: Zeroizing<[u8; KEY_LEN]>) -> Self {
        Self {
            version,
            secret,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn secret(&self) -> &[u8; KEY_LEN] {
        &self.secret
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// First 8 bytes of `SHA-256(secret)` as hex. Safe to log.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        Sha256::digest(self.secret.as_ref())
            .iter()
            .take(8)
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl fmt::Debug for KeyGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGeneration")
            .field("version", &self.version)
            .field("fingerprint", &self.fingerprint())
            .field("created_at", &self.created_at)
            .finish()
    }
}

struct KeyRing {
    current: Arc<KeyGeneration>,
    previous: Option<Arc<KeyGeneration>>,
}

/// Owns the current key generation and one retired generation.
///
/// Reads take a shared lock for the duration of an `Arc` clone. Rotation
/// is serialized by a dedicated guard held across the whole transition,
/// so two rotations can never both derive `previous` from the same
/// `current`.
pub struct KeyManager {
    ring: RwLock<KeyRing>,
    rotation: Mutex<()>,
}

impl KeyManager {
    /// Create a manager holding a fresh version 1 generation.
    pub fn new() -> Result<Self, VaultError> {
        Ok(Self::with_generation(KeyGeneration::generate(1)?))
    }

    /// Create a manager whose current generation is `generation`.
    #[must_use]
    pub fn with_generation(generation: KeyGeneration) -> Self {
        Self {
            ring: RwLock::new(KeyRing {
                current: Arc::new(generation),
                previous: None,
            }),
            rotation: Mutex::new(()),
        }
    }

    /// The generation new values are sealed under.
    #[must_use]
    pub fn current_key(&self) -> Arc<KeyGeneration> {
        Arc::clone(&self.read().current)
    }

    /// The retired generation, if a rotation has happened.
    #[must_use]
    pub fn previous_key(&self) -> Option<Arc<KeyGeneration>> {
        self.read().previous.clone()
    }

    #[must_use]
    pub fn current_version(&self) -> u32 {
        self.read().current.version
    }

    #[must_use]
    pub fn previous_version(&self) -> Option<u32> {
        self.read().previous.as_ref().map(|g| g.version)
    }

    /// Resolve `version` against both retained generations under one read.
    #[must_use]
    pub fn generation_for(&self, version: u32) -> Option<Arc<KeyGeneration>> {
        let ring = self.read();
        if ring.current.version == version {
            return Some(Arc::clone(&ring.current));
        }
        ring.previous
            .as_ref()
            .filter(|g| g.version == version)
            .map(Arc::clone)
    }

    /// Retire `current` to `previous` and install a new generation.
    ///
    /// The new secret is drawn before the ring is touched; if the random
    /// source fails nothing changes. Returns the new version.
    pub fn rotate(&self) -> Result<u32, VaultError> {
        let _rotation = self
            .rotation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let next_version = self.current_version() + 1;
        let next = Arc::new(KeyGeneration::generate(next_version)?);

        let mut ring = self.write();
        let retired = std::mem::replace(&mut ring.current, next);
        let discarded = ring.previous.replace(retired);
        drop(ring);

        #[cfg(feature = "tracing")]
        tracing::info!(
            version = next_version,
            discarded_version = ?discarded.as_ref().map(|g| g.version),
            "key generation rotated"
        );
        drop(discarded);

        Ok(next_version)
    }

    fn read(&self) -> RwLockReadGuard<'_, KeyRing> {
        self.ring.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, KeyRing> {
        self.ring.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.read();
        f.debug_struct("KeyManager")
            .field("current", &ring.current)
            .field("previous", &ring.previous)
            .finish()
    }
}
