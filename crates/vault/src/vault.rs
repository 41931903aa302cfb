//! Vault orchestrator: field encryption, key-versioned decryption, rotation
//! sweeps.

use std::sync::{Arc, PoisonError, RwLock};

#[cfg(feature = "metrics")]
use std::time::Instant;

use {
    chrono::{DateTime, Utc},
    tokio::sync::Mutex,
    zeroize::Zeroizing,
};

#[cfg(feature = "metrics")]
use cardvault_metrics::{counter, gauge, histogram, labels, vault as vault_metrics};

use crate::{
    cipher::{CipherService, EncryptedValue},
    error::VaultError,
    keys::{KeyGeneration, KeyManager},
    record::{
        GenerationAudit, RecordPersister, SensitiveRecord, SweepAction, SweepOutcome, SweepReport,
    },
    traits::Cipher,
    xchacha20::XChaCha20Poly1305Cipher,
};

/// Key status exposed to the admin API.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct KeyStatus {
    pub current_version: u32,
    pub previous_version: Option<u32>,
    /// Version new values are sealed under. Trails `current_version` only
    /// while a rotation sweep is running.
    pub active_version: u32,
    pub current_fingerprint: String,
    pub current_created_at: DateTime<Utc>,
    pub cipher: &'static str,
    pub rotating: bool,
}

/// A key generation paired with a cipher bound to it.
///
/// Published as one immutable snapshot so a reader can never observe the
/// version of one generation with the cipher of another.
struct ActiveKey<C: Cipher> {
    version: u32,
    cipher: CipherService<C>,
}

impl<C: Cipher> ActiveKey<C> {
    fn bind(backend: C, generation: &KeyGeneration) -> Self {
        Self {
            version: generation.version(),
            cipher: CipherService::new(backend, generation.secret()),
        }
    }
}

/// Publishes a rotation's snapshot when dropped.
///
/// Created as soon as the key manager has rotated, so a sweep future that
/// is dropped mid-way still moves new writes onto the current generation.
/// Unswept records stay readable through `previous` until the next sweep.
struct PendingPublish<'a, C: Cipher> {
    vault: &'a Vault<C>,
    key: Arc<ActiveKey<C>>,
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    completed: bool,
}

impl<'a, C: Cipher> PendingPublish<'a, C> {
    fn new(vault: &'a Vault<C>, key: ActiveKey<C>) -> Self {
        Self {
            vault,
            key: Arc::new(key),
            completed: false,
        }
    }

    fn complete(mut self) {
        self.completed = true;
    }
}

impl<C: Cipher> Drop for PendingPublish<'_, C> {
    fn drop(&mut self) {
        #[cfg(feature = "tracing")]
        if !self.completed {
            tracing::warn!(
                version = self.key.version,
                "re-encryption sweep cancelled, publishing new generation"
            );
        }
        self.vault.publish(Arc::clone(&self.key));
    }
}

/// Key-versioned encryption vault.
///
/// Generic over [`Cipher`] but defaults to [`XChaCha20Poly1305Cipher`].
/// New values are sealed under the active snapshot; stored values are
/// opened with whichever retained generation their version tag names.
pub struct Vault<C: Cipher = XChaCha20Poly1305Cipher> {
    keys: KeyManager,
    backend: C,
    active: RwLock<Arc<ActiveKey<C>>>,
    sweep: Mutex<()>,
}

impl Vault<XChaCha20Poly1305Cipher> {
    /// Create a vault with a fresh version 1 key and the default cipher.
    pub fn new() -> Result<Self, VaultError> {
        Self::with_cipher(XChaCha20Poly1305Cipher)
    }
}

impl<C: Cipher> Vault<C> {
    /// Create a vault with a custom cipher and a fresh version 1 key.
    pub fn with_cipher(backend: C) -> Result<Self, VaultError> {
        Ok(Self::with_key_manager(backend, KeyManager::new()?))
    }

    /// Create a vault over an existing key manager.
    #[must_use]
    pub fn with_key_manager(backend: C, keys: KeyManager) -> Self {
        let active = ActiveKey::bind(backend.clone(), &keys.current_key());

        #[cfg(feature = "tracing")]
        tracing::info!(
            version = active.version,
            cipher = backend.name(),
            "vault initialized"
        );
        #[cfg(feature = "metrics")]
        gauge!(vault_metrics::KEY_VERSION).set(f64::from(active.version));

        Self {
            keys,
            backend,
            active: RwLock::new(Arc::new(active)),
            sweep: Mutex::new(()),
        }
    }

    /// Version of the key manager's current generation.
    #[must_use]
    pub fn current_version(&self) -> u32 {
        self.keys.current_version()
    }

    #[must_use]
    pub fn previous_version(&self) -> Option<u32> {
        self.keys.previous_version()
    }

    /// Version new values are sealed under right now.
    #[must_use]
    pub fn active_version(&self) -> u32 {
        self.snapshot().version
    }

    /// Whether a rotation or sweep currently holds the vault.
    #[must_use]
    pub fn is_rotating(&self) -> bool {
        self.sweep.try_lock().is_err()
    }

    #[must_use]
    pub fn status(&self) -> KeyStatus {
        let current = self.keys.current_key();
        KeyStatus {
            current_version: current.version(),
            previous_version: self.keys.previous_version(),
            active_version: self.active_version(),
            current_fingerprint: current.fingerprint(),
            current_created_at: current.created_at(),
            cipher: self.backend.name(),
            rotating: self.is_rotating(),
        }
    }

    /// Encrypt one field and return it with the key version that sealed it.
    pub fn encrypt_field(&self, plaintext: &[u8]) -> Result<(EncryptedValue, u32), VaultError> {
        let active = self.snapshot();
        let value = active.cipher.encrypt(plaintext)?;

        #[cfg(feature = "metrics")]
        counter!(vault_metrics::ENCRYPT_TOTAL).increment(1);

        Ok((value, active.version))
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<(EncryptedValue, u32), VaultError> {
        self.encrypt_field(plaintext.as_bytes())
    }

    /// Encrypt all sealed fields of one record under a single generation.
    ///
    /// Separate [`Vault::encrypt_field`] calls may straddle a rotation and
    /// tag sibling fields with different versions; this cannot.
    pub fn encrypt_fields(
        &self,
        plaintexts: &[&[u8]],
    ) -> Result<(Vec<EncryptedValue>, u32), VaultError> {
        let active = self.snapshot();
        let values = plaintexts
            .iter()
            .map(|p| active.cipher.encrypt(p))
            .collect::<Result<Vec<_>, _>>()?;

        #[cfg(feature = "metrics")]
        counter!(vault_metrics::ENCRYPT_TOTAL).increment(values.len() as u64);

        Ok((values, active.version))
    }

    /// Decrypt one field sealed under `record_version`.
    ///
    /// Fails with [`VaultError::KeyUnavailable`] when the version is neither
    /// the current nor the previous generation.
    pub fn decrypt_field(
        &self,
        value: &EncryptedValue,
        record_version: u32,
    ) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let result = self
            .key_for(record_version)
            .and_then(|key| key.cipher.decrypt(value));

        #[cfg(feature = "metrics")]
        counter!(
            vault_metrics::DECRYPT_TOTAL,
            labels::RESULT => match &result {
                Ok(_) => "ok",
                Err(e) => e.kind(),
            }
        )
        .increment(1);

        result
    }

    pub fn decrypt_str(
        &self,
        value: &EncryptedValue,
        record_version: u32,
    ) -> Result<Zeroizing<String>, VaultError> {
        let bytes = self.decrypt_field(value, record_version)?;
        String::from_utf8(bytes.to_vec())
            .map(Zeroizing::new)
            .map_err(|_| VaultError::MalformedCiphertext {
                reason: "plaintext is not utf-8",
            })
    }

    /// Rotate without sweeping: new values go to the new generation at once.
    ///
    /// Values still on the generation retired by this call remain readable
    /// until the following rotation.
    pub fn rotate(&self) -> Result<u32, VaultError> {
        let _sweep = self
            .sweep
            .try_lock()
            .map_err(|_| VaultError::RotationInProgress)?;

        let version = self.keys.rotate()?;
        let target = self.bind(version)?;
        self.publish(target);

        #[cfg(feature = "metrics")]
        counter!(vault_metrics::ROTATIONS_TOTAL).increment(1);

        Ok(version)
    }

    /// Rotate the key, then re-encrypt every record onto the new generation.
    ///
    /// Per-record failures are captured in the report and never abort the
    /// sweep; there is no rollback. The active snapshot moves to the new
    /// generation once the sweep finishes or the future is dropped, and
    /// until then unswept records stay readable through the previous
    /// generation.
    pub async fn rotate_and_reencrypt<R, P>(
        &self,
        records: Vec<R>,
        persister: &P,
    ) -> Result<SweepReport<R::Id>, VaultError>
    where
        R: SensitiveRecord,
        P: RecordPersister<R> + ?Sized,
    {
        let _sweep = self
            .sweep
            .try_lock()
            .map_err(|_| VaultError::RotationInProgress)?;

        #[cfg(feature = "metrics")]
        let started = Instant::now();

        let audit = self.audit(&records);
        if !audit.safe_to_rotate() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                at_risk = audit.at_risk.len(),
                discarding_version = ?audit.previous_version,
                "rotation discards a generation that still protects records"
            );
        }

        let from_version = self.active_version();
        let to_version = self.keys.rotate()?;
        let target = self.bind(to_version)?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            from_version,
            to_version,
            records = records.len(),
            "re-encryption sweep started"
        );

        let pending = PendingPublish::new(self, target);
        let outcomes = self.reencrypt_all(records, &pending.key, persister).await;
        pending.complete();

        let report = SweepReport {
            target_version: to_version,
            rotated_from: Some(from_version),
            outcomes,
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            to_version,
            reencrypted = report.reencrypted(),
            skipped = report.skipped(),
            failed = report.failed(),
            "re-encryption sweep finished"
        );
        #[cfg(feature = "metrics")]
        {
            counter!(vault_metrics::ROTATIONS_TOTAL).increment(1);
            histogram!(vault_metrics::SWEEP_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
        }

        Ok(report)
    }

    /// Re-encrypt records that are not on the active generation, without
    /// rotating.
    ///
    /// Used to catch up records written while a rotation sweep was running.
    /// Records already on the active generation are skipped.
    pub async fn sweep<R, P>(
        &self,
        records: Vec<R>,
        persister: &P,
    ) -> Result<SweepReport<R::Id>, VaultError>
    where
        R: SensitiveRecord,
        P: RecordPersister<R> + ?Sized,
    {
        let _sweep = self
            .sweep
            .try_lock()
            .map_err(|_| VaultError::RotationInProgress)?;

        let target = self.snapshot();
        let outcomes = self.reencrypt_all(records, &target, persister).await;

        let report = SweepReport {
            target_version: target.version,
            rotated_from: None,
            outcomes,
        };

        #[cfg(feature = "tracing")]
        if report.reencrypted() > 0 || report.failed() > 0 {
            tracing::info!(
                version = report.target_version,
                reencrypted = report.reencrypted(),
                failed = report.failed(),
                "catch-up sweep finished"
            );
        }

        Ok(report)
    }

    /// Classify `records` against the generations currently retained.
    #[must_use]
    pub fn audit<R: SensitiveRecord>(&self, records: &[R]) -> GenerationAudit<R::Id> {
        let current_version = self.keys.current_version();
        let previous_version = self.keys.previous_version();

        let mut audit = GenerationAudit {
            current_version,
            previous_version,
            on_current: 0,
            at_risk: Vec::new(),
            unrecoverable: Vec::new(),
        };
        for record in records {
            let version = record.key_version();
            if version == current_version {
                audit.on_current += 1;
            } else if Some(version) == previous_version {
                audit.at_risk.push(record.record_id());
            } else {
                audit.unrecoverable.push(record.record_id());
            }
        }
        audit
    }

    async fn reencrypt_all<R, P>(
        &self,
        records: Vec<R>,
        target: &ActiveKey<C>,
        persister: &P,
    ) -> Vec<SweepOutcome<R::Id>>
    where
        R: SensitiveRecord,
        P: RecordPersister<R> + ?Sized,
    {
        let mut outcomes = Vec::with_capacity(records.len());
        for mut record in records {
            let record_id = record.record_id();
            let from_version = record.key_version();
            let result = self.reencrypt_one(&mut record, target, persister).await;

            #[cfg(feature = "tracing")]
            if let Err(ref e) = result {
                tracing::warn!(
                    record_id = %record_id,
                    from_version,
                    error = %e,
                    "record left on its previous key"
                );
            }
            #[cfg(feature = "metrics")]
            counter!(
                vault_metrics::SWEEP_RECORDS_TOTAL,
                labels::OUTCOME => match &result {
                    Ok(SweepAction::Reencrypted) => "reencrypted",
                    Ok(SweepAction::Skipped) => "skipped",
                    Err(e) => e.kind(),
                }
            )
            .increment(1);

            outcomes.push(SweepOutcome {
                record_id,
                from_version,
                result,
            });
        }
        outcomes
    }

    async fn reencrypt_one<R, P>(
        &self,
        record: &mut R,
        target: &ActiveKey<C>,
        persister: &P,
    ) -> Result<SweepAction, VaultError>
    where
        R: SensitiveRecord,
        P: RecordPersister<R> + ?Sized,
    {
        let from_version = record.key_version();
        if from_version == target.version {
            return Ok(SweepAction::Skipped);
        }

        let source = self.key_for(from_version)?;
        let resealed = record
            .sealed_fields()
            .into_iter()
            .map(|field| {
                let plaintext = source.cipher.decrypt(field)?;
                target.cipher.encrypt(&plaintext)
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Fields and tag change together, only after every field resealed.
        for (slot, value) in record.sealed_fields_mut().into_iter().zip(resealed) {
            *slot = value;
        }
        record.set_key_version(target.version);

        persister.persist(record, from_version).await?;
        Ok(SweepAction::Reencrypted)
    }

    /// Resolve a record's version tag to a bound cipher.
    ///
    /// The active snapshot is reused when it matches; otherwise a transient
    /// cipher is bound to whichever retained generation carries the tag.
    fn key_for(&self, version: u32) -> Result<Arc<ActiveKey<C>>, VaultError> {
        let active = self.snapshot();
        if active.version == version {
            return Ok(active);
        }
        self.bind(version).map(Arc::new)
    }

    fn bind(&self, version: u32) -> Result<ActiveKey<C>, VaultError> {
        let generation = self
            .keys
            .generation_for(version)
            .ok_or(VaultError::KeyUnavailable { version })?;
        Ok(ActiveKey::bind(self.backend.clone(), &generation))
    }

    fn snapshot(&self) -> Arc<ActiveKey<C>> {
        Arc::clone(&self.active.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, key: impl Into<Arc<ActiveKey<C>>>) {
        let key = key.into();
        let version = key.version;
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = key;

        #[cfg(feature = "tracing")]
        tracing::info!(version, "active key generation published");
        #[cfg(feature = "metrics")]
        gauge!(vault_metrics::KEY_VERSION).set(f64::from(version));
        #[cfg(not(any(feature = "tracing", feature = "metrics")))]
        let _ = version;
    }
}
