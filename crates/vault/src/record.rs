//! Seams between the vault and the records it protects.

use std::fmt;

use async_trait::async_trait;

use crate::{cipher::EncryptedValue, error::VaultError};

/// A stored record owning one or more encrypted fields and the version of
/// the key generation that sealed them.
///
/// [`sealed_fields`](Self::sealed_fields) and
/// [`sealed_fields_mut`](Self::sealed_fields_mut) must yield the same
/// fields in the same order.
pub trait SensitiveRecord: Send + Sync {
    type Id: Clone + fmt::Display + Send + Sync;

    fn record_id(&self) -> Self::Id;

    fn key_version(&self) -> u32;

    fn sealed_fields(&self) -> Vec<&EncryptedValue>;

    fn sealed_fields_mut(&mut self) -> Vec<&mut EncryptedValue>;

    fn set_key_version(&mut self, version: u32);
}

/// Writes a resealed record back to storage.
///
/// `previous_version` is the key version the record carried when it was
/// loaded; stores may use it to reject writes that race a concurrent
/// update of the same record.
#[async_trait]
pub trait RecordPersister<R: SensitiveRecord>: Send + Sync {
    async fn persist(&self, record: &R, previous_version: u32) -> Result<(), VaultError>;
}

/// What a sweep did with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    /// Fields were resealed under the target generation and persisted.
    Reencrypted,
    /// The record was already on the target generation.
    Skipped,
}

/// Per-record result of a sweep.
#[derive(Debug)]
pub struct SweepOutcome<Id> {
    pub record_id: Id,
    /// Key version the record carried before the sweep touched it.
    pub from_version: u32,
    pub result: Result<SweepAction, VaultError>,
}

impl<Id> SweepOutcome<Id> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Result of a rotation sweep or a catch-up sweep.
#[derive(Debug)]
pub struct SweepReport<Id> {
    /// Generation every successful record now carries.
    pub target_version: u32,
    /// Generation that was current before rotating, if this sweep rotated.
    pub rotated_from: Option<u32>,
    pub outcomes: Vec<SweepOutcome<Id>>,
}

impl<Id> SweepReport<Id> {
    #[must_use]
    pub fn reencrypted(&self) -> usize {
        self.count(|r| matches!(r, Ok(SweepAction::Reencrypted)))
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|r| matches!(r, Ok(SweepAction::Skipped)))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(Result::is_err)
    }

    /// True when every record ended on the target generation.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &SweepOutcome<Id>> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    fn count(&self, pred: impl Fn(&Result<SweepAction, VaultError>) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.result)).count()
    }
}

/// Classification of a record set against the retained key generations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationAudit<Id> {
    pub current_version: u32,
    pub previous_version: Option<u32>,
    /// Records on the current generation.
    pub on_current: usize,
    /// Records on the previous generation. The next rotation discards that
    /// generation, so these must be swept first.
    pub at_risk: Vec<Id>,
    /// Records tagged with a generation the vault no longer holds.
    pub unrecoverable: Vec<Id>,
}

impl<Id> GenerationAudit<Id> {
    #[must_use]
    pub fn total(&self) -> usize {
        self.on_current + self.at_risk.len() + self.unrecoverable.len()
    }

    /// Whether rotating now would strand any record.
    #[must_use]
    pub fn safe_to_rotate(&self) -> bool {
        self.at_risk.is_empty()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: u32, result: Result<SweepAction, VaultError>) -> SweepOutcome<u32> {
        SweepOutcome {
            record_id: id,
            from_version: 1,
            result,
        }
    }

    #[test]
    fn report_counts() {
        let report = SweepReport {
            target_version: 2,
            rotated_from: Some(1),
            outcomes: vec![
                outcome(1, Ok(SweepAction::Reencrypted)),
                outcome(2, Ok(SweepAction::Skipped)),
                outcome(3, Err(VaultError::AuthenticationFailure)),
                outcome(4, Ok(SweepAction::Reencrypted)),
            ],
        };
        assert_eq!(report.reencrypted(), 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_complete());
        assert_eq!(
            report.failures().map(|o| o.record_id).collect::<Vec<_>>(),
            vec![3]
        );
    }

    #[test]
    fn empty_report_is_complete() {
        let report: SweepReport<u32> = SweepReport {
            target_version: 5,
            rotated_from: None,
            outcomes: Vec::new(),
        };
        assert!(report.is_complete());
    }

    #[test]
    fn audit_safety() {
        let audit = GenerationAudit {
            current_version: 3,
            previous_version: Some(2),
            on_current: 4,
            at_risk: vec!["a"],
            unrecoverable: vec!["b", "c"],
        };
        assert_eq!(audit.total(), 7);
        assert!(!audit.safe_to_rotate());
    }
}
