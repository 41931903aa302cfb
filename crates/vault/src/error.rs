//! Vault error types.

/// Errors produced by vault operations.
///
/// Authentication failures deliberately carry no detail: a wrong key, a
/// corrupted blob and a tampered blob all look the same to the caller.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The stored value is structurally invalid (bad base64, too short).
    #[error("malformed ciphertext: {reason}")]
    MalformedCiphertext { reason: &'static str },

    /// The AEAD tag did not verify.
    #[error("ciphertext failed authentication")]
    AuthenticationFailure,

    /// Neither the current nor the previous key generation matches.
    #[error("no key available for version {version}")]
    KeyUnavailable { version: u32 },

    /// The operating system random source could not be read.
    #[error("secure random source unavailable: {0}")]
    RandomSource(String),

    /// Another rotation sweep holds the vault.
    #[error("a key rotation is already in progress")]
    RotationInProgress,

    /// The persistence collaborator rejected an updated record.
    #[error("{context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl VaultError {
    #[must_use]
    pub fn persistence(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Persistence {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether retrying the same operation can never succeed.
    ///
    /// Persistence failures and a busy rotation are transient; every
    /// cryptographic failure is a property of the stored data or the key ring.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::Persistence { .. } | Self::RotationInProgress)
    }

    /// Short stable label used for metrics and API error codes.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedCiphertext { .. } => "malformed_ciphertext",
            Self::AuthenticationFailure => "authentication_failure",
            Self::KeyUnavailable { .. } => "key_unavailable",
            Self::RandomSource(_) => "random_source",
            Self::RotationInProgress => "rotation_in_progress",
            Self::Persistence { .. } => "persistence",
        }
    }
}
