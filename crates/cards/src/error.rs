use {cardvault_vault::VaultError, thiserror::Error, uuid::Uuid};

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {}", .messages.join("; "))]
    Validation { messages: Vec<String> },

    #[error("card not found: {card_id}")]
    CardNotFound { card_id: Uuid },

    #[error("card {card_id} was modified concurrently")]
    Conflict { card_id: Uuid },

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A stored row that cannot be decoded. Retrying will not help.
    #[error("stored card is corrupt, decode {column}: {source}")]
    CorruptRow {
        column: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            messages: vec![message.into()],
        }
    }

    #[must_use]
    pub fn card_not_found(card_id: Uuid) -> Self {
        Self::CardNotFound { card_id }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn corrupt_row(
        column: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::CorruptRow {
            column: column.into(),
            source: Box::new(source),
        }
    }

    /// Whether the failure comes from the store and may clear on retry.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        match self {
            Self::Sqlx(_) | Self::Migrate(_) | Self::External { .. } => true,
            Self::Vault(e) => matches!(e, VaultError::Persistence { .. }),
            Self::Validation { .. }
            | Self::CardNotFound { .. }
            | Self::Conflict { .. }
            | Self::CorruptRow { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
