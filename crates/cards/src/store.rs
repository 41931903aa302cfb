//! Persistence trait for cards.

use {async_trait::async_trait, uuid::Uuid};

use crate::{
    Result,
    types::{Card, CardRevision},
};

/// Persistence backend for cards.
///
/// Reads and deletes that take a `user_id` only see that user's cards; a
/// card owned by someone else is reported as not found.
#[async_trait]
pub trait CardStore: Send + Sync {
    async fn create(&self, card: &Card) -> Result<()>;
    async fn get(&self, user_id: Uuid, card_id: Uuid) -> Result<Card>;
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Card>>;
    /// Every stored card, for rotation sweeps and audits.
    async fn list_all(&self) -> Result<Vec<Card>>;
    /// Overwrite a card if it still carries `expected`.
    ///
    /// Fails with [`crate::Error::Conflict`] when another writer got there
    /// first and [`crate::Error::CardNotFound`] when the card is gone.
    async fn update(&self, card: &Card, expected: CardRevision) -> Result<()>;
    async fn delete(&self, user_id: Uuid, card_id: Uuid) -> Result<()>;
}
