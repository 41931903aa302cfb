//! In-memory card store for tests.

use std::{collections::HashMap, sync::Mutex};

use {async_trait::async_trait, uuid::Uuid};

use crate::{
    Error, Result,
    store::CardStore,
    types::{Card, CardRevision},
};

/// In-memory store backed by `HashMap`. Nothing survives the process.
#[derive(Default)]
pub struct InMemoryCardStore {
    cards: Mutex<HashMap<Uuid, Card>>,
}

impl InMemoryCardStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn by_creation(cards: &mut [Card]) {
    cards.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl CardStore for InMemoryCardStore {
    async fn create(&self, card: &Card) -> Result<()> {
        let mut cards = self.cards.lock().unwrap_or_else(|e| e.into_inner());
        cards.insert(card.id, card.clone());
        Ok(())
    }

    async fn get(&self, user_id: Uuid, card_id: Uuid) -> Result<Card> {
        let cards = self.cards.lock().unwrap_or_else(|e| e.into_inner());
        cards
            .get(&card_id)
            .filter(|c| c.user_id == user_id)
            .cloned()
            .ok_or_else(|| Error::card_not_found(card_id))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Card>> {
        let cards = self.cards.lock().unwrap_or_else(|e| e.into_inner());
        let mut owned: Vec<Card> = cards
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        by_creation(&mut owned);
        Ok(owned)
    }

    async fn list_all(&self) -> Result<Vec<Card>> {
        let cards = self.cards.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Card> = cards.values().cloned().collect();
        by_creation(&mut all);
        Ok(all)
    }

    async fn update(&self, card: &Card, expected: CardRevision) -> Result<()> {
        let mut cards = self.cards.lock().unwrap_or_else(|e| e.into_inner());
        let stored = cards
            .get_mut(&card.id)
            .filter(|c| c.user_id == card.user_id)
            .ok_or_else(|| Error::card_not_found(card.id))?;
        if stored.revision() != expected {
            return Err(Error::Conflict { card_id: card.id });
        }
        *stored = card.clone();
        Ok(())
    }

    async fn delete(&self, user_id: Uuid, card_id: Uuid) -> Result<()> {
        let mut cards = self.cards.lock().unwrap_or_else(|e| e.into_inner());
        match cards.get(&card_id) {
            Some(c) if c.user_id == user_id => {
                cards.remove(&card_id);
                Ok(())
            },
            _ => Err(Error::card_not_found(card_id)),
        }
    }
}
