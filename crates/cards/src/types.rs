//! Card model and API payloads.

use std::{fmt, str::FromStr};

use {
    cardvault_vault::{EncryptedValue, SensitiveRecord},
    chrono::{DateTime, SubsecRound, Utc},
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CardBrand {
    Visa,
    Mastercard,
    Amex,
    Discover,
    Unknown,
}

impl CardBrand {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Visa => "Visa",
            Self::Mastercard => "Mastercard",
            Self::Amex => "Amex",
            Self::Discover => "Discover",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for CardBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardBrand {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Visa" => Self::Visa,
            "Mastercard" => Self::Mastercard,
            "Amex" => Self::Amex,
            "Discover" => Self::Discover,
            _ => Self::Unknown,
        })
    }
}

/// Optimistic-concurrency token: a stored card is only overwritten if it
/// still carries the revision the writer loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardRevision {
    pub key_version: u32,
    pub updated_at: DateTime<Utc>,
}

/// A stored card. The number and CVV are sealed by the vault under
/// `key_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cardholder_name: String,
    pub card_number: EncryptedValue,
    pub expiry_month: u8,
    pub expiry_year: i32,
    pub cvv: EncryptedValue,
    pub card_type: CardBrand,
    pub is_active: bool,
    pub key_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    #[must_use]
    pub fn revision(&self) -> CardRevision {
        CardRevision {
            key_version: self.key_version,
            updated_at: self.updated_at,
        }
    }

    /// Advance `updated_at`, strictly past its previous value.
    pub fn touch(&mut self) {
        let now = now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::milliseconds(1)
        };
    }
}

impl SensitiveRecord for Card {
    type Id = Uuid;

    fn record_id(&self) -> Uuid {
        self.id
    }

    fn key_version(&self) -> u32 {
        self.key_version
    }

    fn sealed_fields(&self) -> Vec<&EncryptedValue> {
        vec![&self.card_number, &self.cvv]
    }

    fn sealed_fields_mut(&mut self) -> Vec<&mut EncryptedValue> {
        vec![&mut self.card_number, &mut self.cvv]
    }

    fn set_key_version(&mut self, version: u32) {
        self.key_version = version;
    }
}

/// Current time at the millisecond precision the store keeps.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

#[derive(Clone, Deserialize)]
pub struct CardRequest {
    pub cardholder_name: String,
    pub card_number: String,
    pub expiry_month: u8,
    pub expiry_year: i32,
    pub cvv: String,
}

impl fmt::Debug for CardRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardRequest")
            .field("cardholder_name", &self.cardholder_name)
            .field("expiry_month", &self.expiry_month)
            .field("expiry_year", &self.expiry_year)
            .finish_non_exhaustive()
    }
}

/// What callers see of a card: masked number, never the CVV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cardholder_name: String,
    pub masked_number: String,
    pub expiry_month: u8,
    pub expiry_year: i32,
    pub card_type: CardBrand,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CardResponse {
    #[must_use]
    pub fn new(card: &Card, masked_number: String) -> Self {
        Self {
            id: card.id,
            user_id: card.user_id,
            cardholder_name: card.cardholder_name.clone(),
            masked_number,
            expiry_month: card.expiry_month,
            expiry_year: card.expiry_year,
            card_type: card.card_type,
            is_active: card.is_active,
            created_at: card.created_at,
            updated_at: card.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchUpdateRequest {
    pub cards: Vec<BatchCardUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchCardUpdate {
    pub id: Uuid,
    #[serde(default)]
    pub cardholder_name: Option<String>,
    #[serde(default)]
    pub expiry_month: Option<u8>,
    #[serde(default)]
    pub expiry_year: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Success,
    Failed,
    Skipped,
}

/// Per-item outcome of a batch update or key rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUpdateResponse {
    pub card_id: Uuid,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchUpdateResponse {
    #[must_use]
    pub fn success(card_id: Uuid) -> Self {
        Self {
            card_id,
            status: ItemStatus::Success,
            error: None,
        }
    }

    #[must_use]
    pub fn skipped(card_id: Uuid) -> Self {
        Self {
            card_id,
            status: ItemStatus::Skipped,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(card_id: Uuid, error: impl fmt::Display) -> Self {
        Self {
            card_id,
            status: ItemStatus::Failed,
            error: Some(error.to_string()),
        }
    }
}

/// Result of an administrative key rotation.
#[derive(Debug, Clone, Serialize)]
pub struct RotationResponse {
    pub from_version: u32,
    pub to_version: u32,
    pub reencrypted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub results: Vec<BatchUpdateResponse>,
}

/// Admin view of the key generations and how the stored cards spread over
/// them.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStatusResponse {
    #[serde(flatten)]
    pub keys: cardvault_vault::KeyStatus,
    pub cards_total: usize,
    pub cards_on_current: usize,
    /// Lost on the next rotation unless swept first.
    pub cards_at_risk: usize,
    pub cards_unrecoverable: usize,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brand_round_trips_through_text() {
        for brand in [
            CardBrand::Visa,
            CardBrand::Mastercard,
            CardBrand::Amex,
            CardBrand::Discover,
            CardBrand::Unknown,
        ] {
            assert_eq!(brand.as_str().parse::<CardBrand>().unwrap(), brand);
        }
        assert_eq!("JCB".parse::<CardBrand>().unwrap(), CardBrand::Unknown);
    }

    #[test]
    fn request_debug_hides_number_and_cvv() {
        let req = CardRequest {
            cardholder_name: "Ada".into(),
            card_number: "4111111111111111".into(),
            expiry_month: 1,
            expiry_year: 2030,
            cvv: "987".into(),
        };
        let debug = format!("{req:?}");
        assert!(!debug.contains("4111"));
        assert!(!debug.contains("987"));
    }

    #[test]
    fn batch_response_omits_empty_error() {
        let ok = serde_json::to_value(BatchUpdateResponse::success(Uuid::nil())).unwrap();
        assert_eq!(ok["status"], "success");
        assert!(ok.get("error").is_none());

        let failed =
            serde_json::to_value(BatchUpdateResponse::failed(Uuid::nil(), "card not found"))
                .unwrap();
        assert_eq!(failed["status"], "failed");
        assert_eq!(failed["error"], "card not found");
    }

    #[test]
    fn batch_item_fields_are_optional() {
        let item: BatchCardUpdate = serde_json::from_str(
            r#"{"id":"00000000-0000-0000-0000-000000000000","expiry_month":3}"#,
        )
        .unwrap();
        assert_eq!(item.expiry_month, Some(3));
        assert!(item.cardholder_name.is_none());
    }

    #[test]
    fn touch_always_advances() {
        let mut card = Card {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            cardholder_name: "Ada".into(),
            card_number: EncryptedValue::new("n"),
            expiry_month: 1,
            expiry_year: 2030,
            cvv: EncryptedValue::new("c"),
            card_type: CardBrand::Visa,
            is_active: true,
            key_version: 1,
            created_at: now(),
            updated_at: now() + chrono::Duration::seconds(60),
        };
        let before = card.updated_at;
        card.touch();
        assert!(card.updated_at > before);
    }
}
