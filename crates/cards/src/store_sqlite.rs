//! SQLite-backed card store using sqlx.

use {
    async_trait::async_trait,
    cardvault_vault::EncryptedValue,
    chrono::{DateTime, Utc},
    sqlx::{Row, SqlitePool, sqlite::SqliteRow},
    uuid::Uuid,
};

use crate::{
    Error, Result,
    store::CardStore,
    types::{Card, CardBrand, CardRevision},
};

const COLUMNS: &str = "id, user_id, cardholder_name, card_number, expiry_month, expiry_year, \
                       cvv, card_type, is_active, key_version, created_at_ms, updated_at_ms";

/// SQLite-backed persistence for cards.
pub struct SqliteCardStore {
    pool: SqlitePool,
}

impl SqliteCardStore {
    /// Connect with a dedicated pool and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = crate::connect(database_url, 5).await?;
        crate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Use an existing pool. [`crate::run_migrations`] must have run on it.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(column: &str, ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        Error::corrupt_row(
            column,
            std::io::Error::other(format!("timestamp out of range: {ms}")),
        )
    })
}

fn parse_uuid(column: &str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::corrupt_row(column, e))
}

fn card_from_row(row: &SqliteRow) -> Result<Card> {
    let id: String = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    let card_type: String = row.try_get("card_type")?;
    let key_version: i64 = row.try_get("key_version")?;
    let expiry_month: i64 = row.try_get("expiry_month")?;
    Ok(Card {
        id: parse_uuid("id", &id)?,
        user_id: parse_uuid("user_id", &user_id)?,
        cardholder_name: row.try_get("cardholder_name")?,
        card_number: EncryptedValue::new(row.try_get::<String, _>("card_number")?),
        expiry_month: u8::try_from(expiry_month)
            .map_err(|e| Error::corrupt_row("expiry_month", e))?,
        expiry_year: row.try_get("expiry_year")?,
        cvv: EncryptedValue::new(row.try_get::<String, _>("cvv")?),
        card_type: card_type.parse().unwrap_or(CardBrand::Unknown),
        is_active: row.try_get("is_active")?,
        key_version: u32::try_from(key_version)
            .map_err(|e| Error::corrupt_row("key_version", e))?,
        created_at: from_millis("created_at_ms", row.try_get("created_at_ms")?)?,
        updated_at: from_millis("updated_at_ms", row.try_get("updated_at_ms")?)?,
    })
}

#[async_trait]
impl CardStore for SqliteCardStore {
    async fn create(&self, card: &Card) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO cards ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(card.id.to_string())
        .bind(card.user_id.to_string())
        .bind(&card.cardholder_name)
        .bind(card.card_number.as_str())
        .bind(i64::from(card.expiry_month))
        .bind(card.expiry_year)
        .bind(card.cvv.as_str())
        .bind(card.card_type.as_str())
        .bind(card.is_active)
        .bind(i64::from(card.key_version))
        .bind(millis(card.created_at))
        .bind(millis(card.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, user_id: Uuid, card_id: Uuid) -> Result<Card> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM cards WHERE id = ? AND user_id = ?"
        ))
        .bind(card_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::card_not_found(card_id))?;
        card_from_row(&row)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Card>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM cards WHERE user_id = ? ORDER BY created_at_ms, id"
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(card_from_row).collect()
    }

    async fn list_all(&self) -> Result<Vec<Card>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM cards ORDER BY created_at_ms, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(card_from_row).collect()
    }

    async fn update(&self, card: &Card, expected: CardRevision) -> Result<()> {
        let result = sqlx::query(
            "UPDATE cards
             SET cardholder_name = ?, card_number = ?, expiry_month = ?, expiry_year = ?,
                 cvv = ?, card_type = ?, is_active = ?, key_version = ?, updated_at_ms = ?
             WHERE id = ? AND user_id = ? AND key_version = ? AND updated_at_ms = ?",
        )
        .bind(&card.cardholder_name)
        .bind(card.card_number.as_str())
        .bind(i64::from(card.expiry_month))
        .bind(card.expiry_year)
        .bind(card.cvv.as_str())
        .bind(card.card_type.as_str())
        .bind(card.is_active)
        .bind(i64::from(card.key_version))
        .bind(millis(card.updated_at))
        .bind(card.id.to_string())
        .bind(card.user_id.to_string())
        .bind(i64::from(expected.key_version))
        .bind(millis(expected.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists = sqlx::query("SELECT 1 FROM cards WHERE id = ? AND user_id = ?")
            .bind(card.id.to_string())
            .bind(card.user_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if exists {
            Err(Error::Conflict { card_id: card.id })
        } else {
            Err(Error::card_not_found(card.id))
        }
    }

    async fn delete(&self, user_id: Uuid, card_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM cards WHERE id = ? AND user_id = ?")
            .bind(card_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::card_not_found(card_id));
        }
        Ok(())
    }
}
