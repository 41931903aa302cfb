//! Payment cards stored with vault-sealed number and CVV.
//!
//! Validation helpers, the card model, storage backends (SQLite and
//! in-memory) and the [`service::CardService`] that ties them to the vault.

pub mod error;
pub mod service;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;
pub mod validate;

pub use {
    error::{Error, Result},
    service::{CardPolicy, CardService},
    store::CardStore,
    store_memory::InMemoryCardStore,
    store_sqlite::SqliteCardStore,
};

/// Open a SQLite pool.
///
/// In-memory databases are per connection, so those get a single one.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<sqlx::SqlitePool> {
    let max_connections = if database_url.contains(":memory:") {
        1
    } else {
        max_connections.max(1)
    };
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations for the cards crate.
///
/// Creates the `cards` table. Call at startup before using
/// [`SqliteCardStore::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
