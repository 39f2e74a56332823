pub mod models;
pub mod store;

pub use store::{ListingStore, StateChange};

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use crate::error::Result;

/// Open (creating if needed) the SQLite database and apply migrations.
pub async fn connect(db_path: &str) -> Result<sqlx::SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {db_path}");
    Ok(pool)
}

/// In-memory database with the schema applied. One connection, so every
/// query sees the same memory database.
#[cfg(test)]
pub(crate) async fn test_pool() -> sqlx::SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[cfg(test)]
#[allow(clippy::too_many_arguments)]
pub(crate) async fn seed_mod(
    pool: &sqlx::SqlitePool,
    id: &str,
    game: &str,
    text: &str,
    tier_label: &str,
    min_value: f64,
    max_value: f64,
    stat_count: i64,
) {
    sqlx::query(
        "INSERT INTO mod_reference (id, game, text, tier_label, min_value, max_value, stat_count) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(game)
    .bind(text)
    .bind(tier_label)
    .bind(min_value)
    .bind(max_value)
    .bind(stat_count)
    .execute(pool)
    .await
    .unwrap();
}

#[cfg(test)]
pub(crate) fn test_record(id: &str, chaos: f64) -> crate::types::ListingRecord {
    use crate::types::{AffixObservation, Game, ItemFlags, ListingRecord};

    ListingRecord {
        listing_id: id.to_string(),
        league: "Standard".to_string(),
        game: Game::Poe1,
        base_type: "Hubris Circlet".to_string(),
        item_class: Some("armour".to_string()),
        item_level: Some(86),
        influences: vec!["shaper".to_string()],
        flags: ItemFlags { corrupted: true, ..ItemFlags::default() },
        affixes: vec![AffixObservation {
            mod_id: "life_t1".to_string(),
            tier: Some(1),
            roll_position: 0.5,
            value: 75.0,
        }],
        price_chaos: chaos,
        price_amount: chaos,
        price_currency: "chaos".to_string(),
        seller_account: Some("seller_one".to_string()),
        listed_at: None,
    }
}
