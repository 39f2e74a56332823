use async_trait::async_trait;

use crate::error::Result;
use crate::types::Game;

/// One reference-table row that matched a line pattern.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ModCandidate {
    pub id: String,
    /// Textual tier such as "T1" or "P2". The first number in it is the tier.
    pub tier_label: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    /// Number of stats the modifier grants. Above 1 means hybrid.
    pub stat_count: i64,
}

impl ModCandidate {
    pub fn tier(&self) -> Option<u32> {
        let label = self.tier_label.as_deref()?;
        let digits: String = label
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }

    pub fn is_hybrid(&self) -> bool {
        self.stat_count > 1
    }

    /// Normalized (low, high) range, if both bounds are known.
    pub fn range(&self) -> Option<(f64, f64)> {
        match (self.min_value, self.max_value) {
            (Some(a), Some(b)) if a <= b => Some((a, b)),
            (Some(a), Some(b)) => Some((b, a)),
            _ => None,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.range().is_some_and(|(lo, hi)| lo <= value && value <= hi)
    }
}

/// Fuzzy lookup over the reference modifier table.
#[async_trait]
pub trait ModifierTable: Send + Sync {
    /// `pattern` is a SQL LIKE pattern using `\` as the escape character.
    async fn candidates(&self, pattern: &str) -> Result<Vec<ModCandidate>>;
}

pub struct SqliteModifierTable {
    pool: sqlx::SqlitePool,
    game: Game,
}

impl SqliteModifierTable {
    pub fn new(pool: sqlx::SqlitePool, game: Game) -> Self {
        Self { pool, game }
    }
}

#[async_trait]
impl ModifierTable for SqliteModifierTable {
    async fn candidates(&self, pattern: &str) -> Result<Vec<ModCandidate>> {
        let rows = sqlx::query_as::<_, ModCandidate>(
            r#"
            SELECT id, tier_label, min_value, max_value, stat_count
            FROM mod_reference
            WHERE game = ? AND text LIKE ? ESCAPE '\'
            ORDER BY id
            "#,
        )
        .bind(self.game.as_str())
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(tier_label: Option<&str>, min: Option<f64>, max: Option<f64>) -> ModCandidate {
        ModCandidate {
            id: "m".to_string(),
            tier_label: tier_label.map(str::to_string),
            min_value: min,
            max_value: max,
            stat_count: 1,
        }
    }

    #[test]
    fn tier_reads_first_number_of_label() {
        assert_eq!(candidate(Some("T1"), None, None).tier(), Some(1));
        assert_eq!(candidate(Some("Tier 12"), None, None).tier(), Some(12));
        assert_eq!(candidate(Some("S3"), None, None).tier(), Some(3));
        assert_eq!(candidate(Some("unique"), None, None).tier(), None);
        assert_eq!(candidate(None, None, None).tier(), None);
    }

    #[test]
    fn reversed_range_is_normalized() {
        let c = candidate(None, Some(-5.0), Some(-10.0));
        assert_eq!(c.range(), Some((-10.0, -5.0)));
        assert!(c.contains(-7.0));
        assert!(!candidate(None, None, Some(3.0)).contains(3.0));
    }

    #[tokio::test]
    async fn sqlite_table_matches_like_pattern_for_game() {
        let pool = crate::db::test_pool().await;
        crate::db::seed_mod(&pool, "life_t1", "poe1", "+(70-79) to maximum Life", "T1", 70.0, 79.0, 1).await;
        crate::db::seed_mod(&pool, "life_poe2", "poe2", "+(70-79) to maximum Life", "T1", 70.0, 79.0, 1).await;
        crate::db::seed_mod(&pool, "mana_t1", "poe1", "+(70-79) to maximum Mana", "T1", 70.0, 79.0, 1).await;

        let table = SqliteModifierTable::new(pool, Game::Poe1);
        let found = table.candidates("+% to maximum Life").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "life_t1");
    }
}
