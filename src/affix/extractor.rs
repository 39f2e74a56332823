use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;

use crate::affix::table::{ModCandidate, ModifierTable};
use crate::error::Result;
use crate::types::AffixObservation;

/// Parenthetical hints such as "(70-79)" or "(crafted)" appended to mod lines.
static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("valid regex"));
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid regex"));

/// A modifier line reduced to its lookup pattern and rolled value.
#[derive(Debug, Clone, PartialEq)]
pub struct LinePattern {
    /// SQL LIKE pattern; numbers became `%`, literal `%`/`_`/`\` are escaped.
    pub pattern: String,
    /// First numeric token of the line.
    pub value: f64,
}

/// Build the lookup pattern for one line. None when the line carries no number.
pub fn line_pattern(line: &str) -> Option<LinePattern> {
    let stripped = PARENTHETICAL.replace_all(line, "");
    let stripped = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    let first = NUMBER.find(&stripped)?;
    let value = first.as_str().parse::<f64>().ok()?;

    let mut pattern = String::with_capacity(stripped.len());
    let mut last = 0;
    for m in NUMBER.find_iter(&stripped) {
        push_escaped(&mut pattern, &stripped[last..m.start()]);
        pattern.push('%');
        last = m.end();
    }
    push_escaped(&mut pattern, &stripped[last..]);

    Some(LinePattern { pattern, value })
}

fn push_escaped(out: &mut String, literal: &str) {
    for c in literal.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Pick the best candidate for a rolled value.
///
/// Hybrid modifiers are never chosen. Among candidates whose range holds the
/// value the lowest tier wins; if none holds it, the lowest tier overall.
pub fn select_candidate(candidates: &[ModCandidate], value: f64) -> Option<&ModCandidate> {
    let tier_key = |c: &&ModCandidate| c.tier().unwrap_or(u32::MAX);
    let single: Vec<&ModCandidate> = candidates.iter().filter(|c| !c.is_hybrid()).collect();

    single
        .iter()
        .copied()
        .filter(|c| c.contains(value))
        .min_by_key(tier_key)
        .or_else(|| single.iter().copied().min_by_key(tier_key))
}

/// Fraction of the way `value` sits between the candidate's bounds, clamped to [0, 1].
/// A degenerate or unknown range yields 1.0.
pub fn roll_position(candidate: &ModCandidate, value: f64) -> f64 {
    match candidate.range() {
        Some((lo, hi)) if hi > lo => ((value - lo) / (hi - lo)).clamp(0.0, 1.0),
        _ => 1.0,
    }
}

pub struct AffixExtractor {
    table: Arc<dyn ModifierTable>,
}

impl AffixExtractor {
    pub fn new(table: Arc<dyn ModifierTable>) -> Self {
        Self { table }
    }

    /// Match every modifier line of an item. Unmatched lines are skipped.
    pub async fn extract(&self, lines: &[String]) -> Result<Vec<AffixObservation>> {
        let mut out = Vec::new();
        for line in lines {
            if let Some(obs) = self.extract_line(line).await? {
                out.push(obs);
            }
        }
        Ok(out)
    }

    pub async fn extract_line(&self, line: &str) -> Result<Option<AffixObservation>> {
        let Some(LinePattern { pattern, value }) = line_pattern(line) else {
            return Ok(None);
        };

        let candidates = self.table.candidates(&pattern).await?;
        let Some(chosen) = select_candidate(&candidates, value) else {
            debug!(line, pattern = %pattern, "No reference modifier for line");
            return Ok(None);
        };

        Ok(Some(AffixObservation {
            mod_id: chosen.id.clone(),
            tier: chosen.tier(),
            roll_position: roll_position(chosen, value),
            value,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affix::table::SqliteModifierTable;
    use crate::types::Game;

    fn cand(id: &str, tier: &str, min: f64, max: f64, stat_count: i64) -> ModCandidate {
        ModCandidate {
            id: id.to_string(),
            tier_label: Some(tier.to_string()),
            min_value: Some(min),
            max_value: Some(max),
            stat_count,
        }
    }

    #[test]
    fn pattern_replaces_numbers_and_strips_hints() {
        let p = line_pattern("+75(70-79) to maximum Life").unwrap();
        assert_eq!(p.pattern, "+% to maximum Life");
        assert!((p.value - 75.0).abs() < 1e-9);

        let p = line_pattern("Adds 3 to 7.5 Physical Damage (crafted)").unwrap();
        assert_eq!(p.pattern, "Adds % to % Physical Damage");
        assert!((p.value - 3.0).abs() < 1e-9);
    }

    #[test]
    fn pattern_escapes_like_metacharacters() {
        let p = line_pattern("12% increased Attack_Speed").unwrap();
        assert_eq!(p.pattern, "%\\% increased Attack\\_Speed");
    }

    #[test]
    fn line_without_number_has_no_pattern() {
        assert!(line_pattern("Cannot be Frozen").is_none());
        assert!(line_pattern("Grants (12) charges").is_none());
    }

    #[test]
    fn selects_lowest_tier_containing_value() {
        let cands = vec![cand("t2", "T2", 60.0, 69.0, 1), cand("t1", "T1", 70.0, 79.0, 1)];
        assert_eq!(select_candidate(&cands, 75.0).unwrap().id, "t1");
        assert_eq!(select_candidate(&cands, 65.0).unwrap().id, "t2");
    }

    #[test]
    fn overlapping_ranges_tie_break_on_tier() {
        let cands = vec![cand("t3", "T3", 50.0, 80.0, 1), cand("t2", "T2", 60.0, 80.0, 1)];
        assert_eq!(select_candidate(&cands, 70.0).unwrap().id, "t2");
    }

    #[test]
    fn falls_back_to_lowest_tier_when_out_of_range() {
        let cands = vec![cand("t2", "T2", 60.0, 69.0, 1), cand("t1", "T1", 70.0, 79.0, 1)];
        assert_eq!(select_candidate(&cands, 99.0).unwrap().id, "t1");
    }

    #[test]
    fn hybrid_candidates_are_never_selected() {
        let cands = vec![cand("hybrid", "T1", 70.0, 79.0, 2)];
        assert!(select_candidate(&cands, 75.0).is_none());

        let cands = vec![cand("hybrid", "T1", 70.0, 79.0, 2), cand("t4", "T4", 10.0, 19.0, 1)];
        assert_eq!(select_candidate(&cands, 75.0).unwrap().id, "t4");
    }

    #[test]
    fn roll_position_is_clamped() {
        let c = cand("t1", "T1", 70.0, 79.0, 1);
        assert!((roll_position(&c, 75.0) - 5.0 / 9.0).abs() < 1e-9);
        assert_eq!(roll_position(&c, 120.0), 1.0);
        assert_eq!(roll_position(&c, 10.0), 0.0);
        assert_eq!(roll_position(&cand("fixed", "T1", 20.0, 20.0, 1), 20.0), 1.0);
        for v in [-100.0, 0.0, 69.9, 70.0, 79.0, 79.1, 1e9] {
            let r = roll_position(&c, v);
            assert!((0.0..=1.0).contains(&r), "{v} -> {r}");
        }
    }

    #[tokio::test]
    async fn maximum_life_line_resolves_to_top_tier() {
        let pool = crate::db::test_pool().await;
        crate::db::seed_mod(&pool, "life_t1", "poe1", "+(70-79) to maximum Life", "T1", 70.0, 79.0, 1).await;
        crate::db::seed_mod(&pool, "life_t2", "poe1", "+(60-69) to maximum Life", "T2", 60.0, 69.0, 1).await;
        crate::db::seed_mod(
            &pool,
            "life_armour_hybrid",
            "poe1",
            "+(70-79) to maximum Life",
            "T1",
            70.0,
            79.0,
            2,
        )
        .await;

        let extractor = AffixExtractor::new(Arc::new(SqliteModifierTable::new(pool, Game::Poe1)));
        let lines = vec![
            "+75 to maximum Life".to_string(),
            "Cannot be Frozen".to_string(),
            "+30% to Fire Resistance".to_string(),
        ];
        let affixes = extractor.extract(&lines).await.unwrap();

        assert_eq!(affixes.len(), 1);
        let life = &affixes[0];
        assert_eq!(life.mod_id, "life_t1");
        assert_eq!(life.tier, Some(1));
        assert!((life.value - 75.0).abs() < 1e-9);
        assert!((life.roll_position - 0.5556).abs() < 1e-3);
    }
}
