//! Question selection
//!
//! Picks the next question id from the bank. Questions never graded are
//! asked first, uniformly at random, so the whole bank gets covered before
//! any adaptive weighting starts. Once every candidate has a grade history,
//! a single weighted draw with weight max(1, (101 - avg)^2) steers sharply
//! toward the weakest questions while leaving every question a nonzero
//! chance. A bounded recency buffer damps immediate repetition.

use anyhow::{Result, bail};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::debug;

use crate::bank::QuestionBank;
use crate::store::scores::ScoreLedger;
use crate::store::session::RECENT_CAPACITY;

/// Select the next question id and record it in the recency buffer
pub fn select(bank: &QuestionBank, ledger: &ScoreLedger, recent: &mut Vec<usize>) -> Result<usize> {
    select_with_rng(bank, ledger, recent, &mut rand::rng())
}

/// Selection with an injectable RNG
pub fn select_with_rng<R: Rng + ?Sized>(
    bank: &QuestionBank,
    ledger: &ScoreLedger,
    recent: &mut Vec<usize>,
    rng: &mut R,
) -> Result<usize> {
    if bank.is_empty() {
        bail!("Question bank is empty");
    }

    let mut candidates: Vec<usize> = bank.ids().filter(|id| !recent.contains(id)).collect();

    // A bank smaller than the recency window would otherwise starve
    if candidates.is_empty() {
        recent.clear();
        candidates = bank.ids().collect();
    }

    let unanswered: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&id| !ledger.has_scores(id))
        .collect();

    let chosen = if !unanswered.is_empty() {
        let id = *unanswered
            .choose(rng)
            .expect("unanswered candidate set is non-empty");
        debug!(
            "Selected question {} (unanswered, {} remaining)",
            id,
            unanswered.len()
        );
        id
    } else {
        let weights: Vec<f64> = candidates.iter().map(|&id| weight(ledger.average(id))).collect();
        let dist = WeightedIndex::new(&weights)
            .expect("weights are positive and finite");
        let id = candidates[dist.sample(rng)];
        debug!(
            "Selected question {} (avg score {:.1}/100, prioritizing lowest)",
            id,
            ledger.average(id)
        );
        id
    };

    recent.push(chosen);
    if recent.len() > RECENT_CAPACITY {
        let excess = recent.len() - RECENT_CAPACITY;
        recent.drain(..excess);
    }

    Ok(chosen)
}

/// Squared inverse-score weight with a floor of 1
fn weight(average: f64) -> f64 {
    let w = (101.0 - average).powi(2);
    w.max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn bank_of(n: usize) -> QuestionBank {
        QuestionBank::from_pairs(
            (0..n).map(|i| (format!("Q{i}"), format!("A{i}"))).collect(),
        )
        .unwrap()
    }

    fn empty_ledger(dir: &tempfile::TempDir) -> ScoreLedger {
        ScoreLedger::load(&dir.path().join("scores.json"))
    }

    #[test]
    fn test_weight_floor_and_curve() {
        assert_eq!(weight(100.0), 1.0);
        assert_eq!(weight(101.0), 1.0);
        assert_eq!(weight(1.0), 10_000.0);
        assert_eq!(weight(51.0), 2_500.0);
    }

    #[test]
    fn test_empty_bank_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = empty_ledger(&dir);
        let bank = QuestionBank { questions: vec![] };
        let mut recent = Vec::new();
        assert!(select_with_rng(&bank, &ledger, &mut recent, &mut StdRng::seed_from_u64(1)).is_err());
    }

    #[test]
    fn test_unanswered_always_win() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = empty_ledger(&dir);
        let bank = bank_of(5);
        // Questions 0..3 graded badly; 3 and 4 never graded
        ledger.record(0, 10).unwrap();
        ledger.record(1, 10).unwrap();
        ledger.record(2, 10).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let mut recent = Vec::new();
            let id = select_with_rng(&bank, &ledger, &mut recent, &mut rng).unwrap();
            assert!(id == 3 || id == 4, "graded question chosen over unanswered");
        }
    }

    #[test]
    fn test_recency_buffer_caps_at_ten_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = empty_ledger(&dir);
        let bank = bank_of(30);

        let mut rng = StdRng::seed_from_u64(11);
        let mut recent = Vec::new();
        let mut all = Vec::new();
        for _ in 0..25 {
            let id = select_with_rng(&bank, &ledger, &mut recent, &mut rng).unwrap();
            all.push(id);
            assert!(recent.len() <= RECENT_CAPACITY);
        }
        // Buffer equals the last 10 selections in order
        assert_eq!(recent, all[all.len() - RECENT_CAPACITY..].to_vec());
    }

    #[test]
    fn test_small_bank_resets_instead_of_starving() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = empty_ledger(&dir);
        let bank = bank_of(3);

        let mut rng = StdRng::seed_from_u64(3);
        let mut recent = Vec::new();
        // First three picks cover the whole bank without repeats
        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            seen.insert(select_with_rng(&bank, &ledger, &mut recent, &mut rng).unwrap());
        }
        assert_eq!(seen.len(), 3);
        // The fourth pick still succeeds: the window resets rather than starving
        let fourth = select_with_rng(&bank, &ledger, &mut recent, &mut rng).unwrap();
        assert!(fourth < 3);
    }

    #[test]
    fn test_uniform_over_unanswered() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = empty_ledger(&dir);
        let bank = bank_of(4);

        let mut rng = StdRng::seed_from_u64(42);
        let mut counts = [0usize; 4];
        for _ in 0..4_000 {
            let mut recent = Vec::new();
            let id = select_with_rng(&bank, &ledger, &mut recent, &mut rng).unwrap();
            counts[id] += 1;
        }
        // Statistical, not exact: each should be near 1000
        for &c in &counts {
            assert!((700..1300).contains(&c), "counts not uniform: {counts:?}");
        }
    }

    #[test]
    fn test_weighted_draw_favors_low_averages() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = empty_ledger(&dir);
        let bank = bank_of(2);
        // avg 1 -> weight 10000, avg 91 -> weight 100; ~99% vs ~1%
        ledger.record(0, 1).unwrap();
        ledger.record(1, 91).unwrap();

        let mut rng = StdRng::seed_from_u64(99);
        let mut low_wins = 0usize;
        for _ in 0..2_000 {
            let mut recent = Vec::new();
            if select_with_rng(&bank, &ledger, &mut recent, &mut rng).unwrap() == 0 {
                low_wins += 1;
            }
        }
        let ratio = low_wins as f64 / 2_000.0;
        assert!(ratio > 0.95, "weak question picked only {:.1}% of draws", ratio * 100.0);
    }
}
