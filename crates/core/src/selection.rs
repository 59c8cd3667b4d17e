use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::PreconditionViolation;
use crate::model::{CharacterId, MAX_PROFICIENCY, ProgressRecord};
use crate::settings::SelectionWeights;

/// Effective weight of one candidate for a single draw.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateWeight<'a> {
    pub character_id: &'a CharacterId,
    pub weight: f64,
}

/// Weighted-random picker for the next character to practice.
///
/// New, due, low-proficiency and recently missed characters weigh more.
/// Picks are independent draws: a dominant character can come up several
/// times in a row. Callers that want to avoid immediate repeats filter the
/// candidate list themselves.
#[derive(Debug, Clone, Default)]
pub struct SelectionEngine {
    weights: SelectionWeights,
}

impl SelectionEngine {
    #[must_use]
    pub fn new(weights: SelectionWeights) -> Self {
        Self { weights }
    }

    #[must_use]
    pub fn weights(&self) -> &SelectionWeights {
        &self.weights
    }

    /// Selection weight for a character given its record, if any.
    #[must_use]
    pub fn weight(&self, record: Option<&ProgressRecord>, now: DateTime<Utc>) -> f64 {
        let Some(record) = record else {
            return self.weights.unseen_weight;
        };

        let proficiency = f64::from(record.proficiency.min(MAX_PROFICIENCY));
        let urgency = ((100.0 - proficiency) / 100.0).max(self.weights.min_urgency);

        let mut weight = self.weights.stage_weight(record.mastery_stage) * urgency;
        if record.is_due(now) {
            weight *= self.weights.due_multiplier;
        }
        if let Some(missed_at) = record.last_mistake_at {
            if now.signed_duration_since(missed_at) <= self.weights.recent_mistake_window() {
                weight *= self.weights.recent_mistake_multiplier;
            }
        }
        weight
    }

    /// Weights for every candidate, in input order.
    #[must_use]
    pub fn weigh<'a>(
        &self,
        candidates: &'a [CharacterId],
        progress: &HashMap<CharacterId, ProgressRecord>,
        now: DateTime<Utc>,
    ) -> Vec<CandidateWeight<'a>> {
        candidates
            .iter()
            .map(|character_id| CandidateWeight {
                character_id,
                weight: self.weight(progress.get(character_id), now),
            })
            .collect()
    }

    /// Pick the next character.
    ///
    /// `rng` must yield values in `[0, 1)`; out-of-range values are clamped.
    /// The draw is `rng() * total_weight`, and the first candidate (in input
    /// order) whose cumulative weight reaches the draw wins.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionViolation::EmptyCandidatePool` if `candidates` is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::collections::HashMap;
    /// # use kana_core::SelectionEngine;
    /// # use kana_core::model::CharacterId;
    /// let engine = SelectionEngine::default();
    /// let pool = vec![CharacterId::new("hiragana-a"), CharacterId::new("hiragana-i")];
    /// let now = kana_core::time::fixed_now();
    /// let picked = engine.select_next(&pool, &HashMap::new(), now, &mut || 0.0)?;
    /// assert_eq!(picked.as_str(), "hiragana-a");
    /// # Ok::<(), kana_core::PreconditionViolation>(())
    /// ```
    pub fn select_next<R>(
        &self,
        candidates: &[CharacterId],
        progress: &HashMap<CharacterId, ProgressRecord>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<CharacterId, PreconditionViolation>
    where
        R: FnMut() -> f64,
    {
        if candidates.is_empty() {
            return Err(PreconditionViolation::EmptyCandidatePool);
        }

        // zero, negative or non-finite weights never win a draw
        let weights: Vec<f64> = self
            .weigh(candidates, progress, now)
            .iter()
            .map(|c| {
                if c.weight.is_finite() && c.weight > 0.0 {
                    c.weight
                } else {
                    0.0
                }
            })
            .collect();
        let total: f64 = weights.iter().sum();

        let unit = rng();
        let unit = if unit.is_finite() {
            unit.clamp(0.0, 1.0)
        } else {
            0.0
        };

        if !(total.is_finite() && total > 0.0) {
            return Ok(candidates[uniform_index(unit, candidates.len())].clone());
        }

        let draw = unit * total;
        let mut cumulative = 0.0;
        let mut fallback = &candidates[0];
        for (character_id, &weight) in candidates.iter().zip(&weights) {
            if weight == 0.0 {
                continue;
            }
            fallback = character_id;
            cumulative += weight;
            if cumulative >= draw {
                return Ok(character_id.clone());
            }
        }

        // float rounding can leave the draw a hair above the final sum
        Ok(fallback.clone())
    }
}

/// Index for a unit draw when no candidate carries usable weight.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn uniform_index(unit: f64, len: usize) -> usize {
    ((unit * len as f64) as usize).min(len - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MasteryStage, UserId};
    use crate::time::fixed_now;
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn id(s: &str) -> CharacterId {
        CharacterId::new(s)
    }

    fn record(
        character: &str,
        proficiency: u8,
        stage: MasteryStage,
        review_due_at: DateTime<Utc>,
    ) -> ProgressRecord {
        ProgressRecord {
            user_id: UserId::new(uuid::Uuid::nil()),
            character_id: id(character),
            proficiency,
            mastery_stage: stage,
            consecutive_correct: 0,
            total_attempts: 5,
            mistake_count: 0,
            average_response_latency_ms: 1_000.0,
            last_attempt_at: review_due_at - Duration::days(1),
            review_due_at,
            last_mistake_at: None,
        }
    }

    #[test]
    fn empty_pool_is_a_precondition_violation() {
        let engine = SelectionEngine::default();
        let err = engine
            .select_next(&[], &HashMap::new(), fixed_now(), &mut || 0.5)
            .unwrap_err();
        assert_eq!(err, PreconditionViolation::EmptyCandidatePool);
    }

    #[test]
    fn unseen_characters_weigh_as_new() {
        let engine = SelectionEngine::default();
        assert_eq!(engine.weight(None, fixed_now()), 10.0);
    }

    #[test]
    fn weight_combines_stage_and_urgency() {
        let engine = SelectionEngine::default();
        let now = fixed_now();
        let r = record("a", 50, MasteryStage::Familiar, now + Duration::days(1));
        assert!((engine.weight(Some(&r), now) - 3.0).abs() < 1e-12);

        let strong = record("b", 100, MasteryStage::Mastered, now + Duration::days(1));
        assert!((engine.weight(Some(&strong), now) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn due_doubles_weight_exactly() {
        let engine = SelectionEngine::default();
        let now = fixed_now();
        let due = record("a", 40, MasteryStage::Learning, now - Duration::hours(1));
        let later = record("b", 40, MasteryStage::Learning, now + Duration::hours(1));

        assert_eq!(
            engine.weight(Some(&due), now),
            engine.weight(Some(&later), now) * 2.0
        );
    }

    #[test]
    fn recent_mistakes_boost_weight() {
        let engine = SelectionEngine::default();
        let now = fixed_now();
        let mut r = record("a", 40, MasteryStage::Learning, now + Duration::hours(1));
        let base = engine.weight(Some(&r), now);

        r.last_mistake_at = Some(now - Duration::days(2));
        assert!((engine.weight(Some(&r), now) - base * 1.5).abs() < 1e-12);

        r.last_mistake_at = Some(now - Duration::days(4));
        assert_eq!(engine.weight(Some(&r), now), base);
    }

    #[test]
    fn cumulative_walk_picks_by_draw_position() {
        let engine = SelectionEngine::default();
        let now = fixed_now();
        let pool = vec![id("a"), id("b")];
        let mut progress = HashMap::new();
        progress.insert(id("a"), record("a", 30, MasteryStage::Learning, now - Duration::hours(1)));
        progress.insert(id("b"), record("b", 30, MasteryStage::Learning, now + Duration::hours(1)));

        // a holds the first two thirds of the range, b the last third
        let low = engine.select_next(&pool, &progress, now, &mut || 0.01).unwrap();
        assert_eq!(low, id("a"));
        let high = engine.select_next(&pool, &progress, now, &mut || 0.99).unwrap();
        assert_eq!(high, id("b"));
        let edge = engine.select_next(&pool, &progress, now, &mut || 0.6).unwrap();
        assert_eq!(edge, id("a"));
    }

    #[test]
    fn unusable_weights_are_never_drawn() {
        let now = fixed_now();
        let pool = vec![id("a"), id("b"), id("c")];
        let mut progress = HashMap::new();
        progress.insert(id("a"), record("a", 30, MasteryStage::Learning, now + Duration::hours(1)));
        progress.insert(id("b"), record("b", 30, MasteryStage::Familiar, now + Duration::hours(1)));

        let mut weights = SelectionWeights::default();
        weights.stage_weights[1] = 0.0;
        weights.stage_weights[2] = -4.0;
        let engine = SelectionEngine::new(weights);

        assert_eq!(engine.select_next(&pool, &progress, now, &mut || 0.0).unwrap(), id("c"));
        assert_eq!(engine.select_next(&pool, &progress, now, &mut || 0.5).unwrap(), id("c"));
        assert_eq!(engine.select_next(&pool, &progress, now, &mut || 1.0).unwrap(), id("c"));

        let engine = SelectionEngine::new(SelectionWeights {
            stage_weights: [0.0; 6],
            unseen_weight: 0.0,
            ..SelectionWeights::default()
        });
        assert_eq!(engine.select_next(&pool, &progress, now, &mut || 0.0).unwrap(), id("a"));
        assert_eq!(engine.select_next(&pool, &progress, now, &mut || 0.99).unwrap(), id("c"));
    }

    #[test]
    fn out_of_range_rng_is_clamped() {
        let engine = SelectionEngine::default();
        let pool = vec![id("a"), id("b"), id("c")];
        let progress = HashMap::new();
        let now = fixed_now();

        assert_eq!(
            engine.select_next(&pool, &progress, now, &mut || 7.0).unwrap(),
            id("c")
        );
        assert_eq!(
            engine.select_next(&pool, &progress, now, &mut || f64::NAN).unwrap(),
            id("a")
        );
    }

    #[test]
    fn same_rng_sequence_gives_same_picks() {
        let engine = SelectionEngine::default();
        let now = fixed_now();
        let pool: Vec<CharacterId> = ["a", "i", "u", "e", "o"].into_iter().map(id).collect();
        let mut progress = HashMap::new();
        progress.insert(id("i"), record("i", 80, MasteryStage::Reliable, now - Duration::hours(2)));
        progress.insert(id("o"), record("o", 10, MasteryStage::Learning, now + Duration::days(2)));

        let run = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut draw = || rng.random::<f64>();
            (0..100)
                .map(|_| engine.select_next(&pool, &progress, now, &mut draw).unwrap())
                .collect::<Vec<_>>()
        };

        assert_eq!(run(42), run(42));
    }

    #[test]
    fn heavier_candidates_win_more_often() {
        let engine = SelectionEngine::default();
        let now = fixed_now();
        let pool = vec![id("fresh"), id("mastered")];
        let mut progress = HashMap::new();
        progress.insert(
            id("mastered"),
            record("mastered", 100, MasteryStage::Mastered, now + Duration::days(10)),
        );

        let mut rng = StdRng::seed_from_u64(3);
        let mut draw = || rng.random::<f64>();
        let fresh_picks = (0..1_000)
            .filter(|_| engine.select_next(&pool, &progress, now, &mut draw).unwrap() == id("fresh"))
            .count();
        assert!(fresh_picks > 950);
    }
}
