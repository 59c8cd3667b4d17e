use chrono::{DateTime, Utc};

use crate::model::{
    Attempt, CharacterId, MAX_PROFICIENCY, MasteryStage, ProgressRecord, UserId,
};
use crate::settings::SchedulerSettings;

/// Folds attempts into `ProgressRecord`s and schedules the next review.
///
/// The engine is pure: it never reads the clock and never touches storage.
/// Given the same previous record, attempt and `now`, it always returns the
/// same record.
///
/// # Examples
///
/// ```
/// # use kana_core::ProficiencyEngine;
/// # use kana_core::model::{Attempt, CharacterId, MasteryStage, UserId};
/// let engine = ProficiencyEngine::default();
/// let now = kana_core::time::fixed_now();
/// let record = engine.apply_attempt(
///     UserId::random(),
///     &CharacterId::new("hiragana-ka"),
///     None,
///     Attempt::correct(1_500.0),
///     now,
/// );
/// assert_eq!(record.proficiency, 15);
/// assert_eq!(record.mastery_stage, MasteryStage::New);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProficiencyEngine {
    settings: SchedulerSettings,
}

impl ProficiencyEngine {
    #[must_use]
    pub fn new(settings: SchedulerSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Apply one attempt to the learner's record for a character.
    ///
    /// - `previous == None` synthesizes the record for a first-ever attempt.
    /// - Otherwise counters, proficiency, stage and due date are advanced
    ///   from `previous`. Out-of-range values on `previous` are clamped.
    ///
    /// The identity of the returned record always comes from `user_id` and
    /// `character_id`.
    #[must_use]
    pub fn apply_attempt(
        &self,
        user_id: UserId,
        character_id: &CharacterId,
        previous: Option<&ProgressRecord>,
        attempt: Attempt,
        now: DateTime<Utc>,
    ) -> ProgressRecord {
        let latency_ms = self.sanitize_latency(attempt.latency_ms);
        let correct = attempt.correct;

        let Some(previous) = previous else {
            return self.first_attempt(user_id, character_id.clone(), correct, latency_ms, now);
        };

        let was_due = previous.is_due(now);

        let prior_attempts = previous.total_attempts;
        let total_attempts = prior_attempts.saturating_add(1);
        let mistake_count = previous
            .mistake_count
            .min(prior_attempts)
            .saturating_add(u32::from(!correct));

        let mut consecutive_correct = if correct {
            previous.consecutive_correct.saturating_add(1)
        } else {
            0
        };

        let prior_average = self.sanitize_latency(previous.average_response_latency_ms);
        let average_response_latency_ms = (prior_average * f64::from(prior_attempts)
            + latency_ms)
            / f64::from(total_attempts);

        let proficiency = self.next_proficiency(previous.proficiency.min(MAX_PROFICIENCY), correct);

        let mut mastery_stage = previous.mastery_stage;
        if was_due {
            if correct {
                if let Some(next) = mastery_stage.next() {
                    let met = self.settings.requirement_for(next).is_some_and(|req| {
                        req.is_met_by(
                            consecutive_correct,
                            proficiency,
                            total_attempts,
                            average_response_latency_ms,
                        )
                    });
                    if met {
                        mastery_stage = next;
                        consecutive_correct = 0;
                    }
                }
            } else {
                mastery_stage = mastery_stage.previous();
            }
        }

        if mastery_stage != previous.mastery_stage {
            tracing::debug!(
                user = %user_id,
                character = %character_id,
                from = %previous.mastery_stage,
                to = %mastery_stage,
                "mastery stage changed"
            );
        }

        ProgressRecord {
            user_id,
            character_id: character_id.clone(),
            proficiency,
            mastery_stage,
            consecutive_correct,
            total_attempts,
            mistake_count,
            average_response_latency_ms,
            last_attempt_at: now,
            review_due_at: self.due_after(now, mastery_stage, correct),
            last_mistake_at: if correct {
                previous.last_mistake_at
            } else {
                Some(now)
            },
        }
    }

    fn first_attempt(
        &self,
        user_id: UserId,
        character_id: CharacterId,
        correct: bool,
        latency_ms: f64,
        now: DateTime<Utc>,
    ) -> ProgressRecord {
        let proficiency = if correct {
            self.settings.first_correct_proficiency
        } else {
            self.settings.first_incorrect_proficiency
        };

        ProgressRecord {
            user_id,
            character_id,
            proficiency: proficiency.min(MAX_PROFICIENCY),
            mastery_stage: MasteryStage::New,
            consecutive_correct: u32::from(correct),
            total_attempts: 1,
            mistake_count: u32::from(!correct),
            average_response_latency_ms: latency_ms,
            last_attempt_at: now,
            review_due_at: self.due_after(now, MasteryStage::New, correct),
            last_mistake_at: (!correct).then_some(now),
        }
    }

    fn due_after(&self, now: DateTime<Utc>, stage: MasteryStage, correct: bool) -> DateTime<Utc> {
        now.checked_add_signed(self.settings.review_interval(stage, correct))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Signed proficiency change for an attempt at the given level.
    ///
    /// Gains shrink as proficiency rises; penalties grow with it.
    #[must_use]
    pub fn proficiency_delta(&self, proficiency: u8, correct: bool) -> i32 {
        let p = i32::from(proficiency.min(MAX_PROFICIENCY));
        let s = &self.settings;
        if correct {
            let gain = i32::from(s.max_gain) - p / i32::from(s.gain_step.max(1));
            gain.max(i32::from(s.min_gain))
        } else {
            let penalty = p / i32::from(s.penalty_step.max(1));
            -penalty.max(i32::from(s.min_penalty))
        }
    }

    fn next_proficiency(&self, proficiency: u8, correct: bool) -> u8 {
        let next = i32::from(proficiency) + self.proficiency_delta(proficiency, correct);
        let clamped = next.clamp(0, i32::from(MAX_PROFICIENCY));
        u8::try_from(clamped).unwrap_or(MAX_PROFICIENCY)
    }

    fn sanitize_latency(&self, latency_ms: f64) -> f64 {
        if latency_ms.is_finite() && latency_ms >= 0.0 {
            latency_ms
        } else {
            self.settings.default_latency_ms
        }
    }
}
