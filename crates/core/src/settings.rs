use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{MAX_PROFICIENCY, MasteryStage};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("initial proficiency must be <= {MAX_PROFICIENCY}, got {provided}")]
    InvalidInitialProficiency { provided: u8 },

    #[error("proficiency step divisors must be > 0")]
    InvalidStepDivisor,

    #[error("stage {stage} requires proficiency <= {MAX_PROFICIENCY}, got {provided}")]
    InvalidStageProficiency { stage: MasteryStage, provided: u8 },

    #[error("stage {stage} latency ceiling must be finite and positive")]
    InvalidStageLatency { stage: MasteryStage },

    #[error("interval multiplier must be finite and >= 1, got {provided}")]
    InvalidIntervalMultiplier { provided: f64 },

    #[error("minimum interval must be > 0 seconds")]
    InvalidMinInterval,

    #[error("maximum interval must be between the minimum and {MAX_INTERVAL_CEILING_SECS} seconds, got {provided}")]
    InvalidMaxInterval { provided: u64 },

    #[error("default latency must be finite and >= 0, got {provided}")]
    InvalidDefaultLatency { provided: f64 },

    #[error("selection weight `{field}` must be finite and > 0")]
    InvalidSelectionWeight { field: &'static str },

    #[error("minimum urgency must be in (0, 1], got {provided}")]
    InvalidMinUrgency { provided: f64 },
}

/// Upper bound accepted for `max_interval_secs` (about 100 years).
pub const MAX_INTERVAL_CEILING_SECS: u64 = 100 * 365 * 86_400;

//
// ─── STAGE LADDER ──────────────────────────────────────────────────────────────
//

/// What a record must show, at review time, to enter a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageRequirement {
    pub min_streak: u32,
    #[serde(default)]
    pub min_proficiency: u8,
    #[serde(default)]
    pub min_total_attempts: u32,
    #[serde(default)]
    pub max_average_latency_ms: Option<f64>,
}

impl StageRequirement {
    #[must_use]
    pub fn streak(min_streak: u32) -> Self {
        Self {
            min_streak,
            min_proficiency: 0,
            min_total_attempts: 0,
            max_average_latency_ms: None,
        }
    }

    #[must_use]
    pub fn with_proficiency(mut self, min_proficiency: u8) -> Self {
        self.min_proficiency = min_proficiency;
        self
    }

    #[must_use]
    pub fn with_total_attempts(mut self, min_total_attempts: u32) -> Self {
        self.min_total_attempts = min_total_attempts;
        self
    }

    #[must_use]
    pub fn with_max_latency(mut self, max_average_latency_ms: f64) -> Self {
        self.max_average_latency_ms = Some(max_average_latency_ms);
        self
    }

    #[must_use]
    pub fn is_met_by(
        &self,
        streak: u32,
        proficiency: u8,
        total_attempts: u32,
        average_latency_ms: f64,
    ) -> bool {
        streak >= self.min_streak
            && proficiency >= self.min_proficiency
            && total_attempts >= self.min_total_attempts
            && self
                .max_average_latency_ms
                .is_none_or(|max| average_latency_ms <= max)
    }
}

//
// ─── SELECTION WEIGHTS ─────────────────────────────────────────────────────────
//

/// Knobs for the weighted-random character picker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionWeights {
    /// Base weight per stage, indexed by `MasteryStage::value()`.
    pub stage_weights: [f64; 6],
    /// Base weight for characters without a record.
    pub unseen_weight: f64,
    /// Floor of the `(100 - proficiency) / 100` urgency factor.
    pub min_urgency: f64,
    pub due_multiplier: f64,
    pub recent_mistake_multiplier: f64,
    pub recent_mistake_window_secs: u64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            stage_weights: [10.0, 8.0, 6.0, 4.0, 2.0, 1.0],
            unseen_weight: 10.0,
            min_urgency: 0.1,
            due_multiplier: 2.0,
            recent_mistake_multiplier: 1.5,
            recent_mistake_window_secs: 3 * 86_400,
        }
    }
}

impl SelectionWeights {
    #[must_use]
    pub fn stage_weight(&self, stage: MasteryStage) -> f64 {
        self.stage_weights[usize::from(stage.value())]
    }

    #[must_use]
    pub fn recent_mistake_window(&self) -> Duration {
        Duration::seconds(i64::try_from(self.recent_mistake_window_secs).unwrap_or(i64::MAX))
    }

    /// # Errors
    ///
    /// Returns `SettingsError` when a weight is zero, negative or not finite.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !self.stage_weights.iter().copied().all(positive) {
            return Err(SettingsError::InvalidSelectionWeight {
                field: "stage_weights",
            });
        }
        if !positive(self.unseen_weight) {
            return Err(SettingsError::InvalidSelectionWeight {
                field: "unseen_weight",
            });
        }
        if !positive(self.due_multiplier) {
            return Err(SettingsError::InvalidSelectionWeight {
                field: "due_multiplier",
            });
        }
        if !positive(self.recent_mistake_multiplier) {
            return Err(SettingsError::InvalidSelectionWeight {
                field: "recent_mistake_multiplier",
            });
        }
        if !(self.min_urgency > 0.0 && self.min_urgency <= 1.0) {
            return Err(SettingsError::InvalidMinUrgency {
                provided: self.min_urgency,
            });
        }
        Ok(())
    }
}

//
// ─── SCHEDULER SETTINGS ────────────────────────────────────────────────────────
//

/// Every tunable constant of the proficiency and selection engines.
///
/// Defaults reproduce the consolidated threshold ladder. Deployments that need
/// to match an older rollout can override any value from configuration and
/// then call [`SchedulerSettings::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSettings {
    pub first_correct_proficiency: u8,
    pub first_incorrect_proficiency: u8,
    /// Correct answer gain is `max(min_gain, max_gain - proficiency / gain_step)`.
    pub max_gain: u8,
    pub min_gain: u8,
    pub gain_step: u8,
    /// Incorrect answer penalty is `max(min_penalty, proficiency / penalty_step)`.
    pub min_penalty: u8,
    pub penalty_step: u8,
    /// Requirements to enter Learning, Familiar, Practiced, Reliable, Mastered.
    pub ladder: [StageRequirement; 5],
    /// Review interval while a character is still `New`.
    pub learning_interval_secs: u64,
    /// Review interval at `Learning`; each later stage multiplies it.
    pub initial_interval_secs: u64,
    pub interval_multiplier: f64,
    pub min_interval_secs: u64,
    /// Longest review interval any stage can reach.
    pub max_interval_secs: u64,
    /// Substituted for negative or non-finite latency telemetry.
    pub default_latency_ms: f64,
    pub selection: SelectionWeights,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            first_correct_proficiency: 15,
            first_incorrect_proficiency: 5,
            max_gain: 15,
            min_gain: 2,
            gain_step: 10,
            min_penalty: 3,
            penalty_step: 20,
            ladder: [
                StageRequirement::streak(1),
                StageRequirement::streak(10).with_proficiency(70),
                StageRequirement::streak(20)
                    .with_proficiency(80)
                    .with_total_attempts(3),
                StageRequirement::streak(30).with_proficiency(90),
                StageRequirement::streak(50)
                    .with_proficiency(95)
                    .with_max_latency(2_000.0),
            ],
            learning_interval_secs: 2 * 3_600,
            initial_interval_secs: 3 * 86_400,
            interval_multiplier: 1.5,
            min_interval_secs: 3_600,
            max_interval_secs: 365 * 86_400,
            default_latency_ms: 3_000.0,
            selection: SelectionWeights::default(),
        }
    }
}

impl SchedulerSettings {
    /// Requirement for entering `stage`; `None` for `New`, which is never entered
    /// by advancement.
    #[must_use]
    pub fn requirement_for(&self, stage: MasteryStage) -> Option<&StageRequirement> {
        match stage.value() {
            0 => None,
            n => self.ladder.get(usize::from(n) - 1),
        }
    }

    /// Time until the next review after an attempt that left the record at `stage`.
    ///
    /// Incorrect attempts halve the interval; the result stays within
    /// `min_interval_secs..=max_interval_secs`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn review_interval(&self, stage: MasteryStage, correct: bool) -> Duration {
        let base_secs = match stage.value() {
            0 => self.learning_interval_secs as f64,
            n => {
                self.initial_interval_secs as f64
                    * self.interval_multiplier.powi(i32::from(n) - 1)
            }
        };
        let secs = if correct { base_secs } else { base_secs / 2.0 };
        let ceiling = self.max_interval_secs.min(MAX_INTERVAL_CEILING_SECS) as f64;
        // NaN from a degenerate product falls to the ceiling
        let secs = secs.min(ceiling).max(self.min_interval_secs as f64);
        Duration::milliseconds((secs * 1_000.0).round() as i64)
    }

    /// Validates the settings after deserialization.
    ///
    /// # Errors
    ///
    /// Returns the first `SettingsError` found.
    pub fn validate(&self) -> Result<(), SettingsError> {
        for provided in [
            self.first_correct_proficiency,
            self.first_incorrect_proficiency,
        ] {
            if provided > MAX_PROFICIENCY {
                return Err(SettingsError::InvalidInitialProficiency { provided });
            }
        }
        if self.gain_step == 0 || self.penalty_step == 0 {
            return Err(SettingsError::InvalidStepDivisor);
        }
        for (requirement, stage) in self.ladder.iter().zip(MasteryStage::ALL.into_iter().skip(1)) {
            if requirement.min_proficiency > MAX_PROFICIENCY {
                return Err(SettingsError::InvalidStageProficiency {
                    stage,
                    provided: requirement.min_proficiency,
                });
            }
            if let Some(max) = requirement.max_average_latency_ms {
                if !(max.is_finite() && max > 0.0) {
                    return Err(SettingsError::InvalidStageLatency { stage });
                }
            }
        }
        if !(self.interval_multiplier.is_finite() && self.interval_multiplier >= 1.0) {
            return Err(SettingsError::InvalidIntervalMultiplier {
                provided: self.interval_multiplier,
            });
        }
        if self.min_interval_secs == 0 {
            return Err(SettingsError::InvalidMinInterval);
        }
        if self.max_interval_secs < self.min_interval_secs
            || self.max_interval_secs > MAX_INTERVAL_CEILING_SECS
        {
            return Err(SettingsError::InvalidMaxInterval {
                provided: self.max_interval_secs,
            });
        }
        if !(self.default_latency_ms.is_finite() && self.default_latency_ms >= 0.0) {
            return Err(SettingsError::InvalidDefaultLatency {
                provided: self.default_latency_ms,
            });
        }
        self.selection.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SchedulerSettings::default().validate().unwrap();
    }

    #[test]
    fn interval_grows_by_multiplier_per_stage() {
        let s = SchedulerSettings::default();
        assert_eq!(s.review_interval(MasteryStage::Learning, true), Duration::days(3));
        assert_eq!(
            s.review_interval(MasteryStage::Familiar, true),
            Duration::hours(108)
        );
        assert_eq!(
            s.review_interval(MasteryStage::Familiar, false),
            Duration::hours(54)
        );
    }

    #[test]
    fn new_stage_uses_short_interval_with_floor() {
        let s = SchedulerSettings::default();
        assert_eq!(s.review_interval(MasteryStage::New, true), Duration::hours(2));
        assert_eq!(s.review_interval(MasteryStage::New, false), Duration::hours(1));

        let tight = SchedulerSettings {
            learning_interval_secs: 600,
            ..SchedulerSettings::default()
        };
        assert_eq!(
            tight.review_interval(MasteryStage::New, false),
            Duration::hours(1)
        );
    }

    #[test]
    fn requirement_lookup_skips_new() {
        let s = SchedulerSettings::default();
        assert!(s.requirement_for(MasteryStage::New).is_none());
        let mastered = s.requirement_for(MasteryStage::Mastered).unwrap();
        assert_eq!(mastered.min_streak, 50);
        assert_eq!(mastered.max_average_latency_ms, Some(2_000.0));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let s = SchedulerSettings {
            interval_multiplier: 0.5,
            ..SchedulerSettings::default()
        };
        assert!(matches!(
            s.validate(),
            Err(SettingsError::InvalidIntervalMultiplier { .. })
        ));

        let s = SchedulerSettings {
            max_interval_secs: 60,
            ..SchedulerSettings::default()
        };
        assert!(matches!(
            s.validate(),
            Err(SettingsError::InvalidMaxInterval { provided: 60 })
        ));

        let mut s = SchedulerSettings::default();
        s.selection.min_urgency = 0.0;
        assert!(matches!(
            s.validate(),
            Err(SettingsError::InvalidMinUrgency { .. })
        ));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let parsed: SchedulerSettings = toml::from_str(
            r"
            interval_multiplier = 2.0

            [selection]
            due_multiplier = 3.0
            ",
        )
        .unwrap();
        assert_eq!(parsed.interval_multiplier, 2.0);
        assert_eq!(parsed.selection.due_multiplier, 3.0);
        assert_eq!(parsed.selection.unseen_weight, 10.0);
        assert_eq!(parsed.first_correct_proficiency, 15);
        parsed.validate().unwrap();
    }

    #[test]
    fn misspelled_keys_are_rejected() {
        assert!(toml::from_str::<SchedulerSettings>("interval_multiplyer = 2.0").is_err());
        assert!(toml::from_str::<SchedulerSettings>("[selection]\ndue_multipler = 3.0").is_err());
        assert!(toml::from_str::<StageRequirement>("min_streak = 1\nmin_proficency = 5").is_err());
    }
}
