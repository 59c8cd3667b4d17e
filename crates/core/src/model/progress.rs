use chrono::{DateTime, Utc};
use std::fmt;

use crate::model::ids::{CharacterId, UserId};

/// Upper bound of the proficiency score.
pub const MAX_PROFICIENCY: u8 = 100;

//
// ─── MASTERY STAGE ─────────────────────────────────────────────────────────────
//

/// Discrete progression of a learner's command of one character.
///
/// Stages only ever move one step at a time, and only when the character is
/// due for review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum MasteryStage {
    #[default]
    New,
    Learning,
    Familiar,
    Practiced,
    Reliable,
    Mastered,
}

impl MasteryStage {
    pub const ALL: [MasteryStage; 6] = [
        MasteryStage::New,
        MasteryStage::Learning,
        MasteryStage::Familiar,
        MasteryStage::Practiced,
        MasteryStage::Reliable,
        MasteryStage::Mastered,
    ];

    /// Numeric value in `0..=5`.
    #[must_use]
    pub fn value(self) -> u8 {
        match self {
            MasteryStage::New => 0,
            MasteryStage::Learning => 1,
            MasteryStage::Familiar => 2,
            MasteryStage::Practiced => 3,
            MasteryStage::Reliable => 4,
            MasteryStage::Mastered => 5,
        }
    }

    /// Maps any integer onto a stage, clamping out-of-range values.
    #[must_use]
    pub fn from_clamped(value: i64) -> Self {
        match value {
            i64::MIN..=0 => MasteryStage::New,
            1 => MasteryStage::Learning,
            2 => MasteryStage::Familiar,
            3 => MasteryStage::Practiced,
            4 => MasteryStage::Reliable,
            _ => MasteryStage::Mastered,
        }
    }

    /// The stage one step up, or `None` at the top.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            MasteryStage::New => Some(MasteryStage::Learning),
            MasteryStage::Learning => Some(MasteryStage::Familiar),
            MasteryStage::Familiar => Some(MasteryStage::Practiced),
            MasteryStage::Practiced => Some(MasteryStage::Reliable),
            MasteryStage::Reliable => Some(MasteryStage::Mastered),
            MasteryStage::Mastered => None,
        }
    }

    /// The stage one step down; `New` stays `New`.
    #[must_use]
    pub fn previous(self) -> Self {
        match self {
            MasteryStage::New | MasteryStage::Learning => MasteryStage::New,
            MasteryStage::Familiar => MasteryStage::Learning,
            MasteryStage::Practiced => MasteryStage::Familiar,
            MasteryStage::Reliable => MasteryStage::Practiced,
            MasteryStage::Mastered => MasteryStage::Reliable,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MasteryStage::New => "new",
            MasteryStage::Learning => "learning",
            MasteryStage::Familiar => "familiar",
            MasteryStage::Practiced => "practiced",
            MasteryStage::Reliable => "reliable",
            MasteryStage::Mastered => "mastered",
        }
    }
}

impl fmt::Display for MasteryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── PROGRESS RECORD ───────────────────────────────────────────────────────────
//

/// Per-user, per-character learning state.
///
/// Every attempt is folded into these running aggregates; the raw attempt
/// history is not kept. `(user_id, character_id)` identifies the record.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    pub user_id: UserId,
    pub character_id: CharacterId,
    pub proficiency: u8,
    pub mastery_stage: MasteryStage,
    pub consecutive_correct: u32,
    pub total_attempts: u32,
    pub mistake_count: u32,
    pub average_response_latency_ms: f64,
    pub last_attempt_at: DateTime<Utc>,
    pub review_due_at: DateTime<Utc>,
    pub last_mistake_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    /// A character is due once the clock has reached `review_due_at`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.review_due_at
    }

    /// Share of attempts that were mistakes, in `0.0..=1.0`.
    #[must_use]
    pub fn mistake_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        f64::from(self.mistake_count.min(self.total_attempts)) / f64::from(self.total_attempts)
    }
}
