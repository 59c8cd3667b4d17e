use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{CharacterId, SessionId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionSummaryError {
    #[error("completed_at is before started_at")]
    InvalidTimeRange,

    #[error("correct count ({correct}) exceeds total count ({total})")]
    CountMismatch { correct: u32, total: u32 },

    #[error("longest streak ({streak}) exceeds correct count ({correct})")]
    StreakMismatch { streak: u32, correct: u32 },
}

/// Percentage of correct answers; zero when nothing was answered.
#[must_use]
pub fn accuracy_percent(correct: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    f64::from(correct) / f64::from(total) * 100.0
}

/// Running statistics returned after every recorded attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStatsSnapshot {
    pub total_count: u32,
    pub correct_count: u32,
    pub accuracy: f64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub average_latency_ms: f64,
}

/// Per-character aggregate inside one session.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterResult {
    pub character_id: CharacterId,
    pub attempts: u32,
    pub correct: u32,
    pub average_latency_ms: f64,
}

impl CharacterResult {
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        accuracy_percent(self.correct, self.attempts)
    }
}

/// Aggregate summary for a completed practice session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    session_id: SessionId,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    total_count: u32,
    correct_count: u32,
    longest_streak: u32,
    per_character_results: Vec<CharacterResult>,
}

impl SessionSummary {
    /// Rehydrate a session summary from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `SessionSummaryError` if the counts or time range are inconsistent.
    pub fn from_persisted(
        session_id: SessionId,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        total_count: u32,
        correct_count: u32,
        longest_streak: u32,
        per_character_results: Vec<CharacterResult>,
    ) -> Result<Self, SessionSummaryError> {
        if completed_at < started_at {
            return Err(SessionSummaryError::InvalidTimeRange);
        }
        if correct_count > total_count {
            return Err(SessionSummaryError::CountMismatch {
                correct: correct_count,
                total: total_count,
            });
        }
        if longest_streak > correct_count {
            return Err(SessionSummaryError::StreakMismatch {
                streak: longest_streak,
                correct: correct_count,
            });
        }

        Ok(Self {
            session_id,
            started_at,
            completed_at,
            total_count,
            correct_count,
            longest_streak,
            per_character_results,
        })
    }

    /// Built by the aggregator, whose counters already hold the invariants
    /// `from_persisted` checks.
    pub(crate) fn from_aggregate(
        session_id: SessionId,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        total_count: u32,
        correct_count: u32,
        longest_streak: u32,
        per_character_results: Vec<CharacterResult>,
    ) -> Self {
        Self {
            session_id,
            started_at,
            completed_at,
            total_count,
            correct_count,
            longest_streak,
            per_character_results,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    #[must_use]
    pub fn total_count(&self) -> u32 {
        self.total_count
    }

    #[must_use]
    pub fn correct_count(&self) -> u32 {
        self.correct_count
    }

    #[must_use]
    pub fn accuracy(&self) -> f64 {
        accuracy_percent(self.correct_count, self.total_count)
    }

    #[must_use]
    pub fn longest_streak(&self) -> u32 {
        self.longest_streak
    }

    /// Wall-clock length of the session in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        let ms = self
            .completed_at
            .signed_duration_since(self.started_at)
            .num_milliseconds();
        u64::try_from(ms).unwrap_or(0)
    }

    #[must_use]
    pub fn per_character_results(&self) -> &[CharacterResult] {
        &self.per_character_results
    }
}
