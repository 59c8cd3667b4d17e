use chrono::{DateTime, Utc};

use crate::model::ids::CharacterId;

/// Result of one answer, as reported by the practice UI.
///
/// `latency_ms` is raw telemetry; negative or non-finite values are replaced
/// with the configured default when the attempt is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attempt {
    pub correct: bool,
    pub latency_ms: f64,
}

impl Attempt {
    #[must_use]
    pub fn correct(latency_ms: f64) -> Self {
        Self {
            correct: true,
            latency_ms,
        }
    }

    #[must_use]
    pub fn incorrect(latency_ms: f64) -> Self {
        Self {
            correct: false,
            latency_ms,
        }
    }
}

/// An attempt within a session, tagged with the character and time.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    pub character_id: CharacterId,
    pub correct: bool,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
}

impl AttemptOutcome {
    #[must_use]
    pub fn new(
        character_id: CharacterId,
        attempt: Attempt,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            character_id,
            correct: attempt.correct,
            latency_ms: attempt.latency_ms,
            timestamp,
        }
    }
}
