use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::PreconditionViolation;
use crate::model::{
    AttemptOutcome, CharacterId, CharacterResult, SessionId, SessionStatsSnapshot,
    SessionSummary, accuracy_percent,
};

#[derive(Debug, Clone, Default)]
struct CharacterTally {
    attempts: u32,
    correct: u32,
    latency_total_ms: f64,
}

/// Running statistics for one practice session.
///
/// Owned by a single session flow. It performs no I/O; persisting the summary
/// returned by [`SessionAggregator::finish`] is up to the caller.
#[derive(Debug, Clone)]
pub struct SessionAggregator {
    session_id: SessionId,
    started_at: DateTime<Utc>,
    attempts: Vec<AttemptOutcome>,
    correct_count: u32,
    total_count: u32,
    current_streak: u32,
    longest_streak: u32,
    latency_total_ms: f64,
    order: Vec<CharacterId>,
    tallies: HashMap<CharacterId, CharacterTally>,
    finished_at: Option<DateTime<Utc>>,
}

impl SessionAggregator {
    #[must_use]
    pub fn new(session_id: SessionId, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            started_at,
            attempts: Vec::new(),
            correct_count: 0,
            total_count: 0,
            current_streak: 0,
            longest_streak: 0,
            latency_total_ms: 0.0,
            order: Vec::new(),
            tallies: HashMap::new(),
            finished_at: None,
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
    pub fn attempts(&self) -> &[AttemptOutcome] {
        &self.attempts
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Append an outcome and return the updated statistics.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionViolation::SessionFinished` after `finish`.
    pub fn record_attempt(
        &mut self,
        outcome: AttemptOutcome,
    ) -> Result<SessionStatsSnapshot, PreconditionViolation> {
        if self.is_finished() {
            return Err(PreconditionViolation::SessionFinished(self.session_id));
        }

        let latency_ms = if outcome.latency_ms.is_finite() {
            outcome.latency_ms.max(0.0)
        } else {
            0.0
        };

        self.total_count = self.total_count.saturating_add(1);
        if outcome.correct {
            self.correct_count = self.correct_count.saturating_add(1);
            self.current_streak = self.current_streak.saturating_add(1);
            self.longest_streak = self.longest_streak.max(self.current_streak);
        } else {
            self.current_streak = 0;
        }
        self.latency_total_ms += latency_ms;

        if !self.tallies.contains_key(&outcome.character_id) {
            self.order.push(outcome.character_id.clone());
        }
        let tally = self
            .tallies
            .entry(outcome.character_id.clone())
            .or_default();
        tally.attempts = tally.attempts.saturating_add(1);
        tally.correct = tally.correct.saturating_add(u32::from(outcome.correct));
        tally.latency_total_ms += latency_ms;

        self.attempts.push(outcome);
        Ok(self.snapshot())
    }

    /// Current statistics without recording anything.
    #[must_use]
    pub fn snapshot(&self) -> SessionStatsSnapshot {
        let average_latency_ms = if self.total_count == 0 {
            0.0
        } else {
            self.latency_total_ms / f64::from(self.total_count)
        };

        SessionStatsSnapshot {
            total_count: self.total_count,
            correct_count: self.correct_count,
            accuracy: accuracy_percent(self.correct_count, self.total_count),
            current_streak: self.current_streak,
            longest_streak: self.longest_streak,
            average_latency_ms,
        }
    }

    /// Close the session and build its summary.
    ///
    /// A `now` earlier than the start is treated as the start time.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionViolation::SessionFinished` if already finished.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Result<SessionSummary, PreconditionViolation> {
        if self.is_finished() {
            return Err(PreconditionViolation::SessionFinished(self.session_id));
        }
        let completed_at = now.max(self.started_at);
        self.finished_at = Some(completed_at);

        let per_character_results = self
            .order
            .iter()
            .filter_map(|id| {
                self.tallies.get(id).map(|tally| CharacterResult {
                    character_id: id.clone(),
                    attempts: tally.attempts,
                    correct: tally.correct,
                    average_latency_ms: if tally.attempts == 0 {
                        0.0
                    } else {
                        tally.latency_total_ms / f64::from(tally.attempts)
                    },
                })
            })
            .collect();

        tracing::debug!(
            session = %self.session_id,
            total = self.total_count,
            correct = self.correct_count,
            "session finished"
        );

        Ok(SessionSummary::from_aggregate(
            self.session_id,
            self.started_at,
            completed_at,
            self.total_count,
            self.correct_count,
            self.longest_streak,
            per_character_results,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Attempt;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn outcome(character: &str, correct: bool, latency_ms: f64) -> AttemptOutcome {
        AttemptOutcome::new(
            CharacterId::new(character),
            Attempt {
                correct,
                latency_ms,
            },
            fixed_now(),
        )
    }

    #[test]
    fn empty_session_has_zero_accuracy() {
        let agg = SessionAggregator::new(SessionId::random(), fixed_now());
        let snap = agg.snapshot();
        assert_eq!(snap.total_count, 0);
        assert_eq!(snap.accuracy, 0.0);
        assert_eq!(snap.average_latency_ms, 0.0);
    }

    #[test]
    fn streaks_and_accuracy_follow_attempts() {
        let started = fixed_now();
        let mut agg = SessionAggregator::new(SessionId::random(), started);

        let s = agg.record_attempt(outcome("a", true, 1_000.0)).unwrap();
        assert_eq!((s.current_streak, s.longest_streak), (1, 1));
        agg.record_attempt(outcome("i", true, 1_000.0)).unwrap();
        let s = agg.record_attempt(outcome("a", false, 2_000.0)).unwrap();
        assert_eq!((s.current_streak, s.longest_streak), (0, 2));
        let s = agg.record_attempt(outcome("u", true, 4_000.0)).unwrap();
        assert_eq!(s.current_streak, 1);
        assert_eq!(s.average_latency_ms, 2_000.0);

        let summary = agg.finish(started + Duration::seconds(95)).unwrap();
        assert_eq!(summary.correct_count(), 3);
        assert_eq!(summary.total_count(), 4);
        assert_eq!(summary.accuracy(), 75.0);
        assert_eq!(summary.longest_streak(), 2);
        assert_eq!(summary.duration_ms(), 95_000);

        let per = summary.per_character_results();
        assert_eq!(per.len(), 3);
        assert_eq!(per[0].character_id, CharacterId::new("a"));
        assert_eq!((per[0].attempts, per[0].correct), (2, 1));
        assert_eq!(per[0].average_latency_ms, 1_500.0);
        assert_eq!(per[2].character_id, CharacterId::new("u"));
    }

    #[test]
    fn recording_after_finish_is_rejected() {
        let mut agg = SessionAggregator::new(SessionId::random(), fixed_now());
        agg.record_attempt(outcome("a", true, 800.0)).unwrap();
        agg.finish(fixed_now()).unwrap();

        let err = agg.record_attempt(outcome("a", true, 800.0)).unwrap_err();
        assert_eq!(err, PreconditionViolation::SessionFinished(agg.session_id()));
        assert!(agg.finish(fixed_now()).is_err());
        assert_eq!(agg.attempts().len(), 1);
    }

    #[test]
    fn finish_before_start_has_zero_duration() {
        let started = fixed_now();
        let mut agg = SessionAggregator::new(SessionId::random(), started);
        let summary = agg.finish(started - Duration::minutes(5)).unwrap();
        assert_eq!(summary.duration_ms(), 0);
        assert_eq!(summary.accuracy(), 0.0);
    }

    #[test]
    fn negative_latency_counts_as_zero() {
        let mut agg = SessionAggregator::new(SessionId::random(), fixed_now());
        let s = agg.record_attempt(outcome("a", true, -50.0)).unwrap();
        assert_eq!(s.average_latency_ms, 0.0);
    }
}
