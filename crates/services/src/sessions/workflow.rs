use std::sync::Arc;

use kana_core::model::{
    Attempt, AttemptOutcome, Character, CharacterId, ProgressRecord, ScriptKind, SessionId,
    SessionStatsSnapshot, SessionSummary, UserId,
};
use kana_core::{
    Clock, PreconditionViolation, ProficiencyEngine, SchedulerSettings, SelectionEngine,
    SessionAggregator,
};
use rand::Rng;
use storage::repository::{CatalogRepository, SessionSummaryRepository, Storage, StorageError};

use super::session::PracticeSession;
use crate::error::PracticeError;
use crate::progress_service::ProgressService;

/// Result of answering the current character.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerResult {
    pub character_id: CharacterId,
    pub correct: bool,
    pub expected_answer: String,
    pub record: ProgressRecord,
    pub stats: SessionStatsSnapshot,
    /// `false` when the record is waiting for the store to come back.
    pub persisted: bool,
}

/// A finished session and whether its summary reached the store.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedSession {
    pub summary: SessionSummary,
    pub summary_persisted: bool,
    pub pending_writes: usize,
}

/// Orchestrates session start, selection, answering and completion.
#[derive(Clone)]
pub struct PracticeLoopService {
    clock: Clock,
    catalog: Arc<dyn CatalogRepository>,
    summaries: Arc<dyn SessionSummaryRepository>,
    progress: ProgressService,
    selection: SelectionEngine,
    avoid_immediate_repeat: bool,
}

impl PracticeLoopService {
    /// Build the loop over `storage` with the given engine settings.
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage, settings: SchedulerSettings) -> Self {
        let selection = SelectionEngine::new(settings.selection.clone());
        let progress = ProgressService::new(
            ProficiencyEngine::new(settings),
            Arc::clone(&storage.progress),
        );
        Self {
            clock,
            catalog: Arc::clone(&storage.catalog),
            summaries: Arc::clone(&storage.session_summaries),
            progress,
            selection,
            avoid_immediate_repeat: false,
        }
    }

    /// Skip the character just shown when drawing the next one.
    #[must_use]
    pub fn with_avoid_immediate_repeat(mut self, enabled: bool) -> Self {
        self.avoid_immediate_repeat = enabled;
        self
    }

    /// Use conditional writes with re-read and retry on conflict.
    #[must_use]
    pub fn with_optimistic_concurrency(mut self, enabled: bool) -> Self {
        self.progress = self.progress.with_optimistic_concurrency(enabled);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Start a session over the characters of `script` (all scripts for
    /// `None`), restricted to `groups` when non-empty.
    ///
    /// Progress is loaded up front; if the store is down the session starts
    /// with what it can see and treats the rest as unseen.
    ///
    /// # Errors
    ///
    /// Returns `PracticeError::Precondition` if no character matches, or
    /// `PracticeError::Storage` if the catalog cannot be loaded.
    pub async fn start_session(
        &self,
        user_id: UserId,
        script: Option<ScriptKind>,
        groups: &[String],
    ) -> Result<PracticeSession, PracticeError> {
        let now = self.clock.now();
        let characters: Vec<Character> = self
            .catalog
            .character_catalog(script)
            .await?
            .into_iter()
            .filter(|c| groups.is_empty() || groups.iter().any(|g| g == c.group()))
            .collect();
        if characters.is_empty() {
            return Err(PreconditionViolation::EmptyCandidatePool.into());
        }

        let ids: Vec<CharacterId> = characters.iter().map(|c| c.id().clone()).collect();
        let progress = match self.progress.load_progress(user_id, &ids).await {
            Ok(progress) => progress,
            Err(err) => {
                tracing::warn!(user = %user_id, error = %err, "progress unavailable at session start");
                Default::default()
            }
        };

        let session_id = SessionId::random();
        tracing::info!(
            session = %session_id,
            user = %user_id,
            candidates = characters.len(),
            known = progress.len(),
            "practice session started"
        );

        Ok(PracticeSession::new(
            user_id,
            SessionAggregator::new(session_id, now),
            characters,
            progress,
        ))
    }

    /// Draw the next character and mark it as current.
    ///
    /// # Errors
    ///
    /// Returns `PracticeError::Precondition` if the session is finished.
    pub fn next_character(&self, session: &mut PracticeSession) -> Result<Character, PracticeError> {
        if session.is_finished() {
            return Err(PreconditionViolation::SessionFinished(session.session_id()).into());
        }
        let pool = session.pool(self.avoid_immediate_repeat);
        let rng = &mut session.rng;
        let picked = self.selection.select_next(
            &pool,
            &session.progress,
            self.clock.now(),
            &mut || rng.random::<f64>(),
        )?;

        let character = session
            .characters
            .get(&picked)
            .cloned()
            .ok_or_else(|| PracticeError::UnknownCharacter(picked.clone()))?;
        session.current = Some(picked.clone());
        session.last_shown = Some(picked);
        Ok(character)
    }

    /// Check a typed answer against the current character and record it.
    ///
    /// # Errors
    ///
    /// Returns `PracticeError::NoCurrentCharacter` if nothing was drawn, plus
    /// everything `record_outcome` returns.
    pub async fn submit_answer(
        &self,
        session: &mut PracticeSession,
        answer: &str,
        latency_ms: f64,
    ) -> Result<AnswerResult, PracticeError> {
        let character = session
            .current_character()
            .ok_or(PracticeError::NoCurrentCharacter)?;
        let attempt = Attempt {
            correct: character.accepts(answer),
            latency_ms,
        };
        let id = character.id().clone();
        self.record_outcome(session, &id, attempt).await
    }

    /// Record an already graded attempt for a character of this session.
    ///
    /// # Errors
    ///
    /// Returns `PracticeError::Precondition` after `finish`,
    /// `PracticeError::UnknownCharacter` for characters outside the pool and
    /// `PracticeError::Progress` if optimistic writes give up.
    pub async fn record_outcome(
        &self,
        session: &mut PracticeSession,
        character_id: &CharacterId,
        attempt: Attempt,
    ) -> Result<AnswerResult, PracticeError> {
        if session.is_finished() {
            return Err(PreconditionViolation::SessionFinished(session.session_id()).into());
        }
        let expected_answer = session
            .characters
            .get(character_id)
            .map(|c| c.expected_answer().to_owned())
            .ok_or_else(|| PracticeError::UnknownCharacter(character_id.clone()))?;

        let now = self.clock.now();
        let known = session.progress.get(character_id).cloned();
        let applied = self
            .progress
            .apply_attempt(
                session.user_id(),
                character_id,
                attempt,
                now,
                known.as_ref(),
                &mut session.pending,
            )
            .await?;

        session.absorb_flushed();
        session
            .progress
            .insert(character_id.clone(), applied.record.clone());
        let stats = session.aggregator.record_attempt(AttemptOutcome::new(
            character_id.clone(),
            attempt,
            now,
        ))?;
        if session.current.as_ref() == Some(character_id) {
            session.current = None;
        }

        Ok(AnswerResult {
            character_id: character_id.clone(),
            correct: attempt.correct,
            expected_answer,
            record: applied.record,
            stats,
            persisted: applied.persisted,
        })
    }

    /// Close the session, flush deferred writes and persist the summary.
    ///
    /// Store failures here are reported through the flags of
    /// `FinishedSession`; call [`Self::retry_persist`] later to try again.
    ///
    /// # Errors
    ///
    /// Returns `PracticeError::Precondition` if already finished.
    pub async fn finish(
        &self,
        session: &mut PracticeSession,
    ) -> Result<FinishedSession, PracticeError> {
        let summary = session.aggregator.finish(self.clock.now())?;
        session.current = None;
        session.summary = Some(summary.clone());
        tracing::info!(
            session = %summary.session_id(),
            total = summary.total_count(),
            accuracy = summary.accuracy(),
            "practice session finished"
        );

        self.persist(session).await;
        Ok(FinishedSession {
            summary,
            summary_persisted: session.summary_persisted,
            pending_writes: session.pending_writes(),
        })
    }

    /// Retry the writes `finish` could not complete.
    ///
    /// # Errors
    ///
    /// Returns `PracticeError::NotFinished` if `finish` has not run.
    pub async fn retry_persist(
        &self,
        session: &mut PracticeSession,
    ) -> Result<FinishedSession, PracticeError> {
        let summary = session.summary.clone().ok_or(PracticeError::NotFinished)?;
        self.persist(session).await;
        Ok(FinishedSession {
            summary,
            summary_persisted: session.summary_persisted,
            pending_writes: session.pending_writes(),
        })
    }

    async fn persist(&self, session: &mut PracticeSession) {
        if let Err(err) = self.progress.flush_pending(&mut session.pending).await {
            tracing::warn!(
                error = %err,
                remaining = session.pending_writes(),
                "deferred progress writes still pending"
            );
        }
        session.absorb_flushed();

        if session.summary_persisted {
            return;
        }
        let Some(summary) = session.summary.as_ref() else {
            return;
        };
        match self
            .summaries
            .save_summary(session.user_id(), summary)
            .await
        {
            Ok(()) => session.summary_persisted = true,
            Err(StorageError::Conflict) => {
                // already stored by an earlier attempt whose reply was lost
                session.summary_persisted = true;
            }
            Err(err) => {
                tracing::warn!(
                    session = %summary.session_id(),
                    error = %err,
                    "session summary not saved"
                );
            }
        }
    }
}
