use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kana_core::model::{
    CharacterId, MasteryStage, ProgressRecord, ScriptKind, SessionId, SessionSummary, UserId,
};
use storage::repository::{
    CatalogRepository, ProgressRepository, SessionSummaryRepository, Storage, StorageError,
};

use crate::Clock;

const DEFAULT_DIFFICULT_LIMIT: usize = 5;

/// A character the learner misses often.
#[derive(Debug, Clone, PartialEq)]
pub struct DifficultCharacter {
    pub character_id: CharacterId,
    pub glyph: String,
    pub mistake_rate: f64,
    pub total_attempts: u32,
}

/// Presentation-agnostic snapshot of a learner's progress over one script.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressOverview {
    pub total_characters: usize,
    /// Characters never attempted.
    pub unseen: usize,
    /// Attempted characters per stage, indexed by `MasteryStage::value()`.
    pub stage_counts: [usize; 6],
    pub due: usize,
    pub difficult: Vec<DifficultCharacter>,
}

impl ProgressOverview {
    #[must_use]
    pub fn count(&self, stage: MasteryStage) -> usize {
        self.stage_counts[usize::from(stage.value())]
    }

    #[must_use]
    pub fn seen(&self) -> usize {
        self.total_characters - self.unseen
    }
}

/// One row of the recent-sessions list.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionListItem {
    pub session_id: SessionId,
    pub completed_at: DateTime<Utc>,
    pub total: u32,
    pub correct: u32,
    pub accuracy: f64,
    pub longest_streak: u32,
    pub duration_ms: u64,
}

impl SessionListItem {
    #[must_use]
    pub fn from_summary(summary: &SessionSummary) -> Self {
        Self {
            session_id: summary.session_id(),
            completed_at: summary.completed_at(),
            total: summary.total_count(),
            correct: summary.correct_count(),
            accuracy: summary.accuracy(),
            longest_streak: summary.longest_streak(),
            duration_ms: summary.duration_ms(),
        }
    }
}

/// Read-only progress reporting.
#[derive(Clone)]
pub struct ProgressOverviewService {
    clock: Clock,
    catalog: Arc<dyn CatalogRepository>,
    progress: Arc<dyn ProgressRepository>,
    summaries: Arc<dyn SessionSummaryRepository>,
    difficult_limit: usize,
}

impl ProgressOverviewService {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage) -> Self {
        Self {
            clock,
            catalog: Arc::clone(&storage.catalog),
            progress: Arc::clone(&storage.progress),
            summaries: Arc::clone(&storage.session_summaries),
            difficult_limit: DEFAULT_DIFFICULT_LIMIT,
        }
    }

    #[must_use]
    pub fn with_difficult_limit(mut self, limit: usize) -> Self {
        self.difficult_limit = limit;
        self
    }

    /// Stage counts, due count and most-missed characters for `script`
    /// (every script for `None`).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    pub async fn overview(
        &self,
        user_id: UserId,
        script: Option<ScriptKind>,
    ) -> Result<ProgressOverview, StorageError> {
        let now = self.clock.now();
        let characters = self.catalog.character_catalog(script).await?;
        let ids: Vec<CharacterId> = characters.iter().map(|c| c.id().clone()).collect();
        let records: HashMap<CharacterId, ProgressRecord> = self
            .progress
            .list_progress(user_id, Some(&ids))
            .await?
            .into_iter()
            .map(|r| (r.character_id.clone(), r))
            .collect();

        let mut stage_counts = [0_usize; 6];
        let mut due = 0;
        let mut difficult = Vec::new();
        for character in &characters {
            let Some(record) = records.get(character.id()) else {
                continue;
            };
            stage_counts[usize::from(record.mastery_stage.value())] += 1;
            if record.is_due(now) {
                due += 1;
            }
            if record.mistake_count > 0 {
                difficult.push(DifficultCharacter {
                    character_id: character.id().clone(),
                    glyph: character.glyph().to_owned(),
                    mistake_rate: record.mistake_rate(),
                    total_attempts: record.total_attempts,
                });
            }
        }

        difficult.sort_by(|a, b| {
            b.mistake_rate
                .total_cmp(&a.mistake_rate)
                .then(b.total_attempts.cmp(&a.total_attempts))
                .then_with(|| a.character_id.cmp(&b.character_id))
        });
        difficult.truncate(self.difficult_limit);

        Ok(ProgressOverview {
            total_characters: characters.len(),
            unseen: characters.len() - records.len().min(characters.len()),
            stage_counts,
            due,
            difficult,
        })
    }

    /// Most recent sessions first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    pub async fn recent_sessions(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<SessionListItem>, StorageError> {
        let summaries = self.summaries.list_summaries(user_id, limit).await?;
        Ok(summaries.iter().map(SessionListItem::from_summary).collect())
    }
}
