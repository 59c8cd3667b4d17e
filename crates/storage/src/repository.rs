use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kana_core::CharacterCatalog;
use kana_core::model::{
    Character, CharacterId, ProgressRecord, ScriptKind, SessionId, SessionSummary, UserId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
///
/// Callers treat every variant except `Conflict` as "store unavailable".
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable per-user, per-character progress.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch the record for one user and character, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn get_progress(
        &self,
        user_id: UserId,
        character_id: &CharacterId,
    ) -> Result<Option<ProgressRecord>, StorageError>;

    /// Insert or overwrite a record. Concurrent writers race last-write-wins.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn put_progress(&self, record: &ProgressRecord) -> Result<(), StorageError>;

    /// Write `record` only if the stored record still has
    /// `expected_last_attempt_at` (`None` meaning "no record yet").
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if another writer got there first.
    async fn put_progress_if_current(
        &self,
        record: &ProgressRecord,
        expected_last_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError>;

    /// All records of a user, optionally restricted to some characters.
    /// Characters without a record are simply absent from the result.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn list_progress(
        &self,
        user_id: UserId,
        character_ids: Option<&[CharacterId]>,
    ) -> Result<Vec<ProgressRecord>, StorageError>;
}

/// Read access to the static character data.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be loaded.
    async fn character_catalog(
        &self,
        script: Option<ScriptKind>,
    ) -> Result<Vec<Character>, StorageError>;
}

/// Completed practice sessions.
#[async_trait]
pub trait SessionSummaryRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the session id was already stored.
    async fn save_summary(
        &self,
        user_id: UserId,
        summary: &SessionSummary,
    ) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no such session exists.
    async fn get_summary(&self, session_id: SessionId) -> Result<SessionSummary, StorageError>;

    /// Most recently completed sessions first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn list_summaries(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<SessionSummary>, StorageError>;
}

//
// ─── STATIC CATALOG ────────────────────────────────────────────────────────────
//

/// Serves the compiled-in kana tables.
#[derive(Clone)]
pub struct StaticCatalog {
    catalog: Arc<CharacterCatalog>,
}

impl StaticCatalog {
    #[must_use]
    pub fn new(catalog: CharacterCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }

    #[must_use]
    pub fn builtin() -> Self {
        Self::new(CharacterCatalog::builtin())
    }
}

#[async_trait]
impl CatalogRepository for StaticCatalog {
    async fn character_catalog(
        &self,
        script: Option<ScriptKind>,
    ) -> Result<Vec<Character>, StorageError> {
        Ok(self.catalog.by_script(script).cloned().collect())
    }
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

/// Simple in-memory repository implementation for testing and prototyping.
///
/// `set_unavailable(true)` makes every call fail with
/// `StorageError::Connection`, which lets tests exercise outage handling.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    progress: Arc<Mutex<HashMap<(UserId, CharacterId), ProgressRecord>>>,
    summaries: Arc<Mutex<Vec<(UserId, SessionSummary)>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(
        &self,
        user_id: UserId,
        character_id: &CharacterId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        self.check_available()?;
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(user_id, character_id.clone())).cloned())
    }

    async fn put_progress(&self, record: &ProgressRecord) -> Result<(), StorageError> {
        self.check_available()?;
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(
            (record.user_id, record.character_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn put_progress_if_current(
        &self,
        record: &ProgressRecord,
        expected_last_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        self.check_available()?;
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let key = (record.user_id, record.character_id.clone());
        let stored = guard.get(&key).map(|r| r.last_attempt_at);
        if stored != expected_last_attempt_at {
            return Err(StorageError::Conflict);
        }
        guard.insert(key, record.clone());
        Ok(())
    }

    async fn list_progress(
        &self,
        user_id: UserId,
        character_ids: Option<&[CharacterId]>,
    ) -> Result<Vec<ProgressRecord>, StorageError> {
        self.check_available()?;
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut found: Vec<ProgressRecord> = match character_ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| guard.get(&(user_id, id.clone())).cloned())
                .collect(),
            None => guard
                .values()
                .filter(|r| r.user_id == user_id)
                .cloned()
                .collect(),
        };
        found.sort_by(|a, b| a.character_id.cmp(&b.character_id));
        found.dedup_by(|a, b| a.character_id == b.character_id);
        Ok(found)
    }
}

#[async_trait]
impl SessionSummaryRepository for InMemoryRepository {
    async fn save_summary(
        &self,
        user_id: UserId,
        summary: &SessionSummary,
    ) -> Result<(), StorageError> {
        self.check_available()?;
        let mut guard = self
            .summaries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if guard
            .iter()
            .any(|(_, s)| s.session_id() == summary.session_id())
        {
            return Err(StorageError::Conflict);
        }
        guard.push((user_id, summary.clone()));
        Ok(())
    }

    async fn get_summary(&self, session_id: SessionId) -> Result<SessionSummary, StorageError> {
        self.check_available()?;
        let guard = self
            .summaries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard
            .iter()
            .find(|(_, s)| s.session_id() == session_id)
            .map(|(_, s)| s.clone())
            .ok_or(StorageError::NotFound)
    }

    async fn list_summaries(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<SessionSummary>, StorageError> {
        self.check_available()?;
        let guard = self
            .summaries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut found: Vec<SessionSummary> = guard
            .iter()
            .filter(|(owner, _)| *owner == user_id)
            .map(|(_, s)| s.clone())
            .collect();
        found.sort_by(|a, b| b.completed_at().cmp(&a.completed_at()));
        found.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(found)
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub session_summaries: Arc<dyn SessionSummaryRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_in_memory(InMemoryRepository::new())
    }

    /// Wrap an existing in-memory repository, e.g. one a test keeps a handle to.
    #[must_use]
    pub fn from_in_memory(repo: InMemoryRepository) -> Self {
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let session_summaries: Arc<dyn SessionSummaryRepository> = Arc::new(repo);
        Self {
            progress,
            catalog: Arc::new(StaticCatalog::builtin()),
            session_summaries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use kana_core::model::{Attempt, MasteryStage};
    use kana_core::time::fixed_now;
    use kana_core::{ProficiencyEngine, SessionAggregator};

    fn first_record(user: UserId, character: &str) -> ProgressRecord {
        ProficiencyEngine::default().apply_attempt(
            user,
            &CharacterId::new(character),
            None,
            Attempt::correct(1_200.0),
            fixed_now(),
        )
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let repo = InMemoryRepository::new();
        let user = UserId::random();
        let record = first_record(user, "hiragana-a");

        repo.put_progress(&record).await.unwrap();
        let fetched = repo
            .get_progress(user, &record.character_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, record);
        assert_eq!(fetched.mastery_stage, MasteryStage::New);

        let other = repo
            .get_progress(UserId::random(), &record.character_id)
            .await
            .unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn put_overwrites_single_record_per_pair() {
        let repo = InMemoryRepository::new();
        let user = UserId::random();
        let mut record = first_record(user, "hiragana-a");
        repo.put_progress(&record).await.unwrap();
        record.proficiency = 42;
        repo.put_progress(&record).await.unwrap();

        let all = repo.list_progress(user, None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].proficiency, 42);
    }

    #[tokio::test]
    async fn list_filters_by_character_ids() {
        let repo = InMemoryRepository::new();
        let user = UserId::random();
        for c in ["hiragana-a", "hiragana-i", "hiragana-u"] {
            repo.put_progress(&first_record(user, c)).await.unwrap();
        }
        repo.put_progress(&first_record(UserId::random(), "hiragana-a"))
            .await
            .unwrap();

        let ids = [CharacterId::new("hiragana-u"), CharacterId::new("hiragana-ka")];
        let some = repo.list_progress(user, Some(&ids)).await.unwrap();
        assert_eq!(some.len(), 1);
        assert_eq!(some[0].character_id, CharacterId::new("hiragana-u"));

        assert_eq!(repo.list_progress(user, None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn conditional_put_detects_concurrent_writer() {
        let repo = InMemoryRepository::new();
        let user = UserId::random();
        let record = first_record(user, "hiragana-a");

        repo.put_progress_if_current(&record, None).await.unwrap();
        let err = repo.put_progress_if_current(&record, None).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));

        let mut newer = record.clone();
        newer.last_attempt_at = record.last_attempt_at + Duration::minutes(1);
        repo.put_progress_if_current(&newer, Some(record.last_attempt_at))
            .await
            .unwrap();
        let stale = repo
            .put_progress_if_current(&newer, Some(record.last_attempt_at))
            .await
            .unwrap_err();
        assert!(matches!(stale, StorageError::Conflict));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let repo = InMemoryRepository::new();
        repo.set_unavailable(true);
        let err = repo.list_progress(UserId::random(), None).await.unwrap_err();
        assert!(matches!(err, StorageError::Connection(_)));
        repo.set_unavailable(false);
        assert!(repo.list_progress(UserId::random(), None).await.is_ok());
    }

    #[tokio::test]
    async fn summaries_are_listed_newest_first() {
        let repo = InMemoryRepository::new();
        let user = UserId::random();
        for offset in [0, 2, 1] {
            let start = fixed_now() + Duration::hours(offset);
            let mut agg = SessionAggregator::new(SessionId::random(), start);
            let summary = agg.finish(start + Duration::minutes(5)).unwrap();
            repo.save_summary(user, &summary).await.unwrap();
        }

        let listed = repo.list_summaries(user, 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].completed_at() > listed[1].completed_at());

        let dup = repo.save_summary(user, &listed[0]).await.unwrap_err();
        assert!(matches!(dup, StorageError::Conflict));
    }

    #[tokio::test]
    async fn static_catalog_filters_script() {
        let catalog = StaticCatalog::builtin();
        let kata = catalog
            .character_catalog(Some(ScriptKind::Katakana))
            .await
            .unwrap();
        assert_eq!(kata.len(), 46);
        assert!(kata.iter().all(|c| c.script() == ScriptKind::Katakana));
    }
}
