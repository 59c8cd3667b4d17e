use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kana_core::ProficiencyEngine;
use kana_core::model::{Attempt, CharacterId, ProgressRecord, UserId};
use storage::repository::{ProgressRepository, StorageError};

use crate::error::ProgressError;

const DEFAULT_MAX_RETRIES: u32 = 3;

//
// ─── PENDING WRITES ────────────────────────────────────────────────────────────
//

/// A deferred record together with what it was computed from.
#[derive(Debug, Clone)]
struct PendingEntry {
    record: ProgressRecord,
    /// `last_attempt_at` of the record the attempts were applied to; `None`
    /// when they were applied to no record at all.
    base: Option<DateTime<Utc>>,
    /// Attempts folded into `record` since `base`, oldest first.
    attempts: Vec<(Attempt, DateTime<Utc>)>,
}

/// Records computed while the store was unreachable.
///
/// Only the latest record per character is kept, along with the attempts it
/// folds in. A record is only written over the stored one it was computed
/// from; if the store moved on in the meantime the attempts are replayed on
/// top of what it holds now.
#[derive(Debug, Clone, Default)]
pub struct PendingWrites {
    entries: HashMap<CharacterId, PendingEntry>,
    flushed: Vec<ProgressRecord>,
}

impl PendingWrites {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, character_id: &CharacterId) -> Option<&ProgressRecord> {
        self.entries.get(character_id).map(|e| &e.record)
    }

    #[must_use]
    pub fn contains(&self, character_id: &CharacterId) -> bool {
        self.entries.contains_key(character_id)
    }

    /// Records written since the last call, as they now stand in the store.
    pub fn take_flushed(&mut self) -> Vec<ProgressRecord> {
        std::mem::take(&mut self.flushed)
    }
}

/// Outcome of applying one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedAttempt {
    pub record: ProgressRecord,
    /// `false` when the record is waiting in `PendingWrites`.
    pub persisted: bool,
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Read-compute-write around `ProficiencyEngine`.
///
/// Store outages never fail an attempt: the computed record is parked in the
/// caller's `PendingWrites` and flushed on the next successful write. With
/// optimistic concurrency enabled, a record that changed underneath us is
/// re-read and the attempt re-applied, up to `max_retries` times.
#[derive(Clone)]
pub struct ProgressService {
    engine: ProficiencyEngine,
    progress: Arc<dyn ProgressRepository>,
    optimistic: bool,
    max_retries: u32,
}

impl ProgressService {
    #[must_use]
    pub fn new(engine: ProficiencyEngine, progress: Arc<dyn ProgressRepository>) -> Self {
        Self {
            engine,
            progress,
            optimistic: false,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    #[must_use]
    pub fn with_optimistic_concurrency(mut self, enabled: bool) -> Self {
        self.optimistic = enabled;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    #[must_use]
    pub fn engine(&self) -> &ProficiencyEngine {
        &self.engine
    }

    /// Load every record of a user for the given characters.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    pub async fn load_progress(
        &self,
        user_id: UserId,
        character_ids: &[CharacterId],
    ) -> Result<HashMap<CharacterId, ProgressRecord>, StorageError> {
        let records = self
            .progress
            .list_progress(user_id, Some(character_ids))
            .await?;
        Ok(records
            .into_iter()
            .map(|r| (r.character_id.clone(), r))
            .collect())
    }

    /// Fold one attempt into the character's record and persist it.
    ///
    /// `known` is the caller's last view of the record. It is used only when
    /// the store cannot be read, and the result is then written only over
    /// that same stored version.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::ConflictRetriesExhausted` if optimistic writes
    /// keep losing. Store outages are not errors.
    pub async fn apply_attempt(
        &self,
        user_id: UserId,
        character_id: &CharacterId,
        attempt: Attempt,
        now: DateTime<Utc>,
        known: Option<&ProgressRecord>,
        pending: &mut PendingWrites,
    ) -> Result<AppliedAttempt, ProgressError> {
        // A pending record is newer than anything the store holds.
        if let Some(mut entry) = pending.entries.remove(character_id) {
            entry.record = self.engine.apply_attempt(
                user_id,
                character_id,
                Some(&entry.record),
                attempt,
                now,
            );
            entry.attempts.push((attempt, now));
            return Ok(self.write_entry(entry, pending).await);
        }

        let mut tries = 0;
        loop {
            tries += 1;
            let stored = match self.progress.get_progress(user_id, character_id).await {
                Ok(stored) => stored,
                Err(err) => {
                    tracing::warn!(
                        user = %user_id,
                        character = %character_id,
                        error = %err,
                        "progress read failed; using last known record"
                    );
                    let entry = PendingEntry {
                        record: self
                            .engine
                            .apply_attempt(user_id, character_id, known, attempt, now),
                        base: known.map(|r| r.last_attempt_at),
                        attempts: vec![(attempt, now)],
                    };
                    return Ok(self.write_entry(entry, pending).await);
                }
            };

            let record =
                self.engine
                    .apply_attempt(user_id, character_id, stored.as_ref(), attempt, now);
            let base = stored.as_ref().map(|r| r.last_attempt_at);

            let written = if self.optimistic {
                self.progress.put_progress_if_current(&record, base).await
            } else {
                self.progress.put_progress(&record).await
            };
            match written {
                Ok(()) => {
                    self.flush_quietly(pending).await;
                    return Ok(AppliedAttempt {
                        record,
                        persisted: true,
                    });
                }
                Err(StorageError::Conflict) if tries < self.max_retries => {
                    tracing::warn!(
                        user = %user_id,
                        character = %character_id,
                        attempt = tries,
                        "progress changed concurrently; retrying"
                    );
                }
                Err(StorageError::Conflict) => {
                    return Err(ProgressError::ConflictRetriesExhausted {
                        character_id: character_id.clone(),
                        attempts: tries,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        user = %user_id,
                        character = %character_id,
                        error = %err,
                        "progress write failed; deferring"
                    );
                    pending.entries.insert(
                        character_id.clone(),
                        PendingEntry {
                            record: record.clone(),
                            base,
                            attempts: vec![(attempt, now)],
                        },
                    );
                    return Ok(AppliedAttempt {
                        record,
                        persisted: false,
                    });
                }
            }
        }
    }

    /// Write every pending record, stopping at the first failure.
    ///
    /// Each record replaces only the stored version it was computed from.
    /// When the store holds something else, its attempts are replayed on top
    /// of the stored record instead.
    ///
    /// # Errors
    ///
    /// Returns the `StorageError` that stopped the flush; records not yet
    /// written stay pending.
    pub async fn flush_pending(&self, pending: &mut PendingWrites) -> Result<(), StorageError> {
        let mut ids: Vec<CharacterId> = pending.entries.keys().cloned().collect();
        ids.sort();
        for id in ids {
            let Some(entry) = pending.entries.get_mut(&id) else {
                continue;
            };
            self.store_entry(entry).await?;
            if let Some(entry) = pending.entries.remove(&id) {
                pending.flushed.push(entry.record);
            }
            tracing::info!(character = %id, "flushed deferred progress write");
        }
        Ok(())
    }

    async fn flush_quietly(&self, pending: &mut PendingWrites) {
        if let Err(err) = self.flush_pending(pending).await {
            tracing::warn!(error = %err, remaining = pending.len(), "flush stopped early");
        }
    }

    /// Store an entry now or park it in `pending`.
    async fn write_entry(
        &self,
        mut entry: PendingEntry,
        pending: &mut PendingWrites,
    ) -> AppliedAttempt {
        match self.store_entry(&mut entry).await {
            Ok(()) => {
                self.flush_quietly(pending).await;
                AppliedAttempt {
                    record: entry.record,
                    persisted: true,
                }
            }
            Err(err) => {
                tracing::warn!(
                    user = %entry.record.user_id,
                    character = %entry.record.character_id,
                    error = %err,
                    "progress write failed; deferring"
                );
                let record = entry.record.clone();
                pending
                    .entries
                    .insert(record.character_id.clone(), entry);
                AppliedAttempt {
                    record,
                    persisted: false,
                }
            }
        }
    }

    /// Conditional write of `entry`, rebasing it on the stored record after
    /// each conflict. On success `entry.record` is what the store now holds.
    async fn store_entry(&self, entry: &mut PendingEntry) -> Result<(), StorageError> {
        let mut tries = 0;
        loop {
            tries += 1;
            match self
                .progress
                .put_progress_if_current(&entry.record, entry.base)
                .await
            {
                Err(StorageError::Conflict) if tries <= self.max_retries => {}
                other => return other,
            }

            let user_id = entry.record.user_id;
            let character_id = entry.record.character_id.clone();
            let stored = self.progress.get_progress(user_id, &character_id).await?;
            tracing::warn!(
                user = %user_id,
                character = %character_id,
                replayed = entry.attempts.len(),
                "stored progress moved on; replaying deferred attempts"
            );
            let mut record = stored.clone();
            for (attempt, at) in &entry.attempts {
                record = Some(self.engine.apply_attempt(
                    user_id,
                    &character_id,
                    record.as_ref(),
                    *attempt,
                    *at,
                ));
            }
            if let Some(record) = record {
                entry.record = record;
            }
            entry.base = stored.map(|r| r.last_attempt_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use kana_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    fn service(repo: &InMemoryRepository) -> ProgressService {
        ProgressService::new(ProficiencyEngine::default(), Arc::new(repo.clone()))
    }

    #[tokio::test]
    async fn first_attempt_creates_record() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let user = UserId::random();
        let id = CharacterId::new("hiragana-a");
        let mut pending = PendingWrites::default();

        let applied = svc
            .apply_attempt(user, &id, Attempt::correct(1_000.0), fixed_now(), None, &mut pending)
            .await
            .unwrap();
        assert!(applied.persisted);
        assert_eq!(applied.record.proficiency, 15);
        assert_eq!(repo.get_progress(user, &id).await.unwrap(), Some(applied.record));
    }

    #[tokio::test]
    async fn outage_defers_latest_record_and_flushes_later() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let user = UserId::random();
        let a = CharacterId::new("hiragana-a");
        let i = CharacterId::new("hiragana-i");
        let mut pending = PendingWrites::default();
        let now = fixed_now();

        let first = svc
            .apply_attempt(user, &a, Attempt::correct(900.0), now, None, &mut pending)
            .await
            .unwrap();

        repo.set_unavailable(true);
        let second = svc
            .apply_attempt(
                user,
                &a,
                Attempt::incorrect(900.0),
                now + Duration::hours(3),
                Some(&first.record),
                &mut pending,
            )
            .await
            .unwrap();
        assert!(!second.persisted);
        assert_eq!(second.record.total_attempts, 2);

        let third = svc
            .apply_attempt(
                user,
                &a,
                Attempt::correct(900.0),
                now + Duration::hours(4),
                Some(&second.record),
                &mut pending,
            )
            .await
            .unwrap();
        assert_eq!(third.record.total_attempts, 3);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.get(&a), Some(&third.record));

        repo.set_unavailable(false);
        let other = svc
            .apply_attempt(user, &i, Attempt::correct(900.0), now, None, &mut pending)
            .await
            .unwrap();
        assert!(other.persisted);
        assert!(pending.is_empty());

        let stored = repo.get_progress(user, &a).await.unwrap().unwrap();
        assert_eq!(stored, third.record);
    }

    #[tokio::test]
    async fn optimistic_write_retries_on_conflict() {
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicU32, Ordering};

        /// Fails the first `conflicts` conditional writes.
        struct Contended {
            inner: InMemoryRepository,
            conflicts: AtomicU32,
        }

        #[async_trait]
        impl ProgressRepository for Contended {
            async fn get_progress(
                &self,
                user_id: UserId,
                character_id: &CharacterId,
            ) -> Result<Option<ProgressRecord>, StorageError> {
                self.inner.get_progress(user_id, character_id).await
            }

            async fn put_progress(&self, record: &ProgressRecord) -> Result<(), StorageError> {
                self.inner.put_progress(record).await
            }

            async fn put_progress_if_current(
                &self,
                record: &ProgressRecord,
                expected: Option<DateTime<Utc>>,
            ) -> Result<(), StorageError> {
                if self.conflicts.load(Ordering::SeqCst) > 0 {
                    self.conflicts.fetch_sub(1, Ordering::SeqCst);
                    return Err(StorageError::Conflict);
                }
                self.inner.put_progress_if_current(record, expected).await
            }

            async fn list_progress(
                &self,
                user_id: UserId,
                character_ids: Option<&[CharacterId]>,
            ) -> Result<Vec<ProgressRecord>, StorageError> {
                self.inner.list_progress(user_id, character_ids).await
            }
        }

        let user = UserId::random();
        let id = CharacterId::new("katakana-ka");
        let mut pending = PendingWrites::default();

        let repo = Arc::new(Contended {
            inner: InMemoryRepository::new(),
            conflicts: AtomicU32::new(2),
        });
        let svc = ProgressService::new(ProficiencyEngine::default(), repo.clone())
            .with_optimistic_concurrency(true);
        let applied = svc
            .apply_attempt(user, &id, Attempt::correct(800.0), fixed_now(), None, &mut pending)
            .await
            .unwrap();
        assert!(applied.persisted);

        repo.conflicts.store(5, Ordering::SeqCst);
        let err = svc
            .apply_attempt(user, &id, Attempt::correct(800.0), fixed_now(), None, &mut pending)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProgressError::ConflictRetriesExhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn optimistic_write_sees_concurrent_session() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo).with_optimistic_concurrency(true);
        let user = UserId::random();
        let id = CharacterId::new("hiragana-ka");
        let now = fixed_now();
        let mut pending = PendingWrites::default();

        svc.apply_attempt(user, &id, Attempt::correct(800.0), now, None, &mut pending)
            .await
            .unwrap();
        svc.apply_attempt(
            user,
            &id,
            Attempt::correct(800.0),
            now + Duration::hours(3),
            None,
            &mut pending,
        )
        .await
        .unwrap();

        let stored = repo.get_progress(user, &id).await.unwrap().unwrap();
        assert_eq!(stored.total_attempts, 2);
    }
}
