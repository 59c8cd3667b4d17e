use chrono::Duration;
use kana_core::model::{
    Attempt, AttemptOutcome, CharacterId, MasteryStage, ProgressRecord, SessionId, UserId,
};
use kana_core::time::fixed_now;
use kana_core::{ProficiencyEngine, SessionAggregator};
use storage::repository::{
    ProgressRepository, SessionSummaryRepository, Storage, StorageError,
};
use storage::sqlite::SqliteRepository;

async fn repo(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn practiced(user: UserId, character: &str, answers: &[bool]) -> ProgressRecord {
    let engine = ProficiencyEngine::default();
    let id = CharacterId::new(character);
    let mut record: Option<ProgressRecord> = None;
    let mut at = fixed_now();
    for &correct in answers {
        let attempt = Attempt {
            correct,
            latency_ms: 1_500.0,
        };
        record = Some(engine.apply_attempt(user, &id, record.as_ref(), attempt, at));
        at += Duration::days(3);
    }
    record.expect("at least one answer")
}

#[tokio::test]
async fn sqlite_progress_round_trips_every_field() {
    let repo = repo("memdb_progress_roundtrip").await;
    let user = UserId::random();
    let record = practiced(user, "hiragana-ka", &[false, true, true]);
    assert!(record.last_mistake_at.is_some());

    repo.put_progress(&record).await.unwrap();
    let fetched = repo
        .get_progress(user, &record.character_id)
        .await
        .unwrap()
        .expect("stored");
    assert_eq!(fetched, record);

    let missing = repo
        .get_progress(user, &CharacterId::new("hiragana-ki"))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn sqlite_upsert_keeps_one_row_per_pair() {
    let repo = repo("memdb_progress_upsert").await;
    let user = UserId::random();
    let first = practiced(user, "katakana-a", &[true]);
    let later = practiced(user, "katakana-a", &[true, true]);

    repo.put_progress(&first).await.unwrap();
    repo.put_progress(&later).await.unwrap();

    let all = repo.list_progress(user, None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].total_attempts, 2);
    assert_eq!(all[0].mastery_stage, MasteryStage::Learning);
}

#[tokio::test]
async fn sqlite_list_filters_user_and_characters() {
    let repo = repo("memdb_progress_list").await;
    let user = UserId::random();
    let other = UserId::random();
    for c in ["hiragana-a", "hiragana-i", "hiragana-u"] {
        repo.put_progress(&practiced(user, c, &[true])).await.unwrap();
    }
    repo.put_progress(&practiced(other, "hiragana-a", &[false]))
        .await
        .unwrap();

    let ids = [CharacterId::new("hiragana-u"), CharacterId::new("hiragana-a")];
    let some = repo.list_progress(user, Some(&ids)).await.unwrap();
    let got: Vec<&str> = some.iter().map(|r| r.character_id.as_str()).collect();
    assert_eq!(got, vec!["hiragana-a", "hiragana-u"]);
    assert!(some.iter().all(|r| r.user_id == user));

    assert!(repo.list_progress(user, Some(&[])).await.unwrap().is_empty());
    assert_eq!(repo.list_progress(other, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sqlite_conditional_put_rejects_stale_writer() {
    let repo = repo("memdb_progress_conditional").await;
    let user = UserId::random();
    let first = practiced(user, "hiragana-n", &[true]);
    let second = practiced(user, "hiragana-n", &[true, false]);

    repo.put_progress_if_current(&first, None).await.unwrap();
    let dup = repo.put_progress_if_current(&first, None).await.unwrap_err();
    assert!(matches!(dup, StorageError::Conflict));

    let stored = repo
        .get_progress(user, &first.character_id)
        .await
        .unwrap()
        .unwrap();
    repo.put_progress_if_current(&second, Some(stored.last_attempt_at))
        .await
        .unwrap();

    let stale = repo
        .put_progress_if_current(&second, Some(first.last_attempt_at - Duration::hours(1)))
        .await
        .unwrap_err();
    assert!(matches!(stale, StorageError::Conflict));

    let now_stored = repo
        .get_progress(user, &first.character_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(now_stored.total_attempts, 2);
}

#[tokio::test]
async fn sqlite_summaries_persist_with_character_results() {
    let storage = Storage::sqlite("sqlite:file:memdb_summaries?mode=memory&cache=shared")
        .await
        .expect("storage");
    let user = UserId::random();

    let mut ids = Vec::new();
    for day in 0..3 {
        let started = fixed_now() + Duration::days(day);
        let mut agg = SessionAggregator::new(SessionId::random(), started);
        for (c, correct) in [("hiragana-a", true), ("hiragana-i", false), ("hiragana-a", true)] {
            let attempt = Attempt {
                correct,
                latency_ms: 1_000.0,
            };
            agg.record_attempt(AttemptOutcome::new(CharacterId::new(c), attempt, started))
                .unwrap();
        }
        let summary = agg.finish(started + Duration::minutes(2)).unwrap();
        storage
            .session_summaries
            .save_summary(user, &summary)
            .await
            .unwrap();
        ids.push(summary);
    }

    let fetched = storage
        .session_summaries
        .get_summary(ids[0].session_id())
        .await
        .unwrap();
    assert_eq!(fetched, ids[0]);
    assert_eq!(fetched.per_character_results().len(), 2);
    assert_eq!(
        fetched.per_character_results()[0].character_id,
        CharacterId::new("hiragana-a")
    );

    let latest = storage
        .session_summaries
        .list_summaries(user, 2)
        .await
        .unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].session_id(), ids[2].session_id());

    let dup = storage
        .session_summaries
        .save_summary(user, &ids[1])
        .await
        .unwrap_err();
    assert!(matches!(dup, StorageError::Conflict));

    let missing = storage
        .session_summaries
        .get_summary(SessionId::random())
        .await
        .unwrap_err();
    assert!(matches!(missing, StorageError::NotFound));
}

#[tokio::test]
async fn sqlite_migrate_is_idempotent() {
    let repo = repo("memdb_migrate_twice").await;
    repo.migrate().await.expect("second migrate");
    let user = UserId::random();
    repo.put_progress(&practiced(user, "hiragana-e", &[true]))
        .await
        .unwrap();
    assert_eq!(repo.list_progress(user, None).await.unwrap().len(), 1);
}
