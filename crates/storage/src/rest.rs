use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use kana_core::model::{
    CharacterId, CharacterResult, MasteryStage, ProgressRecord, SessionId, SessionSummary, UserId,
};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::repository::{
    ProgressRepository, SessionSummaryRepository, StaticCatalog, Storage, StorageError,
};

const PROGRESS_TABLE: &str = "character_progress";
const SESSIONS_TABLE: &str = "practice_sessions";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RestConfigError {
    #[error("base url is empty")]
    EmptyBaseUrl,

    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),

    #[error("api key is empty")]
    EmptyApiKey,

    #[error("api key contains characters not allowed in a header")]
    InvalidApiKey,

    #[error("http client error: {0}")]
    Client(String),
}

/// Connection settings for a PostgREST-style hosted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    pub base_url: String,
    pub api_key: String,
}

impl RestConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Endpoint URL for one table.
    ///
    /// # Errors
    ///
    /// Returns `RestConfigError` if the base URL is missing or not http(s).
    pub fn table_url(&self, table: &str) -> Result<Url, RestConfigError> {
        let base = self.base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(RestConfigError::EmptyBaseUrl);
        }
        let url = Url::parse(&format!("{base}/rest/v1/{table}"))
            .map_err(|e| RestConfigError::InvalidBaseUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RestConfigError::InvalidBaseUrl(self.base_url.clone()));
        }
        Ok(url)
    }
}

//
// ─── ROWS ──────────────────────────────────────────────────────────────────────
//

/// Wire shape of a `character_progress` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRow {
    pub user_id: UserId,
    pub character_id: CharacterId,
    pub proficiency: u8,
    pub mastery_stage: u8,
    pub consecutive_correct: u32,
    pub total_attempts: u32,
    pub mistake_count: u32,
    pub average_response_latency_ms: f64,
    pub last_attempt_at: DateTime<Utc>,
    pub review_due_at: DateTime<Utc>,
    pub last_mistake_at: Option<DateTime<Utc>>,
}

impl From<&ProgressRecord> for ProgressRow {
    fn from(r: &ProgressRecord) -> Self {
        Self {
            user_id: r.user_id,
            character_id: r.character_id.clone(),
            proficiency: r.proficiency,
            mastery_stage: r.mastery_stage.value(),
            consecutive_correct: r.consecutive_correct,
            total_attempts: r.total_attempts,
            mistake_count: r.mistake_count,
            average_response_latency_ms: r.average_response_latency_ms,
            last_attempt_at: r.last_attempt_at,
            review_due_at: r.review_due_at,
            last_mistake_at: r.last_mistake_at,
        }
    }
}

impl TryFrom<ProgressRow> for ProgressRecord {
    type Error = StorageError;

    fn try_from(row: ProgressRow) -> Result<Self, Self::Error> {
        let mastery_stage = MasteryStage::ALL
            .into_iter()
            .find(|s| s.value() == row.mastery_stage)
            .ok_or_else(|| {
                StorageError::Serialization(format!("invalid mastery_stage: {}", row.mastery_stage))
            })?;
        if row.proficiency > kana_core::model::MAX_PROFICIENCY {
            return Err(StorageError::Serialization(format!(
                "invalid proficiency: {}",
                row.proficiency
            )));
        }
        Ok(Self {
            user_id: row.user_id,
            character_id: row.character_id,
            proficiency: row.proficiency,
            mastery_stage,
            consecutive_correct: row.consecutive_correct,
            total_attempts: row.total_attempts,
            mistake_count: row.mistake_count,
            average_response_latency_ms: row.average_response_latency_ms,
            last_attempt_at: row.last_attempt_at,
            review_due_at: row.review_due_at,
            last_mistake_at: row.last_mistake_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterResultRow {
    pub character_id: CharacterId,
    pub attempts: u32,
    pub correct: u32,
    pub average_latency_ms: f64,
}

/// Wire shape of a `practice_sessions` row; per-character results travel as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_count: u32,
    pub correct_count: u32,
    pub longest_streak: u32,
    pub per_character_results: Vec<CharacterResultRow>,
}

impl SessionRow {
    #[must_use]
    pub fn from_summary(user_id: UserId, s: &SessionSummary) -> Self {
        Self {
            session_id: s.session_id(),
            user_id,
            started_at: s.started_at(),
            completed_at: s.completed_at(),
            total_count: s.total_count(),
            correct_count: s.correct_count(),
            longest_streak: s.longest_streak(),
            per_character_results: s
                .per_character_results()
                .iter()
                .map(|r| CharacterResultRow {
                    character_id: r.character_id.clone(),
                    attempts: r.attempts,
                    correct: r.correct,
                    average_latency_ms: r.average_latency_ms,
                })
                .collect(),
        }
    }

    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the row is inconsistent.
    pub fn into_summary(self) -> Result<SessionSummary, StorageError> {
        let results = self
            .per_character_results
            .into_iter()
            .map(|r| CharacterResult {
                character_id: r.character_id,
                attempts: r.attempts,
                correct: r.correct,
                average_latency_ms: r.average_latency_ms,
            })
            .collect();
        SessionSummary::from_persisted(
            self.session_id,
            self.started_at,
            self.completed_at,
            self.total_count,
            self.correct_count,
            self.longest_streak,
            results,
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

//
// ─── FILTERS ───────────────────────────────────────────────────────────────────
//

fn eq_filter(value: &str) -> String {
    format!("eq.{value}")
}

fn in_filter(ids: &[CharacterId]) -> String {
    let joined = ids
        .iter()
        .map(|id| format!("\"{}\"", id.as_str().replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({joined})")
}

fn timestamp_filter(at: DateTime<Utc>) -> String {
    eq_filter(&at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

//
// ─── REPOSITORY ────────────────────────────────────────────────────────────────
//

/// Progress and session storage on a hosted PostgREST endpoint.
#[derive(Clone)]
pub struct RestRepository {
    client: Client,
    progress_url: Url,
    sessions_url: Url,
}

impl RestRepository {
    /// # Errors
    ///
    /// Returns `RestConfigError` if the URL or key is unusable.
    pub fn new(config: &RestConfig) -> Result<Self, RestConfigError> {
        if config.api_key.trim().is_empty() {
            return Err(RestConfigError::EmptyApiKey);
        }
        let key = HeaderValue::from_str(config.api_key.trim())
            .map_err(|_| RestConfigError::InvalidApiKey)?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key.trim()))
            .map_err(|_| RestConfigError::InvalidApiKey)?;

        let mut headers = HeaderMap::new();
        headers.insert("apikey", key);
        headers.insert(reqwest::header::AUTHORIZATION, bearer);

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| RestConfigError::Client(e.to_string()))?;

        Ok(Self {
            client,
            progress_url: config.table_url(PROGRESS_TABLE)?,
            sessions_url: config.table_url(SESSIONS_TABLE)?,
        })
    }

    async fn send(request: RequestBuilder) -> Result<Response, StorageError> {
        let resp = request
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound),
            StatusCode::CONFLICT => Err(StorageError::Conflict),
            other => {
                tracing::warn!(status = %other, url = %resp.url(), "rest request failed");
                Err(StorageError::Connection(format!("unexpected status {other}")))
            }
        }
    }

    async fn fetch_rows<T: for<'de> Deserialize<'de>>(
        request: RequestBuilder,
    ) -> Result<Vec<T>, StorageError> {
        Self::send(request)
            .await?
            .json::<Vec<T>>()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl ProgressRepository for RestRepository {
    async fn get_progress(
        &self,
        user_id: UserId,
        character_id: &CharacterId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let request = self.client.get(self.progress_url.clone()).query(&[
            ("select", "*".to_owned()),
            ("user_id", eq_filter(&user_id.to_string())),
            ("character_id", eq_filter(character_id.as_str())),
        ]);
        let rows: Vec<ProgressRow> = Self::fetch_rows(request).await?;
        rows.into_iter().next().map(ProgressRecord::try_from).transpose()
    }

    async fn put_progress(&self, record: &ProgressRecord) -> Result<(), StorageError> {
        let request = self
            .client
            .post(self.progress_url.clone())
            .query(&[("on_conflict", "user_id,character_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[ProgressRow::from(record)]);
        Self::send(request).await?;
        Ok(())
    }

    async fn put_progress_if_current(
        &self,
        record: &ProgressRecord,
        expected_last_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let request = match expected_last_attempt_at {
            None => self
                .client
                .post(self.progress_url.clone())
                .query(&[("on_conflict", "user_id,character_id")])
                .header("Prefer", "resolution=ignore-duplicates,return=representation")
                .json(&[ProgressRow::from(record)]),
            Some(expected) => self
                .client
                .patch(self.progress_url.clone())
                .query(&[
                    ("user_id", eq_filter(&record.user_id.to_string())),
                    ("character_id", eq_filter(record.character_id.as_str())),
                    ("last_attempt_at", timestamp_filter(expected)),
                ])
                .header("Prefer", "return=representation")
                .json(&ProgressRow::from(record)),
        };

        let written: Vec<ProgressRow> = Self::fetch_rows(request).await?;
        if written.is_empty() {
            return Err(StorageError::Conflict);
        }
        Ok(())
    }

    async fn list_progress(
        &self,
        user_id: UserId,
        character_ids: Option<&[CharacterId]>,
    ) -> Result<Vec<ProgressRecord>, StorageError> {
        let mut params = vec![
            ("select", "*".to_owned()),
            ("user_id", eq_filter(&user_id.to_string())),
            ("order", "character_id.asc".to_owned()),
        ];
        if let Some(ids) = character_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            params.push(("character_id", in_filter(ids)));
        }

        let request = self.client.get(self.progress_url.clone()).query(&params);
        let rows: Vec<ProgressRow> = Self::fetch_rows(request).await?;
        rows.into_iter().map(ProgressRecord::try_from).collect()
    }
}

#[async_trait]
impl SessionSummaryRepository for RestRepository {
    async fn save_summary(
        &self,
        user_id: UserId,
        summary: &SessionSummary,
    ) -> Result<(), StorageError> {
        let request = self
            .client
            .post(self.sessions_url.clone())
            .header("Prefer", "return=minimal")
            .json(&SessionRow::from_summary(user_id, summary));
        Self::send(request).await?;
        Ok(())
    }

    async fn get_summary(&self, session_id: SessionId) -> Result<SessionSummary, StorageError> {
        let request = self.client.get(self.sessions_url.clone()).query(&[
            ("select", "*".to_owned()),
            ("session_id", eq_filter(&session_id.to_string())),
        ]);
        let rows: Vec<SessionRow> = Self::fetch_rows(request).await?;
        rows.into_iter()
            .next()
            .ok_or(StorageError::NotFound)?
            .into_summary()
    }

    async fn list_summaries(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<SessionSummary>, StorageError> {
        let request = self.client.get(self.sessions_url.clone()).query(&[
            ("select", "*".to_owned()),
            ("user_id", eq_filter(&user_id.to_string())),
            ("order", "completed_at.desc".to_owned()),
            ("limit", limit.to_string()),
        ]);
        let rows: Vec<SessionRow> = Self::fetch_rows(request).await?;
        rows.into_iter().map(SessionRow::into_summary).collect()
    }
}

impl Storage {
    /// Build a `Storage` backed by a hosted REST endpoint, with the built-in catalog.
    ///
    /// # Errors
    ///
    /// Returns `RestConfigError` if the configuration is unusable.
    pub fn rest(config: &RestConfig) -> Result<Self, RestConfigError> {
        let repo = RestRepository::new(config)?;
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let session_summaries: Arc<dyn SessionSummaryRepository> = Arc::new(repo);
        Ok(Self {
            progress,
            catalog: Arc::new(StaticCatalog::builtin()),
            session_summaries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kana_core::model::Attempt;
    use kana_core::time::fixed_now;
    use kana_core::{ProficiencyEngine, SessionAggregator};
    use kana_core::model::AttemptOutcome;

    fn sample_record() -> ProgressRecord {
        let engine = ProficiencyEngine::default();
        let id = CharacterId::new("katakana-shi");
        let first = engine.apply_attempt(
            UserId::random(),
            &id,
            None,
            Attempt::incorrect(2_400.0),
            fixed_now(),
        );
        engine.apply_attempt(
            first.user_id,
            &id,
            Some(&first),
            Attempt::correct(1_100.0),
            fixed_now() + chrono::Duration::hours(3),
        )
    }

    #[test]
    fn table_url_joins_rest_prefix() {
        let config = RestConfig::new("https://example.supabase.co/", "anon");
        assert_eq!(
            config.table_url(PROGRESS_TABLE).unwrap().as_str(),
            "https://example.supabase.co/rest/v1/character_progress"
        );
    }

    #[test]
    fn bad_config_is_rejected() {
        assert_eq!(
            RestConfig::new("  ", "k").table_url(PROGRESS_TABLE).unwrap_err(),
            RestConfigError::EmptyBaseUrl
        );
        assert!(matches!(
            RestConfig::new("ftp://host", "k").table_url(PROGRESS_TABLE),
            Err(RestConfigError::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            RestRepository::new(&RestConfig::new("https://host", "")),
            Err(RestConfigError::EmptyApiKey)
        ));
    }

    #[test]
    fn progress_row_json_round_trips() {
        let record = sample_record();
        let json = serde_json::to_value(ProgressRow::from(&record)).unwrap();
        assert_eq!(json["character_id"], "katakana-shi");
        assert_eq!(json["mastery_stage"], 1);

        let row: ProgressRow = serde_json::from_value(json).unwrap();
        assert_eq!(ProgressRecord::try_from(row).unwrap(), record);
    }

    #[test]
    fn out_of_range_stage_is_a_serialization_error() {
        let mut row = ProgressRow::from(&sample_record());
        row.mastery_stage = 9;
        assert!(matches!(
            ProgressRecord::try_from(row),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn filters_use_postgrest_operators() {
        assert_eq!(eq_filter("abc"), "eq.abc");
        let ids = [CharacterId::new("hiragana-a"), CharacterId::new("hiragana-i")];
        assert_eq!(in_filter(&ids), "in.(\"hiragana-a\",\"hiragana-i\")");
        assert_eq!(
            timestamp_filter(fixed_now()),
            "eq.2024-03-01T09:00:00.000000Z"
        );
    }

    #[test]
    fn session_row_keeps_per_character_results() {
        let started = fixed_now();
        let mut agg = SessionAggregator::new(SessionId::random(), started);
        agg.record_attempt(AttemptOutcome::new(
            CharacterId::new("hiragana-a"),
            Attempt::correct(900.0),
            started,
        ))
        .unwrap();
        let summary = agg.finish(started + chrono::Duration::seconds(30)).unwrap();

        let row = SessionRow::from_summary(UserId::random(), &summary);
        let json = serde_json::to_string(&row).unwrap();
        let back: SessionRow = serde_json::from_str(&json).unwrap();
        assert_eq!(back.into_summary().unwrap(), summary);
    }
}
