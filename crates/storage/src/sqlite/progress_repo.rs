use chrono::{DateTime, Utc};
use kana_core::model::{CharacterId, ProgressRecord, UserId};
use sqlx::Sqlite;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;

use super::SqliteRepository;
use super::mapping::{conn, map_progress_row};
use crate::repository::{ProgressRepository, StorageError};

const COLUMNS: &str = r"
    user_id, character_id, proficiency, mastery_stage, consecutive_correct,
    total_attempts, mistake_count, average_response_latency_ms,
    last_attempt_at, review_due_at, last_mistake_at
";

const INSERT: &str = r"
    INSERT INTO character_progress (
        user_id, character_id, proficiency, mastery_stage, consecutive_correct,
        total_attempts, mistake_count, average_response_latency_ms,
        last_attempt_at, review_due_at, last_mistake_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
";

/// Binds the eleven record columns as `?1..=?11`, in `COLUMNS` order.
fn bind_record<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    record: &ProgressRecord,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(record.user_id.to_string())
        .bind(record.character_id.as_str().to_owned())
        .bind(i64::from(record.proficiency))
        .bind(i64::from(record.mastery_stage.value()))
        .bind(i64::from(record.consecutive_correct))
        .bind(i64::from(record.total_attempts))
        .bind(i64::from(record.mistake_count))
        .bind(record.average_response_latency_ms)
        .bind(record.last_attempt_at)
        .bind(record.review_due_at)
        .bind(record.last_mistake_at)
}

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(
        &self,
        user_id: UserId,
        character_id: &CharacterId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM character_progress WHERE user_id = ?1 AND character_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(user_id.to_string())
            .bind(character_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(map_progress_row).transpose()
    }

    async fn put_progress(&self, record: &ProgressRecord) -> Result<(), StorageError> {
        let sql = format!(
            r"{INSERT}
            ON CONFLICT(user_id, character_id) DO UPDATE SET
                proficiency = excluded.proficiency,
                mastery_stage = excluded.mastery_stage,
                consecutive_correct = excluded.consecutive_correct,
                total_attempts = excluded.total_attempts,
                mistake_count = excluded.mistake_count,
                average_response_latency_ms = excluded.average_response_latency_ms,
                last_attempt_at = excluded.last_attempt_at,
                review_due_at = excluded.review_due_at,
                last_mistake_at = excluded.last_mistake_at
            "
        );
        bind_record(sqlx::query(&sql), record)
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }

    async fn put_progress_if_current(
        &self,
        record: &ProgressRecord,
        expected_last_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let res = match expected_last_attempt_at {
            None => {
                let sql = format!("{INSERT} ON CONFLICT(user_id, character_id) DO NOTHING");
                bind_record(sqlx::query(&sql), record)
                    .execute(&self.pool)
                    .await
                    .map_err(conn)?
            }
            Some(expected) => {
                let sql = r"
                    UPDATE character_progress SET
                        proficiency = ?3,
                        mastery_stage = ?4,
                        consecutive_correct = ?5,
                        total_attempts = ?6,
                        mistake_count = ?7,
                        average_response_latency_ms = ?8,
                        last_attempt_at = ?9,
                        review_due_at = ?10,
                        last_mistake_at = ?11
                    WHERE user_id = ?1 AND character_id = ?2 AND last_attempt_at = ?12
                ";
                bind_record(sqlx::query(sql), record)
                    .bind(expected)
                    .execute(&self.pool)
                    .await
                    .map_err(conn)?
            }
        };

        if res.rows_affected() == 0 {
            tracing::debug!(
                user = %record.user_id,
                character = %record.character_id,
                "conditional progress write lost the race"
            );
            return Err(StorageError::Conflict);
        }
        Ok(())
    }

    async fn list_progress(
        &self,
        user_id: UserId,
        character_ids: Option<&[CharacterId]>,
    ) -> Result<Vec<ProgressRecord>, StorageError> {
        let mut sql = format!("SELECT {COLUMNS} FROM character_progress WHERE user_id = ?1");
        if let Some(ids) = character_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(" AND character_id IN (");
            for i in 0..ids.len() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push('?');
                sql.push_str(&(i + 2).to_string());
            }
            sql.push(')');
        }
        sql.push_str(" ORDER BY character_id ASC");

        let mut query = sqlx::query(&sql).bind(user_id.to_string());
        for id in character_ids.unwrap_or_default() {
            query = query.bind(id.as_str().to_owned());
        }

        let rows = query.fetch_all(&self.pool).await.map_err(conn)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_progress_row(&row)?);
        }
        Ok(out)
    }
}
