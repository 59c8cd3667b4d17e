use kana_core::model::{SessionId, SessionSummary, UserId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, map_character_result_row, ser, session_id_from_str, u32_from_i64};
use crate::repository::{SessionSummaryRepository, StorageError};

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl SqliteRepository {
    async fn load_summary(
        &self,
        row: &sqlx::sqlite::SqliteRow,
    ) -> Result<SessionSummary, StorageError> {
        let session_id_str: String = row.try_get("session_id").map_err(ser)?;
        let session_id = session_id_from_str(&session_id_str)?;

        let result_rows = sqlx::query(
            r"
                SELECT character_id, attempts, correct, average_latency_ms
                FROM session_character_results
                WHERE session_id = ?1
                ORDER BY position ASC
            ",
        )
        .bind(&session_id_str)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut per_character = Vec::with_capacity(result_rows.len());
        for r in &result_rows {
            per_character.push(map_character_result_row(r)?);
        }

        SessionSummary::from_persisted(
            session_id,
            row.try_get("started_at").map_err(ser)?,
            row.try_get("completed_at").map_err(ser)?,
            u32_from_i64("total_count", row.try_get::<i64, _>("total_count").map_err(ser)?)?,
            u32_from_i64(
                "correct_count",
                row.try_get::<i64, _>("correct_count").map_err(ser)?,
            )?,
            u32_from_i64(
                "longest_streak",
                row.try_get::<i64, _>("longest_streak").map_err(ser)?,
            )?,
            per_character,
        )
        .map_err(ser)
    }
}

#[async_trait::async_trait]
impl SessionSummaryRepository for SqliteRepository {
    async fn save_summary(
        &self,
        user_id: UserId,
        summary: &SessionSummary,
    ) -> Result<(), StorageError> {
        let session_id = summary.session_id().to_string();
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
                INSERT INTO practice_sessions (
                    session_id, user_id, started_at, completed_at,
                    total_count, correct_count, longest_streak
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(&session_id)
        .bind(user_id.to_string())
        .bind(summary.started_at())
        .bind(summary.completed_at())
        .bind(i64::from(summary.total_count()))
        .bind(i64::from(summary.correct_count()))
        .bind(i64::from(summary.longest_streak()))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::Conflict
            } else {
                conn(e)
            }
        })?;

        for (position, result) in summary.per_character_results().iter().enumerate() {
            let position = i64::try_from(position)
                .map_err(|_| StorageError::Serialization("position overflow".into()))?;
            sqlx::query(
                r"
                    INSERT INTO session_character_results (
                        session_id, position, character_id,
                        attempts, correct, average_latency_ms
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )
            .bind(&session_id)
            .bind(position)
            .bind(result.character_id.as_str())
            .bind(i64::from(result.attempts))
            .bind(i64::from(result.correct))
            .bind(result.average_latency_ms)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn get_summary(&self, session_id: SessionId) -> Result<SessionSummary, StorageError> {
        let row = sqlx::query(
            r"
                SELECT
                    session_id, started_at, completed_at,
                    total_count, correct_count, longest_streak
                FROM practice_sessions
                WHERE session_id = ?1
            ",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;

        self.load_summary(&row).await
    }

    async fn list_summaries(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<SessionSummary>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT
                    session_id, started_at, completed_at,
                    total_count, correct_count, longest_streak
                FROM practice_sessions
                WHERE user_id = ?1
                ORDER BY completed_at DESC, session_id DESC
                LIMIT ?2
            ",
        )
        .bind(user_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(self.load_summary(row).await?);
        }
        Ok(out)
    }
}
