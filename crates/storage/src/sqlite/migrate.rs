use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the versioned migrations for the practice schema.
///
/// Version 1 creates character progress, practice sessions and their
/// per-character results.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS character_progress (
                    user_id TEXT NOT NULL,
                    character_id TEXT NOT NULL,
                    proficiency INTEGER NOT NULL CHECK (proficiency BETWEEN 0 AND 100),
                    mastery_stage INTEGER NOT NULL CHECK (mastery_stage BETWEEN 0 AND 5),
                    consecutive_correct INTEGER NOT NULL CHECK (consecutive_correct >= 0),
                    total_attempts INTEGER NOT NULL CHECK (total_attempts >= 0),
                    mistake_count INTEGER NOT NULL CHECK (mistake_count >= 0),
                    average_response_latency_ms REAL NOT NULL,
                    last_attempt_at TEXT NOT NULL,
                    review_due_at TEXT NOT NULL,
                    last_mistake_at TEXT,
                    PRIMARY KEY (user_id, character_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS practice_sessions (
                    session_id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    started_at TEXT NOT NULL,
                    completed_at TEXT NOT NULL,
                    total_count INTEGER NOT NULL CHECK (total_count >= 0),
                    correct_count INTEGER NOT NULL CHECK (correct_count >= 0),
                    longest_streak INTEGER NOT NULL CHECK (longest_streak >= 0)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS session_character_results (
                    session_id TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    character_id TEXT NOT NULL,
                    attempts INTEGER NOT NULL CHECK (attempts >= 0),
                    correct INTEGER NOT NULL CHECK (correct >= 0),
                    average_latency_ms REAL NOT NULL,
                    PRIMARY KEY (session_id, character_id),
                    FOREIGN KEY (session_id) REFERENCES practice_sessions(session_id)
                        ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_character_progress_user_due
                    ON character_progress (user_id, review_due_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_practice_sessions_user_completed
                    ON practice_sessions (user_id, completed_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(version = 1, "applied sqlite migration");
    }

    Ok(())
}
