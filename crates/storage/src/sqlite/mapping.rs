use std::str::FromStr;

use kana_core::model::{
    CharacterId, CharacterResult, MasteryStage, ProgressRecord, SessionId, UserId,
};
use sqlx::Row;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn stage_from_i64(v: i64) -> Result<MasteryStage, StorageError> {
    MasteryStage::ALL
        .into_iter()
        .find(|s| i64::from(s.value()) == v)
        .ok_or_else(|| StorageError::Serialization(format!("invalid mastery_stage: {v}")))
}

pub(crate) fn user_id_from_str(v: &str) -> Result<UserId, StorageError> {
    UserId::from_str(v).map_err(ser)
}

pub(crate) fn session_id_from_str(v: &str) -> Result<SessionId, StorageError> {
    SessionId::from_str(v).map_err(ser)
}

pub(crate) fn map_progress_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ProgressRecord, StorageError> {
    let proficiency_i64: i64 = row.try_get("proficiency").map_err(ser)?;
    let proficiency = u8::try_from(proficiency_i64).map_err(|_| {
        StorageError::Serialization(format!("invalid proficiency: {proficiency_i64}"))
    })?;

    Ok(ProgressRecord {
        user_id: user_id_from_str(&row.try_get::<String, _>("user_id").map_err(ser)?)?,
        character_id: CharacterId::new(row.try_get::<String, _>("character_id").map_err(ser)?),
        proficiency,
        mastery_stage: stage_from_i64(row.try_get::<i64, _>("mastery_stage").map_err(ser)?)?,
        consecutive_correct: u32_from_i64(
            "consecutive_correct",
            row.try_get::<i64, _>("consecutive_correct").map_err(ser)?,
        )?,
        total_attempts: u32_from_i64(
            "total_attempts",
            row.try_get::<i64, _>("total_attempts").map_err(ser)?,
        )?,
        mistake_count: u32_from_i64(
            "mistake_count",
            row.try_get::<i64, _>("mistake_count").map_err(ser)?,
        )?,
        average_response_latency_ms: row
            .try_get("average_response_latency_ms")
            .map_err(ser)?,
        last_attempt_at: row.try_get("last_attempt_at").map_err(ser)?,
        review_due_at: row.try_get("review_due_at").map_err(ser)?,
        last_mistake_at: row.try_get("last_mistake_at").map_err(ser)?,
    })
}

pub(crate) fn map_character_result_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<CharacterResult, StorageError> {
    Ok(CharacterResult {
        character_id: CharacterId::new(row.try_get::<String, _>("character_id").map_err(ser)?),
        attempts: u32_from_i64("attempts", row.try_get::<i64, _>("attempts").map_err(ser)?)?,
        correct: u32_from_i64("correct", row.try_get::<i64, _>("correct").map_err(ser)?)?,
        average_latency_ms: row.try_get("average_latency_ms").map_err(ser)?,
    })
}
