//! Shared error types for the services crate.

use std::path::PathBuf;

use thiserror::Error;

use kana_core::PreconditionViolation;
use kana_core::model::CharacterId;
use kana_core::settings::SettingsError;
use storage::repository::StorageError;
use storage::rest::RestConfigError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `ProgressService`.
///
/// Plain store outages are not errors here; they are absorbed into pending writes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("progress for {character_id} kept changing; gave up after {attempts} tries")]
    ConflictRetriesExhausted {
        character_id: CharacterId,
        attempts: u32,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by the practice loop.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PracticeError {
    #[error("no character is waiting for an answer")]
    NoCurrentCharacter,
    #[error("character {0} is not part of this session")]
    UnknownCharacter(CharacterId),
    #[error("session summary has not been built yet")]
    NotFinished,
    #[error(transparent)]
    Precondition(#[from] PreconditionViolation),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while loading configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {raw}")]
    InvalidValue { key: &'static str, raw: String },
    #[error("rest backend needs both a url and an api key")]
    IncompleteRest,
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Rest(#[from] RestConfigError),
}
