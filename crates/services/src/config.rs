//! Application configuration.
//!
//! Values are resolved with priority: TOML file > environment (`.env`
//! included) > defaults. The backend is taken whole from the first layer
//! that names one, so a file `database_url` beats `KANA_REST_*`. The file is `$KANA_CONFIG` when set, otherwise
//! `kana.toml` in the working directory; a missing file is not an error.

use std::path::{Path, PathBuf};

use kana_core::SchedulerSettings;
use serde::Deserialize;
use storage::rest::RestConfig;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "kana.toml";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:kana.sqlite3";

pub const ENV_CONFIG_PATH: &str = "KANA_CONFIG";
pub const ENV_DATABASE_URL: &str = "KANA_DB_URL";
pub const ENV_REST_URL: &str = "KANA_REST_URL";
pub const ENV_REST_KEY: &str = "KANA_REST_KEY";
pub const ENV_AVOID_REPEAT: &str = "KANA_AVOID_REPEAT";
pub const ENV_OPTIMISTIC: &str = "KANA_OPTIMISTIC_WRITES";

/// Shape of the TOML file; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    database_url: Option<String>,
    rest: Option<RestSection>,
    practice: Option<PracticeSection>,
    scheduler: Option<SchedulerSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RestSection {
    url: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PracticeSection {
    avoid_immediate_repeat: Option<bool>,
    optimistic_concurrency: Option<bool>,
}

/// Where progress and sessions are stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    Sqlite { database_url: String },
    Rest(RestConfig),
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub backend: Backend,
    pub avoid_immediate_repeat: bool,
    pub optimistic_concurrency: bool,
    pub scheduler: SchedulerSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Sqlite {
                database_url: DEFAULT_DATABASE_URL.to_owned(),
            },
            avoid_immediate_repeat: false,
            optimistic_concurrency: false,
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load from the process environment and the config file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read or parsed,
    /// or if any resolved value is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                tracing::warn!(error = %err, "ignoring unreadable .env file");
            }
        }

        let path = std::env::var(ENV_CONFIG_PATH)
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
        let contents = read_optional(&path)?;
        Self::from_sources(contents.as_deref(), &path, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from file contents and an environment lookup.
    ///
    /// `path` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for unparsable files or invalid values.
    pub fn from_sources<F>(
        file_contents: Option<&str>,
        path: &Path,
        env: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match file_contents {
            Some(contents) => toml::from_str::<FileConfig>(contents).map_err(|source| {
                ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                }
            })?,
            None => FileConfig::default(),
        };
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let backend = resolve_backend(file.rest, file.database_url, &env)?;

        let practice = file.practice.unwrap_or_default();
        let avoid_immediate_repeat = match practice.avoid_immediate_repeat {
            Some(v) => v,
            None => env_flag(&env, ENV_AVOID_REPEAT)?.unwrap_or(false),
        };
        let optimistic_concurrency = match practice.optimistic_concurrency {
            Some(v) => v,
            None => env_flag(&env, ENV_OPTIMISTIC)?.unwrap_or(false),
        };

        let scheduler = file.scheduler.unwrap_or_default();
        scheduler.validate()?;

        Ok(Self {
            backend,
            avoid_immediate_repeat,
            optimistic_concurrency,
            scheduler,
        })
    }
}

/// The first layer that names a backend decides it: a `[rest]` section or
/// `database_url` in the file, then `KANA_REST_*` or `KANA_DB_URL`. Missing
/// REST parts may be completed from the environment.
fn resolve_backend<F>(
    file_rest: Option<RestSection>,
    file_database_url: Option<String>,
    env: &F,
) -> Result<Backend, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let rest_backend = |url: Option<String>, key: Option<String>| match (url, key) {
        (Some(url), Some(key)) => {
            tracing::info!(url = %url, "using rest backend");
            Ok(Backend::Rest(RestConfig::new(url, key)))
        }
        _ => Err(ConfigError::IncompleteRest),
    };

    if let Some(rest) = file_rest {
        return rest_backend(
            rest.url.or_else(|| env(ENV_REST_URL)),
            rest.api_key.or_else(|| env(ENV_REST_KEY)),
        );
    }
    if let Some(url) = file_database_url {
        tracing::info!(url = %url, "using database from config file");
        return Ok(Backend::Sqlite { database_url: url });
    }
    let (url, key) = (env(ENV_REST_URL), env(ENV_REST_KEY));
    if url.is_some() || key.is_some() {
        return rest_backend(url, key);
    }
    if let Some(url) = env(ENV_DATABASE_URL) {
        tracing::info!(url = %url, "using database from {ENV_DATABASE_URL}");
        return Ok(Backend::Sqlite { database_url: url });
    }
    tracing::info!(url = DEFAULT_DATABASE_URL, "using default database");
    Ok(Backend::Sqlite {
        database_url: DEFAULT_DATABASE_URL.to_owned(),
    })
}

fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn env_flag<F>(env: &F, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = env(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue { key, raw }),
    }
}
