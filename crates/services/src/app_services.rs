use storage::repository::Storage;

use crate::Clock;
use crate::config::{AppConfig, Backend};
use crate::error::AppServicesError;
use crate::overview::ProgressOverviewService;
use crate::sessions::PracticeLoopService;

/// Assembles the practice-facing services over the configured backend.
#[derive(Clone)]
pub struct AppServices {
    practice: PracticeLoopService,
    overview: ProgressOverviewService,
}

impl AppServices {
    /// Load configuration from the environment and build services.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if configuration or storage setup fails.
    pub async fn from_env(clock: Clock) -> Result<Self, AppServicesError> {
        let config = AppConfig::load()?;
        Self::from_config(&config, clock).await
    }

    /// Build services for an already resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the storage backend cannot be opened.
    pub async fn from_config(config: &AppConfig, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = match &config.backend {
            Backend::Sqlite { database_url } => Storage::sqlite(database_url).await?,
            Backend::Rest(rest) => Storage::rest(rest)?,
        };
        Ok(Self::with_storage(&storage, config, clock))
    }

    /// Build services over an existing storage aggregate.
    #[must_use]
    pub fn with_storage(storage: &Storage, config: &AppConfig, clock: Clock) -> Self {
        let practice = PracticeLoopService::new(clock, storage, config.scheduler.clone())
            .with_avoid_immediate_repeat(config.avoid_immediate_repeat)
            .with_optimistic_concurrency(config.optimistic_concurrency);
        let overview = ProgressOverviewService::new(clock, storage);
        Self { practice, overview }
    }

    #[must_use]
    pub fn practice(&self) -> &PracticeLoopService {
        &self.practice
    }

    #[must_use]
    pub fn overview(&self) -> &ProgressOverviewService {
        &self.overview
    }
}
