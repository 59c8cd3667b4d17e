#![forbid(unsafe_code)]

pub mod app_services;
pub mod config;
pub mod error;
pub mod overview;
pub mod progress_service;
pub mod sessions;

pub use kana_core::Clock;

pub use app_services::AppServices;
pub use config::{AppConfig, Backend};
pub use error::{AppServicesError, ConfigError, PracticeError, ProgressError};
pub use overview::{DifficultCharacter, ProgressOverview, ProgressOverviewService, SessionListItem};
pub use progress_service::{AppliedAttempt, PendingWrites, ProgressService};
pub use sessions::{AnswerResult, FinishedSession, PracticeLoopService, PracticeSession};
