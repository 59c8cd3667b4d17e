use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use kana_core::model::{Attempt, AttemptOutcome, ScriptKind, SessionId, UserId};
use kana_core::{ProficiencyEngine, SessionAggregator};
use storage::repository::{
    CatalogRepository, ProgressRepository, SessionSummaryRepository, Storage,
};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    user_id: UserId,
    script: ScriptKind,
    sessions: u32,
    attempts: u32,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
enum ArgsError {
    #[error("{flag} requires a value")]
    MissingValue { flag: &'static str },
    #[error("unknown argument: {0}")]
    UnknownArg(String),
    #[error("invalid --user value (expected UUID): {raw}")]
    InvalidUser { raw: String },
    #[error("invalid --script value (expected hiragana or katakana): {raw}")]
    InvalidScript { raw: String },
    #[error("invalid --sessions value: {raw}")]
    InvalidSessions { raw: String },
    #[error("invalid --attempts value: {raw}")]
    InvalidAttempts { raw: String },
    #[error("invalid --db value: {raw}")]
    InvalidDbUrl { raw: String },
    #[error("invalid --now value (expected RFC3339): {raw}")]
    InvalidNow { raw: String },
}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("KANA_DB_URL").unwrap_or_else(|_| "sqlite:kana.sqlite3".into());
        let mut user_id = std::env::var("KANA_USER_ID")
            .ok()
            .and_then(|value| UserId::from_str(&value).ok())
            .unwrap_or_else(UserId::random);
        let mut script = ScriptKind::Hiragana;
        let mut sessions = std::env::var("KANA_SEED_SESSIONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(5);
        let mut attempts = 20;
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--user" => {
                    let value = require_value(&mut args, "--user")?;
                    user_id = UserId::from_str(&value)
                        .map_err(|_| ArgsError::InvalidUser { raw: value.clone() })?;
                }
                "--script" => {
                    let value = require_value(&mut args, "--script")?;
                    script = ScriptKind::from_str(&value)
                        .map_err(|_| ArgsError::InvalidScript { raw: value.clone() })?;
                }
                "--sessions" => {
                    let value = require_value(&mut args, "--sessions")?;
                    sessions = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidSessions { raw: value.clone() })?;
                }
                "--attempts" => {
                    let value = require_value(&mut args, "--attempts")?;
                    attempts = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidAttempts { raw: value.clone() })?;
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                other => return Err(ArgsError::UnknownArg(other.to_string())),
            }
        }

        Ok(Self {
            db_url,
            user_id,
            script,
            sessions,
            attempts,
            now,
        })
    }
}

/// Writes a deterministic practice history: one session per day, ending today.
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse()?;
    let now = args.now.unwrap_or_else(Utc::now);
    let storage = Storage::sqlite(&args.db_url).await?;
    let engine = ProficiencyEngine::default();

    let characters = storage
        .catalog
        .character_catalog(Some(args.script))
        .await?;
    if characters.is_empty() {
        return Err("catalog is empty".into());
    }

    for day in 0..args.sessions {
        let started_at = now - Duration::days(i64::from(args.sessions - day));
        let mut aggregator = SessionAggregator::new(SessionId::random(), started_at);

        for step in 0..args.attempts {
            let idx = usize::try_from(day * args.attempts + step)? % characters.len();
            let character = &characters[idx];
            let at = started_at + Duration::seconds(i64::from(step) * 6);
            let latency_ms = 800.0 + f64::from((step * 137) % 2_000);
            let attempt = if (day + step) % 4 == 0 {
                Attempt::incorrect(latency_ms)
            } else {
                Attempt::correct(latency_ms)
            };

            let previous = storage
                .progress
                .get_progress(args.user_id, character.id())
                .await?;
            let updated =
                engine.apply_attempt(args.user_id, character.id(), previous.as_ref(), attempt, at);
            storage.progress.put_progress(&updated).await?;
            aggregator.record_attempt(AttemptOutcome::new(character.id().clone(), attempt, at))?;
        }

        let completed_at = started_at + Duration::seconds(i64::from(args.attempts) * 6);
        let summary = aggregator.finish(completed_at)?;
        storage
            .session_summaries
            .save_summary(args.user_id, &summary)
            .await?;
        tracing::info!(
            session = %summary.session_id(),
            accuracy = summary.accuracy(),
            "seeded session"
        );
    }

    println!(
        "Seeded {} sessions of {} attempts for user {} into {}",
        args.sessions, args.attempts, args.user_id, args.db_url
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        eprintln!("seed failed: {err}");
        print_usage();
        std::process::exit(2);
    }
}

fn print_usage() {
    eprintln!(
        "Usage: seed [--db <sqlite_url>] [--user <uuid>] [--script hiragana|katakana] \
         [--sessions <n>] [--attempts <n>] [--now <RFC3339>]"
    );
    eprintln!("Env: KANA_DB_URL, KANA_USER_ID, KANA_SEED_SESSIONS, RUST_LOG");
}
