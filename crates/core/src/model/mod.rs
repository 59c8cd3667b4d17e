mod attempt;
mod character;
mod ids;
mod progress;
mod session;

pub use ids::{CharacterId, ParseIdError, SessionId, UserId};

pub use attempt::{Attempt, AttemptOutcome};
pub use character::{Character, ScriptKind, UnknownScriptKind};
pub use progress::{MAX_PROFICIENCY, MasteryStage, ProgressRecord};
pub use session::{
    CharacterResult, SessionStatsSnapshot, SessionSummary, SessionSummaryError, accuracy_percent,
};
