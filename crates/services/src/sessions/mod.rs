mod session;
mod workflow;

// Public API of the practice session subsystem.
pub use crate::error::PracticeError;
pub use session::PracticeSession;
pub use workflow::{AnswerResult, FinishedSession, PracticeLoopService};
