#![forbid(unsafe_code)]

pub mod catalog;
pub mod error;
pub mod model;
pub mod proficiency;
pub mod selection;
pub mod session;
pub mod settings;
pub mod time;

pub use catalog::CharacterCatalog;
pub use error::PreconditionViolation;
pub use proficiency::ProficiencyEngine;
pub use selection::SelectionEngine;
pub use session::SessionAggregator;
pub use settings::SchedulerSettings;
pub use time::Clock;
