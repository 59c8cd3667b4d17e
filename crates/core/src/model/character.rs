use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::CharacterId;

//
// ─── SCRIPT KIND ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown script kind: {0}")]
pub struct UnknownScriptKind(pub String);

/// The two phonetic kana scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    Hiragana,
    Katakana,
}

impl ScriptKind {
    pub const ALL: [ScriptKind; 2] = [ScriptKind::Hiragana, ScriptKind::Katakana];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptKind::Hiragana => "hiragana",
            ScriptKind::Katakana => "katakana",
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptKind {
    type Err = UnknownScriptKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hiragana" => Ok(ScriptKind::Hiragana),
            "katakana" => Ok(ScriptKind::Katakana),
            other => Err(UnknownScriptKind(other.to_owned())),
        }
    }
}

//
// ─── CHARACTER ─────────────────────────────────────────────────────────────────
//

/// A single practiceable kana glyph.
///
/// Characters are static data: they are built once when the catalog loads and
/// never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Character {
    id: CharacterId,
    glyph: String,
    expected_answer: String,
    group: String,
    script: ScriptKind,
}

impl Character {
    /// The expected answer is stored lower-cased so comparisons stay cheap.
    #[must_use]
    pub fn new(
        id: CharacterId,
        glyph: impl Into<String>,
        expected_answer: impl AsRef<str>,
        group: impl Into<String>,
        script: ScriptKind,
    ) -> Self {
        Self {
            id,
            glyph: glyph.into(),
            expected_answer: expected_answer.as_ref().trim().to_lowercase(),
            group: group.into(),
            script,
        }
    }

    #[must_use]
    pub fn id(&self) -> &CharacterId {
        &self.id
    }

    #[must_use]
    pub fn glyph(&self) -> &str {
        &self.glyph
    }

    #[must_use]
    pub fn expected_answer(&self) -> &str {
        &self.expected_answer
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[must_use]
    pub fn script(&self) -> ScriptKind {
        self.script
    }

    /// Returns true when `answer` matches the canonical romanization,
    /// ignoring surrounding whitespace and case.
    #[must_use]
    pub fn accepts(&self, answer: &str) -> bool {
        answer.trim().to_lowercase() == self.expected_answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ignores_case_and_whitespace() {
        let c = Character::new(
            CharacterId::new("hiragana-shi"),
            "し",
            "SHI",
            "s",
            ScriptKind::Hiragana,
        );
        assert_eq!(c.expected_answer(), "shi");
        assert!(c.accepts("  Shi "));
        assert!(!c.accepts("si"));
    }

    #[test]
    fn script_kind_parses_case_insensitively() {
        assert_eq!("Katakana".parse::<ScriptKind>().unwrap(), ScriptKind::Katakana);
        assert!("kanji".parse::<ScriptKind>().is_err());
    }
}
