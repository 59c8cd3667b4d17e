use std::collections::HashMap;

use thiserror::Error;

use crate::model::{Character, CharacterId, ScriptKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("duplicate character id: {0}")]
    DuplicateId(CharacterId),
}

// (romanization, hiragana, katakana, row)
const GOJUON: &[(&str, &str, &str, &str)] = &[
    ("a", "あ", "ア", "vowels"),
    ("i", "い", "イ", "vowels"),
    ("u", "う", "ウ", "vowels"),
    ("e", "え", "エ", "vowels"),
    ("o", "お", "オ", "vowels"),
    ("ka", "か", "カ", "k"),
    ("ki", "き", "キ", "k"),
    ("ku", "く", "ク", "k"),
    ("ke", "け", "ケ", "k"),
    ("ko", "こ", "コ", "k"),
    ("sa", "さ", "サ", "s"),
    ("shi", "し", "シ", "s"),
    ("su", "す", "ス", "s"),
    ("se", "せ", "セ", "s"),
    ("so", "そ", "ソ", "s"),
    ("ta", "た", "タ", "t"),
    ("chi", "ち", "チ", "t"),
    ("tsu", "つ", "ツ", "t"),
    ("te", "て", "テ", "t"),
    ("to", "と", "ト", "t"),
    ("na", "な", "ナ", "n"),
    ("ni", "に", "ニ", "n"),
    ("nu", "ぬ", "ヌ", "n"),
    ("ne", "ね", "ネ", "n"),
    ("no", "の", "ノ", "n"),
    ("ha", "は", "ハ", "h"),
    ("hi", "ひ", "ヒ", "h"),
    ("fu", "ふ", "フ", "h"),
    ("he", "へ", "ヘ", "h"),
    ("ho", "ほ", "ホ", "h"),
    ("ma", "ま", "マ", "m"),
    ("mi", "み", "ミ", "m"),
    ("mu", "む", "ム", "m"),
    ("me", "め", "メ", "m"),
    ("mo", "も", "モ", "m"),
    ("ya", "や", "ヤ", "y"),
    ("yu", "ゆ", "ユ", "y"),
    ("yo", "よ", "ヨ", "y"),
    ("ra", "ら", "ラ", "r"),
    ("ri", "り", "リ", "r"),
    ("ru", "る", "ル", "r"),
    ("re", "れ", "レ", "r"),
    ("ro", "ろ", "ロ", "r"),
    ("wa", "わ", "ワ", "w"),
    ("wo", "を", "ヲ", "w"),
    ("n", "ん", "ン", "nasal"),
];

/// Builds the id used for a kana in the built-in tables, e.g. `katakana-tsu`.
#[must_use]
pub fn character_id(script: ScriptKind, romanization: &str) -> CharacterId {
    CharacterId::new(format!("{}-{romanization}", script.as_str()))
}

/// Read-only lookup of every practiceable character.
#[derive(Debug, Clone)]
pub struct CharacterCatalog {
    characters: Vec<Character>,
    index: HashMap<CharacterId, usize>,
}

impl CharacterCatalog {
    /// Build a catalog from an arbitrary character list, keeping input order.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::DuplicateId` if two characters share an id.
    pub fn from_characters(characters: Vec<Character>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(characters.len());
        for (pos, character) in characters.iter().enumerate() {
            if index.insert(character.id().clone(), pos).is_some() {
                return Err(CatalogError::DuplicateId(character.id().clone()));
            }
        }
        Ok(Self { characters, index })
    }

    /// The basic 46-character hiragana and katakana tables.
    #[must_use]
    pub fn builtin() -> Self {
        let characters: Vec<Character> = ScriptKind::ALL
            .into_iter()
            .flat_map(|script| {
                GOJUON.iter().map(move |(romaji, hira, kata, row)| {
                    let glyph = match script {
                        ScriptKind::Hiragana => *hira,
                        ScriptKind::Katakana => *kata,
                    };
                    Character::new(character_id(script, romaji), glyph, romaji, *row, script)
                })
            })
            .collect();

        let index = characters
            .iter()
            .enumerate()
            .map(|(pos, c)| (c.id().clone(), pos))
            .collect();
        Self { characters, index }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.characters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &CharacterId) -> Option<&Character> {
        self.index.get(id).map(|&pos| &self.characters[pos])
    }

    #[must_use]
    pub fn all(&self) -> &[Character] {
        &self.characters
    }

    /// Characters of one script, or all of them for `None`.
    pub fn by_script(&self, script: Option<ScriptKind>) -> impl Iterator<Item = &Character> {
        self.characters
            .iter()
            .filter(move |c| script.is_none_or(|s| c.script() == s))
    }

    /// Characters matching the script filter and, when `groups` is non-empty,
    /// belonging to one of the listed groups.
    #[must_use]
    pub fn filter(&self, script: Option<ScriptKind>, groups: &[String]) -> Vec<&Character> {
        self.by_script(script)
            .filter(|c| groups.is_empty() || groups.iter().any(|g| g == c.group()))
            .collect()
    }

    /// Distinct group names in catalog order.
    #[must_use]
    pub fn groups(&self, script: Option<ScriptKind>) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for c in self.by_script(script) {
            if !seen.contains(&c.group()) {
                seen.push(c.group());
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_both_scripts() {
        let catalog = CharacterCatalog::builtin();
        assert_eq!(catalog.len(), 92);
        assert_eq!(catalog.by_script(Some(ScriptKind::Hiragana)).count(), 46);
        assert_eq!(catalog.by_script(Some(ScriptKind::Katakana)).count(), 46);
    }

    #[test]
    fn lookup_by_id() {
        let catalog = CharacterCatalog::builtin();
        let tsu = catalog
            .get(&character_id(ScriptKind::Katakana, "tsu"))
            .unwrap();
        assert_eq!(tsu.glyph(), "ツ");
        assert_eq!(tsu.group(), "t");
        assert!(tsu.accepts("TSU"));
        assert!(catalog.get(&CharacterId::new("kanji-yama")).is_none());
    }

    #[test]
    fn filter_by_groups() {
        let catalog = CharacterCatalog::builtin();
        let picked = catalog.filter(
            Some(ScriptKind::Hiragana),
            &["vowels".to_owned(), "k".to_owned()],
        );
        assert_eq!(picked.len(), 10);
        assert!(picked.iter().all(|c| c.script() == ScriptKind::Hiragana));
        assert_eq!(catalog.filter(None, &[]).len(), 92);
    }

    #[test]
    fn groups_keep_table_order() {
        let catalog = CharacterCatalog::builtin();
        let groups = catalog.groups(Some(ScriptKind::Hiragana));
        assert_eq!(groups.first(), Some(&"vowels"));
        assert_eq!(groups.last(), Some(&"nasal"));
        assert_eq!(groups.len(), 11);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let a = Character::new(CharacterId::new("x"), "あ", "a", "vowels", ScriptKind::Hiragana);
        let err = CharacterCatalog::from_characters(vec![a.clone(), a]).unwrap_err();
        assert_eq!(err, CatalogError::DuplicateId(CharacterId::new("x")));
    }
}
