use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::Choice;

/// The accepted answer(s) for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyEntry {
    Single(Choice),
    AnyOf(BTreeSet<Choice>),
}

impl KeyEntry {
    pub fn accepts(&self, choice: Choice) -> bool {
        match self {
            KeyEntry::Single(correct) => *correct == choice,
            KeyEntry::AnyOf(accepted) => accepted.contains(&choice),
        }
    }
}

impl Display for KeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyEntry::Single(choice) => write!(f, "{}", choice),
            KeyEntry::AnyOf(choices) => {
                let letters: Vec<&str> = choices.iter().map(|c| c.letter()).collect();
                write!(f, "{}", letters.join("/"))
            }
        }
    }
}

/// Correct answers keyed by 1-based question number.
///
/// In JSON an answer key is an object whose keys are question numbers and
/// whose values are either a single letter or a list of acceptable letters:
///
/// ```json
/// { "1": "A", "2": "D", "23": ["A", "C"] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, KeyEntry>",
    into = "BTreeMap<String, KeyEntry>"
)]
pub struct AnswerKey {
    entries: BTreeMap<u32, KeyEntry>,
}

impl AnswerKey {
    pub fn new(entries: BTreeMap<u32, KeyEntry>) -> Result<Self, AnswerKeyError> {
        for (question, entry) in &entries {
            if *question == 0 {
                return Err(AnswerKeyError::InvalidQuestion("0".to_string()));
            }
            if let KeyEntry::AnyOf(choices) = entry {
                if choices.is_empty() {
                    return Err(AnswerKeyError::EmptyChoiceSet(*question));
                }
            }
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, AnswerKeyError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| AnswerKeyError::Unreadable(path.to_path_buf(), e))?;
        Self::from_json_str(&json)
    }

    pub fn from_json_str(json: &str) -> Result<Self, AnswerKeyError> {
        serde_json::from_str(json).map_err(AnswerKeyError::Malformed)
    }

    pub fn get(&self, question: u32) -> Option<&KeyEntry> {
        self.entries.get(&question)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending question order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &KeyEntry)> {
        self.entries.iter().map(|(q, e)| (*q, e))
    }
}

impl TryFrom<BTreeMap<String, KeyEntry>> for AnswerKey {
    type Error = AnswerKeyError;

    fn try_from(raw: BTreeMap<String, KeyEntry>) -> Result<Self, Self::Error> {
        let mut entries = BTreeMap::new();
        for (question, entry) in raw {
            let number = question
                .trim()
                .parse::<u32>()
                .map_err(|_| AnswerKeyError::InvalidQuestion(question.clone()))?;
            if entries.insert(number, entry).is_some() {
                return Err(AnswerKeyError::DuplicateQuestion(number));
            }
        }
        AnswerKey::new(entries)
    }
}

impl From<AnswerKey> for BTreeMap<String, KeyEntry> {
    fn from(key: AnswerKey) -> Self {
        key.entries
            .into_iter()
            .map(|(q, e)| (q.to_string(), e))
            .collect()
    }
}

#[derive(Debug)]
pub enum AnswerKeyError {
    Unreadable(PathBuf, std::io::Error),
    Malformed(serde_json::Error),
    InvalidQuestion(String),
    DuplicateQuestion(u32),
    EmptyChoiceSet(u32),
}

impl Display for AnswerKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerKeyError::Unreadable(path, e) => {
                write!(f, "cannot read answer key {}: {}", path.display(), e)
            }
            AnswerKeyError::Malformed(e) => write!(f, "malformed answer key: {}", e),
            AnswerKeyError::InvalidQuestion(q) => {
                write!(f, "invalid question number {:?}; expected a positive integer", q)
            }
            AnswerKeyError::DuplicateQuestion(q) => write!(f, "question {} appears twice", q),
            AnswerKeyError::EmptyChoiceSet(q) => {
                write!(f, "question {} has an empty set of accepted choices", q)
            }
        }
    }
}

impl std::error::Error for AnswerKeyError {}
