use std::fmt::Display;

use log::warn;
use serde::{Deserialize, Serialize};

/// Number of answer choices printed on every question row.
pub const CHOICES_PER_QUESTION: usize = 4;

/// Number of bubbles printed in every identifier column (digits 0-9).
pub const DIGITS_PER_COLUMN: usize = 10;

// Defines a new type that wraps a String for use as an ID.
macro_rules! idtype {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            #[allow(dead_code)]
            pub fn from(s: String) -> Self {
                Self(s)
            }

            #[allow(dead_code)]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

idtype!(SheetId);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Size<T> {
    pub width: T,
    pub height: T,
}

/// One of the four answer choices on a question row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Choice {
    A,
    B,
    C,
    D,
}

impl Choice {
    pub const ALL: [Choice; CHOICES_PER_QUESTION] = [Choice::A, Choice::B, Choice::C, Choice::D];

    /// Maps a left-to-right bubble position to its choice.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn letter(self) -> &'static str {
        match self {
            Choice::A => "A",
            Choice::B => "B",
            Choice::C => "C",
            Choice::D => "D",
        }
    }
}

impl Display for Choice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl TryFrom<&str> for Choice {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Choice::A),
            "B" => Ok(Choice::B),
            "C" => Ok(Choice::C),
            "D" => Ok(Choice::D),
            _ => Err(format!("invalid answer choice: {:?}", s)),
        }
    }
}

impl<'de> Deserialize<'de> for Choice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Choice::try_from(s.as_str()).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Choice {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.letter())
    }
}

/// What a student marked on one question row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MarkedChoice {
    Blank,
    Ambiguous,
    Choice(Choice),
}

impl MarkedChoice {
    /// The single unambiguous choice, if there is one.
    pub fn choice(self) -> Option<Choice> {
        match self {
            MarkedChoice::Choice(choice) => Some(choice),
            _ => None,
        }
    }

    /// The value reported in the per-question answer map. Rows with more than
    /// one filled bubble are reported as `Error`.
    pub fn wire_value(self) -> &'static str {
        match self {
            MarkedChoice::Blank => "Blank",
            MarkedChoice::Ambiguous => "Error",
            MarkedChoice::Choice(choice) => choice.letter(),
        }
    }
}

impl Display for MarkedChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkedChoice::Blank => write!(f, "Blank"),
            MarkedChoice::Ambiguous => write!(f, "Ambiguous"),
            MarkedChoice::Choice(choice) => write!(f, "{}", choice),
        }
    }
}

impl Serialize for MarkedChoice {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Identifies a region of the rectified sheet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegionId {
    Identifier,
    /// Zero-based index of an answer block, counted left to right.
    AnswerBlock(usize),
}

impl Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegionId::Identifier => write!(f, "identifier"),
            RegionId::AnswerBlock(index) => write!(f, "block_{}", index + 1),
        }
    }
}

impl Serialize for RegionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// A separator line was not found and a fixed split was used instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum SegmentationWarning {
    #[serde(rename_all = "camelCase", rename = "horizontalSeparatorFallback")]
    HorizontalSeparatorFallback { fallback_y: u32 },

    #[serde(rename_all = "camelCase", rename = "verticalSeparatorFallback")]
    VerticalSeparatorFallback { expected: usize, found: usize },
}

/// A region could not be read as laid out; it contributes no (or fewer)
/// answers but the rest of the sheet proceeds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum RegionWarning {
    #[serde(rename_all = "camelCase", rename = "tooFewBubbles")]
    TooFewBubbles {
        region: RegionId,
        expected_at_least: usize,
        found: usize,
    },

    #[serde(rename_all = "camelCase", rename = "columnCountMismatch")]
    ColumnCountMismatch {
        region: RegionId,
        expected: usize,
        found: usize,
    },

    #[serde(rename_all = "camelCase", rename = "shortRow")]
    ShortRow {
        region: RegionId,
        row: usize,
        found: usize,
    },

    #[serde(rename_all = "camelCase", rename = "extraRows")]
    ExtraRows {
        region: RegionId,
        expected: usize,
        found: usize,
    },

    #[serde(rename_all = "camelCase", rename = "invalidDigitColumn")]
    InvalidDigitColumn {
        column: usize,
        found: usize,
    },
}

/// Every non-fatal condition encountered while reading a sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SheetWarning {
    Segmentation(SegmentationWarning),
    Region(RegionWarning),
    #[serde(rename_all = "camelCase")]
    IdentifierDecode {
        identifier: String,
        expected_digits: usize,
    },
    #[serde(rename_all = "camelCase")]
    AmbiguousMark { question: u32, filled: usize },
    #[serde(rename_all = "camelCase")]
    UnkeyedQuestion { question: u32 },
}

impl Display for SheetWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SheetWarning::Segmentation(SegmentationWarning::HorizontalSeparatorFallback {
                fallback_y,
            }) => write!(
                f,
                "horizontal separator not found, splitting at y={}",
                fallback_y
            ),
            SheetWarning::Segmentation(SegmentationWarning::VerticalSeparatorFallback {
                expected,
                found,
            }) => write!(
                f,
                "expected {} vertical separators, found {}; using equal-width blocks",
                expected, found
            ),
            SheetWarning::Region(RegionWarning::TooFewBubbles {
                region,
                expected_at_least,
                found,
            }) => write!(
                f,
                "{}: found {} bubbles, need at least {}",
                region, found, expected_at_least
            ),
            SheetWarning::Region(RegionWarning::ColumnCountMismatch {
                region,
                expected,
                found,
            }) => write!(
                f,
                "{}: expected {} or {} columns, found {}",
                region,
                expected,
                expected + 1,
                found
            ),
            SheetWarning::Region(RegionWarning::ShortRow { region, row, found }) => write!(
                f,
                "{}: row {} has only {} bubbles, skipping",
                region,
                row + 1,
                found
            ),
            SheetWarning::Region(RegionWarning::ExtraRows {
                region,
                expected,
                found,
            }) => write!(
                f,
                "{}: found {} rows, only the first {} are graded",
                region, found, expected
            ),
            SheetWarning::Region(RegionWarning::InvalidDigitColumn { column, found }) => write!(
                f,
                "identifier column {} has {} bubbles after cleanup (expected {})",
                column + 1,
                found,
                DIGITS_PER_COLUMN
            ),
            SheetWarning::IdentifierDecode {
                identifier,
                expected_digits,
            } => write!(
                f,
                "identifier {:?} is not a {}-digit number",
                identifier, expected_digits
            ),
            SheetWarning::AmbiguousMark { question, filled } => write!(
                f,
                "question {}: {} bubbles filled, recorded as ambiguous",
                question, filled
            ),
            SheetWarning::UnkeyedQuestion { question } => {
                write!(f, "question {} was read but has no answer key entry", question)
            }
        }
    }
}

impl From<SegmentationWarning> for SheetWarning {
    fn from(warning: SegmentationWarning) -> Self {
        SheetWarning::Segmentation(warning)
    }
}

impl From<RegionWarning> for SheetWarning {
    fn from(warning: RegionWarning) -> Self {
        SheetWarning::Region(warning)
    }
}

/// Logs a warning and keeps it for the caller.
pub fn record_warning(warnings: &mut Vec<SheetWarning>, warning: impl Into<SheetWarning>) {
    let warning = warning.into();
    warn!("{}", warning);
    warnings.push(warning);
}
