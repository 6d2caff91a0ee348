use std::collections::BTreeMap;

use log::info;
use serde::Serialize;

use crate::{
    answer_key::{AnswerKey, KeyEntry},
    decode::{DecodedAnswer, DecodedIdentifier},
    types::{record_warning, MarkedChoice, SheetWarning},
};

/// One answer-key question compared against what the student marked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedAnswer {
    pub question_number: u32,
    pub student_choice: MarkedChoice,
    pub correct_choice: KeyEntry,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_questions: usize,
    pub answered: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub skipped: usize,
    /// Correct answers as a percentage of the key, rounded to two decimals.
    pub percentage: f64,
}

/// The graded record for one sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingResult {
    pub identifier: String,
    pub answers: Vec<GradedAnswer>,
    /// Every decoded question mapped to `A`-`D`, `Blank` or `Error`.
    pub student_answers: BTreeMap<String, String>,
    pub statistics: Statistics,
    pub confidence_score: f64,
    pub warnings: Vec<SheetWarning>,
}

impl GradingResult {
    pub fn has_valid_identifier(&self, expected_digits: usize) -> bool {
        self.identifier.len() == expected_digits && self.identifier.chars().all(|c| c.is_ascii_digit())
    }
}

/// A question is correct only when exactly one choice was marked and the key
/// accepts it.
pub fn is_correct(marked: MarkedChoice, entry: &KeyEntry) -> bool {
    marked.choice().map_or(false, |choice| entry.accepts(choice))
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Averages an identifier factor with an answer factor; the answer factor is
/// left out when nothing was decoded.
pub fn confidence_score(identifier: &DecodedIdentifier, expected_digits: usize, answers: &[DecodedAnswer]) -> f64 {
    let mut factors = vec![if identifier.is_valid(expected_digits) {
        90.0
    } else if !identifier.digits.is_empty() {
        70.0
    } else {
        30.0
    }];

    if !answers.is_empty() {
        let valid = answers.iter().filter(|a| a.choice.choice().is_some()).count();
        factors.push((valid as f64 / answers.len() as f64 * 100.0).min(95.0));
    }

    round_to_hundredths(factors.iter().sum::<f64>() / factors.len() as f64)
}

/// Grades decoded answers against the key. Questions are taken from the key
/// in ascending order; a key question with no decoded row counts as blank.
pub fn grade(
    identifier: &DecodedIdentifier,
    expected_digits: usize,
    decoded: &[DecodedAnswer],
    key: &AnswerKey,
    mut warnings: Vec<SheetWarning>,
) -> GradingResult {
    let by_question: BTreeMap<u32, MarkedChoice> =
        decoded.iter().map(|a| (a.question, a.choice)).collect();

    for question in by_question.keys() {
        if key.get(*question).is_none() {
            record_warning(&mut warnings, SheetWarning::UnkeyedQuestion { question: *question });
        }
    }

    let answers: Vec<GradedAnswer> = key
        .iter()
        .map(|(question_number, entry)| {
            let student_choice = by_question
                .get(&question_number)
                .copied()
                .unwrap_or(MarkedChoice::Blank);
            GradedAnswer {
                question_number,
                student_choice,
                correct_choice: entry.clone(),
                is_correct: is_correct(student_choice, entry),
            }
        })
        .collect();

    let total_questions = answers.len();
    let answered = answers
        .iter()
        .filter(|a| a.student_choice.choice().is_some())
        .count();
    let correct = answers.iter().filter(|a| a.is_correct).count();
    let percentage = if total_questions == 0 {
        0.0
    } else {
        round_to_hundredths(correct as f64 / total_questions as f64 * 100.0)
    };
    let statistics = Statistics {
        total_questions,
        answered,
        correct,
        incorrect: answered - correct,
        skipped: total_questions - answered,
        percentage,
    };
    info!(
        "Graded {}/{} correct ({}%)",
        statistics.correct, statistics.total_questions, statistics.percentage
    );

    GradingResult {
        identifier: identifier.as_string(),
        answers,
        student_answers: by_question
            .iter()
            .map(|(q, choice)| (q.to_string(), choice.wire_value().to_string()))
            .collect(),
        statistics,
        confidence_score: confidence_score(identifier, expected_digits, decoded),
        warnings,
    }
}
