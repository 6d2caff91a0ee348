use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use image::GrayImage;
use log::{error, info};
use logging_timer::time;
use rayon::prelude::*;

use crate::alignment::{align_sheet, AlignmentError};
use crate::answer_key::AnswerKey;
use crate::config::SheetConfig;
use crate::debug::{draw_alignment_debug_image_mut, draw_regions_debug_image_mut, ImageDebugWriter};
use crate::decode::{read_answer_block, read_identifier, DecodedAnswer};
use crate::grading::{grade, GradingResult};
use crate::regions::segment_sheet;
use crate::types::{SheetId, SheetWarning};

#[derive(Debug, Clone)]
pub struct InterpretOptions {
    pub debug: bool,
    pub config: SheetConfig,
    pub answer_key: AnswerKey,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InterpretError {
    ImageOpenError(PathBuf),
    Alignment(AlignmentError),
}

impl Display for InterpretError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpretError::ImageOpenError(path) => {
                write!(f, "could not open image {}", path.display())
            }
            InterpretError::Alignment(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for InterpretError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InterpretError::Alignment(e) => Some(e),
            InterpretError::ImageOpenError(_) => None,
        }
    }
}

impl From<AlignmentError> for InterpretError {
    fn from(e: AlignmentError) -> Self {
        InterpretError::Alignment(e)
    }
}

pub type InterpretSheetResult = Result<GradingResult, InterpretError>;

#[time]
pub fn load_sheet_image(image_path: &Path) -> Result<GrayImage, InterpretError> {
    match image::open(image_path) {
        Ok(img) => Ok(img.into_luma8()),
        Err(e) => {
            error!("Could not open {}: {}", image_path.display(), e);
            Err(InterpretError::ImageOpenError(image_path.to_path_buf()))
        }
    }
}

/// Runs the whole pipeline on an already loaded grayscale sheet: align,
/// segment, read the identifier and answer blocks, then grade.
#[time]
pub fn interpret_sheet_image(
    img: &GrayImage,
    options: &InterpretOptions,
    debug: &ImageDebugWriter,
) -> InterpretSheetResult {
    let config = &options.config;
    let aligned = align_sheet(img, &config.markers)?;
    debug.write("alignment", img, |canvas| {
        draw_alignment_debug_image_mut(canvas, &aligned.markers, &aligned.quad)
    });

    let mut warnings = vec![];
    let regions = segment_sheet(&aligned.image, config, &mut warnings);
    debug.write("regions", &aligned.image, |canvas| {
        draw_regions_debug_image_mut(canvas, &regions)
    });

    let ((identifier, identifier_warnings), blocks) = rayon::join(
        || {
            let mut warnings = vec![];
            let identifier = read_identifier(&regions.identifier, config, &mut warnings, debug);
            (identifier, warnings)
        },
        || {
            regions
                .answer_blocks
                .par_iter()
                .enumerate()
                .map(|(block_index, block)| {
                    let mut warnings = vec![];
                    let answers = read_answer_block(block, block_index, config, &mut warnings, debug);
                    (answers, warnings)
                })
                .collect::<Vec<(Vec<DecodedAnswer>, Vec<SheetWarning>)>>()
        },
    );

    warnings.extend(identifier_warnings);
    let mut decoded = vec![];
    for (answers, block_warnings) in blocks {
        decoded.extend(answers);
        warnings.extend(block_warnings);
    }
    info!(
        "Decoded {} of {} questions",
        decoded.len(),
        config.total_questions()
    );

    Ok(grade(
        &identifier,
        config.identifier_digit_count,
        &decoded,
        &options.answer_key,
        warnings,
    ))
}

#[time]
pub fn interpret_sheet(image_path: &Path, options: &InterpretOptions) -> InterpretSheetResult {
    let img = load_sheet_image(image_path)?;
    let debug = if options.debug {
        ImageDebugWriter::new(image_path.to_path_buf())
    } else {
        ImageDebugWriter::disabled()
    };
    interpret_sheet_image(&img, options, &debug)
}

/// Names a sheet in batch output after its file.
pub fn sheet_id_for_path(path: &Path) -> SheetId {
    SheetId::from(
        path.file_stem()
            .unwrap_or(path.as_os_str())
            .to_string_lossy()
            .into_owned(),
    )
}

/// Receives each sheet's outcome as a batch runs. Called from worker threads
/// in no particular order.
pub trait ResultSink: Sync {
    fn accept(&self, sheet: &SheetId, result: &GradingResult);
    fn reject(&self, sheet: &SheetId, error: &InterpretError);
}

/// Prints one JSON document per sheet to stdout.
pub struct JsonSink {
    pub pretty: bool,
}

impl JsonSink {
    fn print(&self, value: &serde_json::Value) {
        let text = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        match text {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Could not serialize result: {}", e),
        }
    }
}

impl ResultSink for JsonSink {
    fn accept(&self, sheet: &SheetId, result: &GradingResult) {
        self.print(&serde_json::json!({ "sheet": sheet, "result": result }));
    }

    fn reject(&self, sheet: &SheetId, error: &InterpretError) {
        self.print(&serde_json::json!({ "sheet": sheet, "error": error.to_string() }));
    }
}

/// Logs a one-line summary per sheet.
pub struct LogSink;

impl ResultSink for LogSink {
    fn accept(&self, sheet: &SheetId, result: &GradingResult) {
        info!(
            "{}: identifier {} scored {}/{} ({}%), confidence {}, {} warnings",
            sheet,
            result.identifier,
            result.statistics.correct,
            result.statistics.total_questions,
            result.statistics.percentage,
            result.confidence_score,
            result.warnings.len()
        );
    }

    fn reject(&self, sheet: &SheetId, error: &InterpretError) {
        error!("{}: {}", sheet, error);
    }
}

/// Keeps every outcome in memory.
#[derive(Default)]
pub struct CollectingSink {
    outcomes: Mutex<Vec<(SheetId, InterpretSheetResult)>>,
}

impl CollectingSink {
    /// Outcomes sorted by sheet id.
    pub fn into_outcomes(self) -> Vec<(SheetId, InterpretSheetResult)> {
        let mut outcomes = self
            .outcomes
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        outcomes
    }

    fn push(&self, sheet: &SheetId, outcome: InterpretSheetResult) {
        let mut outcomes = self
            .outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        outcomes.push((sheet.clone(), outcome));
    }
}

impl ResultSink for CollectingSink {
    fn accept(&self, sheet: &SheetId, result: &GradingResult) {
        self.push(sheet, Ok(result.clone()));
    }

    fn reject(&self, sheet: &SheetId, error: &InterpretError) {
        self.push(sheet, Err(error.clone()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

/// Interprets every sheet in parallel, handing each outcome to `sink`.
#[time]
pub fn interpret_batch(paths: &[PathBuf], options: &InterpretOptions, sink: &dyn ResultSink) -> BatchSummary {
    let start = Instant::now();
    let successful = paths
        .par_iter()
        .filter(|path| {
            let sheet = sheet_id_for_path(path);
            match interpret_sheet(path, options) {
                Ok(result) => {
                    sink.accept(&sheet, &result);
                    true
                }
                Err(e) => {
                    sink.reject(&sheet, &e);
                    false
                }
            }
        })
        .count();

    let summary = BatchSummary {
        total_files: paths.len(),
        successful,
        failed: paths.len() - successful,
        elapsed: start.elapsed(),
    };
    info!(
        "Processed {} sheets: {} successful, {} failed in {:?}",
        summary.total_files, summary.successful, summary.failed, summary.elapsed
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> InterpretOptions {
        InterpretOptions {
            debug: false,
            config: SheetConfig::default(),
            answer_key: AnswerKey::from_json_str(r#"{"1": "A"}"#).unwrap(),
        }
    }

    #[test]
    fn missing_image_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.png");
        assert_eq!(
            interpret_sheet(&path, &options()).unwrap_err(),
            InterpretError::ImageOpenError(path)
        );
    }

    #[test]
    fn sheet_ids_come_from_file_stems() {
        assert_eq!(sheet_id_for_path(Path::new("/a/b/roll-17.jpg")).as_str(), "roll-17");
    }

    #[test]
    fn alignment_errors_convert() {
        let e: InterpretError = AlignmentError::TooFewMarkers { found: 1 }.into();
        assert_eq!(e.to_string(), "alignment failed: found 1 fiducial markers, need 4");
    }

    #[test]
    fn batch_reports_each_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blank = dir.path().join("blank.png");
        GrayImage::from_pixel(200, 300, crate::image_utils::WHITE)
            .save(&blank)
            .unwrap();
        let paths = vec![blank, dir.path().join("missing.png")];

        let sink = CollectingSink::default();
        let summary = interpret_batch(&paths, &options(), &sink);
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.successful, 0);
        assert_eq!(summary.failed, 2);

        let outcomes = sink.into_outcomes();
        assert_eq!(outcomes[0].0.as_str(), "blank");
        assert_eq!(
            outcomes[0].1,
            Err(InterpretError::Alignment(AlignmentError::TooFewMarkers { found: 0 }))
        );
        assert!(matches!(outcomes[1].1, Err(InterpretError::ImageOpenError(_))));
    }

    mod sheets {
        use std::collections::BTreeMap;

        use super::*;
        use crate::config::DropSide;
        use crate::grading::Statistics;
        use crate::test_utils::{render_blank_page, render_sheet, SheetSpec};
        use crate::types::{Choice, MarkedChoice};

        fn pattern_choice(question: u32) -> Choice {
            Choice::ALL[((question - 1) % 4) as usize]
        }

        /// Every question answered with a repeating A-D pattern except
        /// multiples of seven, which are left blank.
        fn answered_sheet() -> SheetSpec {
            let answers = (1..=60u32)
                .filter(|q| q % 7 != 0)
                .map(|q| (q, vec![pattern_choice(q)]))
                .collect();
            SheetSpec {
                answers,
                ..SheetSpec::default()
            }
        }

        /// Matches the pattern except on multiples of five.
        fn pattern_key() -> AnswerKey {
            let entries: BTreeMap<String, String> = (1..=60u32)
                .map(|q| {
                    let index = if q % 5 == 0 { q % 4 } else { (q - 1) % 4 };
                    (q.to_string(), Choice::ALL[index as usize].to_string())
                })
                .collect();
            AnswerKey::from_json_str(&serde_json::to_string(&entries).unwrap()).unwrap()
        }

        fn options_with_key(answer_key: AnswerKey) -> InterpretOptions {
            InterpretOptions {
                debug: false,
                config: SheetConfig::default(),
                answer_key,
            }
        }

        fn interpret(spec: &SheetSpec, options: &InterpretOptions) -> InterpretSheetResult {
            interpret_sheet_image(&render_sheet(spec), options, &ImageDebugWriter::disabled())
        }

        #[test]
        fn grades_a_cleanly_marked_sheet() {
            let result = interpret(&answered_sheet(), &options_with_key(pattern_key())).unwrap();

            assert!(result.warnings.is_empty(), "{:?}", result.warnings);
            assert_eq!(result.identifier, "12345");
            assert!(result.has_valid_identifier(5));
            assert_eq!(result.answers.len(), 60);
            for answer in &result.answers {
                let q = answer.question_number;
                let expected = if q % 7 == 0 {
                    MarkedChoice::Blank
                } else {
                    MarkedChoice::Choice(pattern_choice(q))
                };
                assert_eq!(answer.student_choice, expected, "question {}", q);
            }
            assert_eq!(
                result.statistics,
                Statistics {
                    total_questions: 60,
                    answered: 52,
                    correct: 41,
                    incorrect: 11,
                    skipped: 8,
                    percentage: 68.33,
                }
            );
            assert_eq!(result.confidence_score, 88.33);
        }

        #[test]
        fn reading_the_same_image_twice_gives_the_same_result() {
            let img = render_sheet(&answered_sheet());
            let options = options_with_key(pattern_key());
            let first = interpret_sheet_image(&img, &options, &ImageDebugWriter::disabled()).unwrap();
            let second = interpret_sheet_image(&img, &options, &ImageDebugWriter::disabled()).unwrap();
            assert_eq!(first, second);
        }

        #[test]
        fn slightly_rotated_photo_reads_the_same() {
            let options = options_with_key(pattern_key());
            let straight = interpret(&answered_sheet(), &options).unwrap();
            let rotated = interpret(
                &SheetSpec {
                    rotation_degrees: 1.0,
                    ..answered_sheet()
                },
                &options,
            )
            .unwrap();
            assert_eq!(rotated.identifier, straight.identifier);
            assert_eq!(rotated.student_answers, straight.student_answers);
            assert_eq!(rotated.statistics, straight.statistics);
        }

        #[test]
        fn page_without_markers_is_rejected() {
            let result = interpret_sheet_image(
                &render_blank_page(),
                &options_with_key(pattern_key()),
                &ImageDebugWriter::disabled(),
            );
            assert_eq!(
                result.unwrap_err(),
                InterpretError::Alignment(AlignmentError::TooFewMarkers { found: 0 })
            );
        }

        #[test]
        fn extra_identifier_column_is_dropped() {
            let spec = SheetSpec {
                identifier: vec![9, 0, 7, 3, 1],
                identifier_header_column: true,
                ..answered_sheet()
            };
            let result = interpret(&spec, &options_with_key(pattern_key())).unwrap();
            assert_eq!(result.identifier, "90731");
        }

        #[test]
        fn identifier_keeps_its_last_columns_whatever_the_answer_drop_side() {
            let spec = SheetSpec {
                identifier: vec![9, 0, 7, 3, 1],
                identifier_header_column: true,
                ..answered_sheet()
            };
            let options = InterpretOptions {
                config: SheetConfig {
                    column_drop_side: DropSide::Rightmost,
                    ..SheetConfig::default()
                },
                ..options_with_key(pattern_key())
            };
            let result = interpret(&spec, &options).unwrap();
            assert_eq!(result.identifier, "90731");
            assert!(result.has_valid_identifier(5));
        }

        #[test]
        fn unfilled_identifier_columns_are_errors() {
            let spec = SheetSpec {
                identifier: vec![4, 2],
                ..answered_sheet()
            };
            let result = interpret(&spec, &options_with_key(pattern_key())).unwrap();
            assert_eq!(result.identifier, "42EEE");
            assert!(!result.has_valid_identifier(5));
            assert!(result.warnings.contains(&SheetWarning::IdentifierDecode {
                identifier: "42EEE".to_string(),
                expected_digits: 5,
            }));
        }

        #[test]
        fn two_marks_on_one_row_are_ambiguous() {
            let mut spec = answered_sheet();
            spec.answers.insert(2, vec![Choice::A, Choice::C]);
            let key = AnswerKey::from_json_str(r#"{"2": "A"}"#).unwrap();
            let result = interpret(&spec, &options_with_key(key)).unwrap();

            assert_eq!(result.answers[0].student_choice, MarkedChoice::Ambiguous);
            assert!(!result.answers[0].is_correct);
            assert_eq!(result.student_answers.get("2").map(String::as_str), Some("Error"));
            assert!(result
                .warnings
                .contains(&SheetWarning::AmbiguousMark { question: 2, filled: 2 }));
        }

        #[test]
        fn any_accepted_choice_scores() {
            let mut spec = answered_sheet();
            spec.answers.insert(1, vec![Choice::C]);
            let key = AnswerKey::from_json_str(r#"{"1": ["A", "C"]}"#).unwrap();
            let result = interpret(&spec, &options_with_key(key)).unwrap();

            assert_eq!(result.answers[0].student_choice, MarkedChoice::Choice(Choice::C));
            assert!(result.answers[0].is_correct);
            assert_eq!(result.statistics.percentage, 100.0);
        }

        #[test]
        fn debug_images_are_written_next_to_the_input() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("sheet.png");
            render_sheet(&answered_sheet()).save(&path).unwrap();

            let options = InterpretOptions {
                debug: true,
                ..options_with_key(pattern_key())
            };
            let result = interpret_sheet(&path, &options).unwrap();
            assert_eq!(result.identifier, "12345");
            for label in ["alignment", "regions", "identifier_bubbles", "block_1_bubbles", "block_4_bubbles"] {
                let debug_path = crate::debug::debug_image_path(&path, label);
                assert!(debug_path.exists(), "missing {}", debug_path.display());
            }
        }
    }
}
