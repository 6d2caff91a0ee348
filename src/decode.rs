use std::fmt::Display;

use image::GrayImage;
use log::{debug, info};
use logging_timer::time;
use serde::Serialize;

use crate::{
    bubbles::{
        find_bubble_candidates, group_into_columns, group_into_rows, select_columns,
        sort_left_to_right, sort_top_to_bottom, BubbleCandidate, BubbleColumn, BubbleScan,
        QuestionRow,
    },
    config::{DropSide, SheetConfig},
    debug::{draw_bubble_candidates_debug_image_mut, ImageDebugWriter},
    marks::{derive_threshold, MarkThreshold},
    types::{
        record_warning, Choice, MarkedChoice, RegionId, RegionWarning, SheetWarning,
        CHOICES_PER_QUESTION, DIGITS_PER_COLUMN,
    },
};

/// The reading of one identifier column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitReading {
    Digit(u8),
    /// Zero or several bubbles filled.
    Error,
    /// The column did not have ten bubbles.
    Missing,
}

impl Display for DigitReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigitReading::Digit(digit) => write!(f, "{}", digit),
            DigitReading::Error => write!(f, "E"),
            DigitReading::Missing => write!(f, "X"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedIdentifier {
    /// One reading per identifier column, left to right. Empty when the
    /// identifier region could not be read at all.
    pub digits: Vec<DigitReading>,
}

impl DecodedIdentifier {
    pub fn as_string(&self) -> String {
        self.digits.iter().map(|d| d.to_string()).collect()
    }

    /// Whether every column decoded to a digit and there are `expected` of
    /// them.
    pub fn is_valid(&self, expected: usize) -> bool {
        self.digits.len() == expected
            && self
                .digits
                .iter()
                .all(|d| matches!(d, DigitReading::Digit(_)))
    }
}

/// The mark read from one question row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedAnswer {
    pub question: u32,
    pub choice: MarkedChoice,
    /// Number of bubbles in the row classified as filled.
    pub filled: usize,
}

/// Reduces an oversized question row to its four answer bubbles. Returns
/// `None` for rows that are too short to hold a question.
pub fn trim_row(mut row: QuestionRow) -> Option<QuestionRow> {
    sort_left_to_right(&mut row);
    match row.len() {
        n if n < CHOICES_PER_QUESTION => None,
        n if n == CHOICES_PER_QUESTION => Some(row),
        // a printed question number to the left of the bubbles
        n if n == CHOICES_PER_QUESTION + 1 => Some(row.split_off(1)),
        n => Some(row.split_off(n - CHOICES_PER_QUESTION)),
    }
}

/// Classifies each bubble of a trimmed row. Returns the marked choice and
/// how many bubbles were filled.
pub fn decode_row(row: &[BubbleCandidate], threshold: &MarkThreshold) -> (MarkedChoice, usize) {
    let filled: Vec<usize> = row
        .iter()
        .enumerate()
        .filter(|(_, bubble)| threshold.is_filled(bubble.mean_intensity))
        .map(|(i, _)| i)
        .collect();

    let choice = match filled.as_slice() {
        [] => MarkedChoice::Blank,
        [index] => Choice::from_index(*index).map_or(MarkedChoice::Blank, MarkedChoice::Choice),
        _ => MarkedChoice::Ambiguous,
    };
    (choice, filled.len())
}

/// Orders an identifier column top to bottom and keeps the ten digit
/// bubbles, dropping anything printed above them.
pub fn trim_digit_column(mut column: BubbleColumn) -> BubbleColumn {
    sort_top_to_bottom(&mut column);
    if column.len() > DIGITS_PER_COLUMN {
        column.split_off(column.len() - DIGITS_PER_COLUMN)
    } else {
        column
    }
}

pub fn decode_digit_column(column: &[BubbleCandidate], threshold: &MarkThreshold) -> DigitReading {
    if column.len() != DIGITS_PER_COLUMN {
        return DigitReading::Missing;
    }
    let filled: Vec<usize> = column
        .iter()
        .enumerate()
        .filter(|(_, bubble)| threshold.is_filled(bubble.mean_intensity))
        .map(|(i, _)| i)
        .collect();
    match filled.as_slice() {
        [digit] => DigitReading::Digit(*digit as u8),
        _ => DigitReading::Error,
    }
}

fn intensities<'a>(candidates: impl Iterator<Item = &'a BubbleCandidate>) -> Vec<f64> {
    candidates.map(|c| c.mean_intensity).collect()
}

fn write_bubbles_debug_image(debug: &ImageDebugWriter, region: RegionId, img: &GrayImage, scan: &BubbleScan) {
    debug.write(&format!("{}_bubbles", region), img, |canvas| {
        draw_bubble_candidates_debug_image_mut(canvas, scan)
    });
}

/// Locates the candidates of a region and checks there are enough of them
/// to be worth decoding.
fn scan_region(
    img: &GrayImage,
    region: RegionId,
    config: &SheetConfig,
    warnings: &mut Vec<SheetWarning>,
    debug: &ImageDebugWriter,
) -> Option<Vec<BubbleCandidate>> {
    let profile = match region {
        RegionId::Identifier => &config.identifier_filter_profile,
        RegionId::AnswerBlock(_) => &config.mcq_filter_profile,
    };
    let scan = find_bubble_candidates(img, region, profile);
    write_bubbles_debug_image(debug, region, img, &scan);
    info!("Found {} potential bubbles in {}", scan.accepted.len(), region);

    if scan.accepted.len() < profile.min_candidates {
        record_warning(
            warnings,
            RegionWarning::TooFewBubbles {
                region,
                expected_at_least: profile.min_candidates,
                found: scan.accepted.len(),
            },
        );
        return None;
    }
    Some(scan.accepted)
}

fn choose_columns(
    candidates: Vec<BubbleCandidate>,
    region: RegionId,
    gap_fraction: f32,
    expected: usize,
    drop_side: DropSide,
    warnings: &mut Vec<SheetWarning>,
) -> Option<Vec<BubbleColumn>> {
    let columns = group_into_columns(candidates, gap_fraction);
    debug!("Clustered {} bubbles into {} columns", region, columns.len());
    match select_columns(columns, expected, drop_side) {
        Ok(columns) => Some(columns),
        Err(found) => {
            record_warning(
                warnings,
                RegionWarning::ColumnCountMismatch {
                    region,
                    expected,
                    found,
                },
            );
            None
        }
    }
}

/// Reads the student identifier from the identifier region. The printed
/// header is cropped off first; each remaining column encodes one digit by
/// which of its ten bubbles is filled.
#[time]
pub fn read_identifier(
    region_image: &GrayImage,
    config: &SheetConfig,
    warnings: &mut Vec<SheetWarning>,
    debug: &ImageDebugWriter,
) -> DecodedIdentifier {
    let region = RegionId::Identifier;
    let height = region_image.height();
    let crop_y = ((height as f32 * config.identifier_header_crop_pct) as u32).min(height.saturating_sub(1));
    let bubble_area =
        image::imageops::crop_imm(region_image, 0, crop_y, region_image.width(), height - crop_y).to_image();

    let identifier = scan_region(&bubble_area, region, config, warnings, debug)
        .and_then(|candidates| {
            choose_columns(
                candidates,
                region,
                config.identifier_filter_profile.column_gap_fraction,
                config.identifier_digit_count,
                // headings and row numbers sit left of the digit grid
                DropSide::Leftmost,
                warnings,
            )
        })
        .map(|columns| {
            let columns: Vec<BubbleColumn> = columns.into_iter().map(trim_digit_column).collect();
            let threshold = derive_threshold(
                &intensities(columns.iter().flatten()),
                config.min_jump_intensity,
                config.threshold_fallback_offset,
            );
            info!("Identifier threshold: {:.2}", threshold.value);

            let digits = columns
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    if column.len() != DIGITS_PER_COLUMN {
                        record_warning(
                            warnings,
                            RegionWarning::InvalidDigitColumn {
                                column: i,
                                found: column.len(),
                            },
                        );
                    }
                    decode_digit_column(column, &threshold)
                })
                .collect();
            DecodedIdentifier { digits }
        })
        .unwrap_or_default();

    if !identifier.is_valid(config.identifier_digit_count) {
        record_warning(
            warnings,
            SheetWarning::IdentifierDecode {
                identifier: identifier.as_string(),
                expected_digits: config.identifier_digit_count,
            },
        );
    }
    identifier
}

/// Reads one answer per question row of an answer block. Questions are
/// numbered continuously across blocks, left to right.
#[time]
pub fn read_answer_block(
    block_image: &GrayImage,
    block_index: usize,
    config: &SheetConfig,
    warnings: &mut Vec<SheetWarning>,
    debug: &ImageDebugWriter,
) -> Vec<DecodedAnswer> {
    let region = RegionId::AnswerBlock(block_index);
    let Some(candidates) = scan_region(block_image, region, config, warnings, debug) else {
        return vec![];
    };
    let Some(columns) = choose_columns(
        candidates,
        region,
        config.mcq_filter_profile.column_gap_fraction,
        CHOICES_PER_QUESTION,
        config.column_drop_side,
        warnings,
    ) else {
        return vec![];
    };

    let kept: Vec<BubbleCandidate> = columns.into_iter().flatten().collect();
    let threshold = derive_threshold(
        &intensities(kept.iter()),
        config.min_jump_intensity,
        config.threshold_fallback_offset,
    );
    info!("{} threshold: {:.2}", region, threshold.value);

    let rows = group_into_rows(kept, config.row_tolerance_px);
    if rows.len() > config.questions_per_block {
        record_warning(
            warnings,
            RegionWarning::ExtraRows {
                region,
                expected: config.questions_per_block,
                found: rows.len(),
            },
        );
    }

    let first_question = block_index * config.questions_per_block;
    let mut answers = vec![];
    for (row_index, row) in rows.into_iter().take(config.questions_per_block).enumerate() {
        let found = row.len();
        let Some(row) = trim_row(row) else {
            record_warning(warnings, RegionWarning::ShortRow { region, row: row_index, found });
            continue;
        };
        if found > CHOICES_PER_QUESTION {
            debug!("{}: row {} trimmed from {} bubbles", region, row_index + 1, found);
        }

        let question = (first_question + row_index + 1) as u32;
        let (choice, filled) = decode_row(&row, &threshold);
        if choice == MarkedChoice::Ambiguous {
            record_warning(warnings, SheetWarning::AmbiguousMark { question, filled });
        }
        answers.push(DecodedAnswer {
            question,
            choice,
            filled,
        });
    }
    answers
}
