//! Grades photographed multiple-choice answer sheets.
//!
//! A sheet carries four square fiducial markers in its corners, a grid of
//! identifier bubbles (one column per digit) and several blocks of four-choice
//! question rows. [`interpret::interpret_sheet`] aligns the photograph, reads
//! both grids and grades the answers against an [`answer_key::AnswerKey`].

pub mod alignment;
pub mod answer_key;
pub mod bubbles;
pub mod config;
pub mod debug;
pub mod decode;
pub mod geometry;
pub mod grading;
pub mod image_utils;
pub mod interpret;
pub mod marks;
pub mod regions;
pub mod types;

#[cfg(test)]
mod test_utils;
