//! Renders synthetic answer sheets for end-to-end tests.
//!
//! The layout is chosen so that after rectification and margin cropping the
//! content area is about 866x1268 pixels. All positions below are in content
//! coordinates; `CONTENT_ORIGIN` maps them onto the photographed canvas.

use std::collections::BTreeMap;

use image::{GrayImage, Luma};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut},
    geometric_transformations::{rotate_about_center, Interpolation},
    rect::Rect,
};

use crate::{image_utils::WHITE, types::Choice};

pub const CANVAS_WIDTH: u32 = 1040;
pub const CANVAS_HEIGHT: u32 = 1440;
const MARKER_SIDE: u32 = 40;
const MARKER_INSET: i32 = 40;
const CONTENT_ORIGIN: (i32, i32) = (96, 86);

const BUBBLE_RADIUS: i32 = 9;
const INK: Luma<u8> = Luma([0]);
pub const FILL: Luma<u8> = Luma([30]);

const HORIZONTAL_RULE_Y: i32 = 420;
const IDENTIFIER_COLUMN_XS: [i32; 5] = [300, 360, 420, 480, 540];
const IDENTIFIER_HEADER_COLUMN_X: i32 = 240;
const IDENTIFIER_FIRST_ROW_Y: i32 = 160;
const IDENTIFIER_ROW_PITCH: i32 = 26;

const BLOCK_STARTS: [i32; 4] = [0, 216, 433, 650];
const CHOICE_OFFSETS: [i32; 4] = [60, 100, 140, 180];
const FIRST_QUESTION_Y: i32 = 470;
const QUESTION_PITCH: i32 = 50;
pub const QUESTIONS_PER_BLOCK: u32 = 15;

#[derive(Debug, Clone)]
pub struct SheetSpec {
    pub identifier: Vec<u8>,
    /// Adds a sixth, fully printed column to the left of the identifier grid.
    pub identifier_header_column: bool,
    /// Filled choices per question; questions not listed are left blank.
    pub answers: BTreeMap<u32, Vec<Choice>>,
    pub markers: bool,
    pub rotation_degrees: f32,
}

impl Default for SheetSpec {
    fn default() -> Self {
        Self {
            identifier: vec![1, 2, 3, 4, 5],
            identifier_header_column: false,
            answers: BTreeMap::new(),
            markers: true,
            rotation_degrees: 0.0,
        }
    }
}

fn to_canvas(x: i32, y: i32) -> (i32, i32) {
    (x + CONTENT_ORIGIN.0, y + CONTENT_ORIGIN.1)
}

fn ink_rect(img: &mut GrayImage, x: i32, y: i32, width: u32, height: u32) {
    let (cx, cy) = to_canvas(x, y);
    draw_filled_rect_mut(img, Rect::at(cx, cy).of_size(width, height), INK);
}

fn draw_bubble(img: &mut GrayImage, x: i32, y: i32, filled: bool) {
    let center = to_canvas(x, y);
    draw_hollow_circle_mut(img, center, BUBBLE_RADIUS, INK);
    draw_hollow_circle_mut(img, center, BUBBLE_RADIUS - 1, INK);
    if filled {
        draw_filled_circle_mut(img, center, BUBBLE_RADIUS, FILL);
    }
}

fn draw_markers(img: &mut GrayImage) {
    let far_x = CANVAS_WIDTH as i32 - MARKER_INSET - MARKER_SIDE as i32;
    let far_y = CANVAS_HEIGHT as i32 - MARKER_INSET - MARKER_SIDE as i32;
    for (x, y) in [
        (MARKER_INSET, MARKER_INSET),
        (far_x, MARKER_INSET),
        (MARKER_INSET, far_y),
        (far_x, far_y),
    ] {
        draw_filled_rect_mut(img, Rect::at(x, y).of_size(MARKER_SIDE, MARKER_SIDE), INK);
    }
}

fn draw_identifier_grid(img: &mut GrayImage, spec: &SheetSpec) {
    for (column, x) in IDENTIFIER_COLUMN_XS.iter().enumerate() {
        let digit = spec.identifier.get(column).copied();
        for row in 0..10 {
            let y = IDENTIFIER_FIRST_ROW_Y + row * IDENTIFIER_ROW_PITCH;
            draw_bubble(img, *x, y, digit == Some(row as u8));
        }
    }
    if spec.identifier_header_column {
        for row in 0..10 {
            let y = IDENTIFIER_FIRST_ROW_Y + row * IDENTIFIER_ROW_PITCH;
            draw_bubble(img, IDENTIFIER_HEADER_COLUMN_X, y, false);
        }
    }
}

/// Where the bubble for `choice` on `question` is printed.
pub fn bubble_position(question: u32, choice: Choice) -> (i32, i32) {
    let block = ((question - 1) / QUESTIONS_PER_BLOCK) as usize;
    let row = ((question - 1) % QUESTIONS_PER_BLOCK) as i32;
    (
        BLOCK_STARTS[block] + CHOICE_OFFSETS[choice.index()],
        FIRST_QUESTION_Y + row * QUESTION_PITCH,
    )
}

fn draw_answer_blocks(img: &mut GrayImage, spec: &SheetSpec) {
    for x in &BLOCK_STARTS[1..] {
        ink_rect(img, *x, 450, 3, 800);
    }
    let total = QUESTIONS_PER_BLOCK * BLOCK_STARTS.len() as u32;
    for question in 1..=total {
        let filled = spec.answers.get(&question).map(Vec::as_slice).unwrap_or(&[]);
        for choice in Choice::ALL {
            let (x, y) = bubble_position(question, choice);
            draw_bubble(img, x, y, filled.contains(&choice));
        }
    }
}

/// Draws a complete answer sheet as it would look photographed flat.
pub fn render_sheet(spec: &SheetSpec) -> GrayImage {
    let mut img = GrayImage::from_pixel(CANVAS_WIDTH, CANVAS_HEIGHT, WHITE);
    if spec.markers {
        draw_markers(&mut img);
    }
    ink_rect(&mut img, 10, HORIZONTAL_RULE_Y, 846, 3);
    draw_identifier_grid(&mut img, spec);
    draw_answer_blocks(&mut img, spec);

    if spec.rotation_degrees != 0.0 {
        img = rotate_about_center(
            &img,
            spec.rotation_degrees.to_radians(),
            Interpolation::Bilinear,
            WHITE,
        );
    }
    img
}

/// A page with a few ruled lines and specks but nothing marker-shaped.
pub fn render_blank_page() -> GrayImage {
    let mut img = GrayImage::from_pixel(CANVAS_WIDTH, CANVAS_HEIGHT, WHITE);
    for i in 0..20 {
        draw_filled_rect_mut(&mut img, Rect::at(100, 100 + i * 60).of_size(800, 2), INK);
        draw_filled_rect_mut(&mut img, Rect::at(120 + i * 40, 90 + i * 60).of_size(4, 4), INK);
    }
    img
}
