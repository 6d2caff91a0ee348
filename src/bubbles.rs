use image::GrayImage;
use imageproc::{point::Point, rect::Rect};
use logging_timer::time;

use crate::{
    config::{DropSide, FilterProfile},
    geometry::{get_contour_bounding_rect, trailing_edge},
    image_utils::{binarize, find_external_contours, mean_intensity_in_contour},
    types::RegionId,
};

/// A shape that passed a region's bubble filter, with its measured fill.
#[derive(Debug, Clone, PartialEq)]
pub struct BubbleCandidate {
    pub region: RegionId,
    pub bounds: Rect,
    pub contour: Vec<Point<i32>>,
    /// Mean gray value inside the contour; lower is darker.
    pub mean_intensity: f64,
}

impl BubbleCandidate {
    /// A candidate whose outline is its bounding box.
    pub fn from_rect(region: RegionId, bounds: Rect, mean_intensity: f64) -> Self {
        let contour = vec![
            Point::new(bounds.left(), bounds.top()),
            Point::new(bounds.right(), bounds.top()),
            Point::new(bounds.right(), bounds.bottom()),
            Point::new(bounds.left(), bounds.bottom()),
        ];
        Self {
            region,
            bounds,
            contour,
            mean_intensity,
        }
    }
}

pub type BubbleColumn = Vec<BubbleCandidate>;
pub type QuestionRow = Vec<BubbleCandidate>;

/// Everything the contour pass found in a region.
#[derive(Debug, Clone, Default)]
pub struct BubbleScan {
    pub accepted: Vec<BubbleCandidate>,
    /// Bounding boxes of contours the filter turned away.
    pub rejected: Vec<Rect>,
}

/// Finds bubble-shaped contours in a region and measures their fill against
/// the unthresholded image.
#[time]
pub fn find_bubble_candidates(img: &GrayImage, region: RegionId, profile: &FilterProfile) -> BubbleScan {
    let binary = binarize(img, &profile.binarization);
    let mut scan = BubbleScan::default();
    for contour in find_external_contours(&binary) {
        let Some(bounds) = get_contour_bounding_rect(&contour.points) else {
            continue;
        };
        if !profile.accepts(&bounds) {
            scan.rejected.push(bounds);
            continue;
        }
        let mean_intensity = mean_intensity_in_contour(img, &contour.points, &bounds);
        scan.accepted.push(BubbleCandidate {
            region,
            bounds,
            contour: contour.points,
            mean_intensity,
        });
    }
    scan
}

pub fn sort_left_to_right(candidates: &mut [BubbleCandidate]) {
    candidates.sort_by_key(|c| (c.bounds.left(), c.bounds.top()));
}

pub fn sort_top_to_bottom(candidates: &mut [BubbleCandidate]) {
    candidates.sort_by_key(|c| (c.bounds.top(), c.bounds.left()));
}

/// Walks candidates left to right and starts a new column whenever the gap
/// between the previous candidate's right edge and the current left edge is
/// wider than `gap_fraction` of the average candidate width.
pub fn group_into_columns(mut candidates: Vec<BubbleCandidate>, gap_fraction: f32) -> Vec<BubbleColumn> {
    if candidates.is_empty() {
        return vec![];
    }
    sort_left_to_right(&mut candidates);
    let average_width = candidates.iter().map(|c| c.bounds.width() as f32).sum::<f32>()
        / candidates.len() as f32;
    let max_gap = average_width * gap_fraction;

    let mut columns: Vec<BubbleColumn> = vec![];
    let mut current: BubbleColumn = vec![];
    for candidate in candidates {
        if let Some(previous) = current.last() {
            let gap = (candidate.bounds.left() - trailing_edge(&previous.bounds)) as f32;
            if gap > max_gap {
                columns.push(std::mem::take(&mut current));
            }
        }
        current.push(candidate);
    }
    columns.push(current);
    columns
}

/// Keeps the expected number of columns. One extra column is treated as a
/// printed header or row-number artifact and dropped from `drop_side`; any
/// other count is an error carrying the number of columns found.
pub fn select_columns(
    mut columns: Vec<BubbleColumn>,
    expected: usize,
    drop_side: DropSide,
) -> Result<Vec<BubbleColumn>, usize> {
    if columns.len() == expected {
        Ok(columns)
    } else if columns.len() == expected + 1 {
        match drop_side {
            DropSide::Leftmost => {
                columns.remove(0);
            }
            DropSide::Rightmost => {
                columns.pop();
            }
        }
        Ok(columns)
    } else {
        Err(columns.len())
    }
}

/// Groups candidates top to bottom; a candidate joins the current row while
/// its top is within `tolerance` pixels of the row's first candidate.
pub fn group_into_rows(mut candidates: Vec<BubbleCandidate>, tolerance: i32) -> Vec<QuestionRow> {
    sort_top_to_bottom(&mut candidates);
    let mut rows: Vec<QuestionRow> = vec![];
    for candidate in candidates {
        match rows.last_mut() {
            Some(row) if (candidate.bounds.top() - row[0].bounds.top()).abs() < tolerance => {
                row.push(candidate)
            }
            _ => rows.push(vec![candidate]),
        }
    }
    rows
}
