use image::GrayImage;
use imageproc::rect::Rect;
use log::info;
use logging_timer::time;

use crate::{
    config::{Margins, SheetConfig},
    geometry::get_contour_bounding_rect,
    image_utils::{binarize, crop, find_external_contours, open_vertical},
    types::{record_warning, SegmentationWarning, SheetWarning},
};

/// The semantic regions of a rectified sheet.
#[derive(Debug, Clone)]
pub struct SheetRegions {
    /// Where the margin crop sits within the rectified sheet.
    pub content_area: Rect,
    /// Split between identifier and answer area, relative to the content area.
    pub split_y: u32,
    /// Block boundaries relative to the answer area. Empty when the equal
    /// width fallback was used.
    pub separators: Vec<u32>,
    pub identifier: GrayImage,
    pub answer_blocks: Vec<GrayImage>,
}

/// Trims a fixed fraction from every edge to drop binding shadows and what is
/// left of the corner markers.
pub fn crop_margins(img: &GrayImage, margins: &Margins) -> (GrayImage, Rect) {
    let (width, height) = img.dimensions();
    let left = (width as f32 * margins.left) as u32;
    let right = (width as f32 * margins.right) as u32;
    let top = (height as f32 * margins.top) as u32;
    let bottom = (height as f32 * margins.bottom) as u32;
    let content_width = width.saturating_sub(left + right).max(1);
    let content_height = height.saturating_sub(top + bottom).max(1);
    let area = Rect::at(left as i32, top as i32).of_size(content_width, content_height);
    (crop(img, &area), area)
}

/// Looks for a long, thin horizontal rule and returns its vertical centre.
pub fn find_horizontal_separator(img: &GrayImage, config: &SheetConfig) -> Option<u32> {
    let min_width = img.width() as f32 * config.horizontal_separator_min_width_pct;
    let binary = binarize(img, &config.separator_binarization);
    find_external_contours(&binary)
        .iter()
        .filter_map(|contour| get_contour_bounding_rect(&contour.points))
        .find(|rect| {
            rect.width() as f32 > min_width
                && rect.height() < config.horizontal_separator_max_height_px
        })
        .map(|rect| rect.top() as u32 + rect.height() / 2)
}

/// Finds the x position of each vertical rule between answer blocks.
pub fn find_vertical_separators(img: &GrayImage, config: &SheetConfig) -> Vec<u32> {
    let binary = binarize(img, &config.separator_binarization);
    let lines = open_vertical(&binary, config.vertical_separator_kernel_height);
    let min_height = img.height() as f32 * config.vertical_separator_min_height_pct;

    let mut xs = find_external_contours(&lines)
        .iter()
        .filter_map(|contour| get_contour_bounding_rect(&contour.points))
        .filter(|rect| {
            rect.height() as f32 > min_height
                && rect.width() < config.vertical_separator_max_width_px
        })
        .map(|rect| rect.left() as u32)
        .collect::<Vec<u32>>();
    xs.sort_unstable();

    cluster_positions(&xs, config.vertical_separator_cluster_tolerance_px)
}

/// Groups sorted positions whose gap to the previous position is below
/// `tolerance` and returns the mean of each group.
pub fn cluster_positions(sorted: &[u32], tolerance: u32) -> Vec<u32> {
    let mut clusters: Vec<Vec<u32>> = vec![];
    for &x in sorted {
        match clusters.last_mut() {
            Some(cluster) if x - cluster[cluster.len() - 1] < tolerance => cluster.push(x),
            _ => clusters.push(vec![x]),
        }
    }
    clusters
        .iter()
        .map(|cluster| cluster.iter().sum::<u32>() / cluster.len() as u32)
        .collect()
}

/// Cuts an image into vertical bands at the given x positions.
pub fn split_at_columns(img: &GrayImage, separators: &[u32]) -> Vec<GrayImage> {
    let mut edges = vec![0];
    edges.extend(separators.iter().map(|x| (*x).min(img.width())));
    edges.push(img.width());
    edges
        .windows(2)
        .map(|w| {
            let width = w[1].saturating_sub(w[0]);
            image::imageops::crop_imm(img, w[0], 0, width, img.height()).to_image()
        })
        .collect()
}

/// Equal-width band boundaries for `count` bands.
pub fn equal_width_separators(width: u32, count: usize) -> Vec<u32> {
    let band = width / count as u32;
    (1..count as u32).map(|i| i * band).collect()
}

#[time]
pub fn segment_sheet(
    sheet: &GrayImage,
    config: &SheetConfig,
    warnings: &mut Vec<SheetWarning>,
) -> SheetRegions {
    let (content, content_area) = crop_margins(sheet, &config.margins);
    let height = content.height();

    let split_y = match find_horizontal_separator(&content, config) {
        Some(y) => {
            info!("Found horizontal separator at y={}", y);
            y
        }
        None => {
            let y = (height as f32 * config.horizontal_separator_fallback_pct) as u32;
            record_warning(
                warnings,
                SegmentationWarning::HorizontalSeparatorFallback { fallback_y: y },
            );
            y
        }
    }
    .max(1)
    .min(height.saturating_sub(1));

    let identifier = image::imageops::crop_imm(&content, 0, 0, content.width(), split_y).to_image();
    let answers =
        image::imageops::crop_imm(&content, 0, split_y, content.width(), height - split_y)
            .to_image();

    let expected = config.num_answer_blocks - 1;
    let found = find_vertical_separators(&answers, config);
    let (separators, boundaries) = if found.len() == expected {
        info!("Found vertical separators at x={:?}", found);
        (found.clone(), found)
    } else {
        record_warning(
            warnings,
            SegmentationWarning::VerticalSeparatorFallback {
                expected,
                found: found.len(),
            },
        );
        (
            vec![],
            equal_width_separators(answers.width(), config.num_answer_blocks),
        )
    };

    SheetRegions {
        content_area,
        split_y,
        separators,
        identifier,
        answer_blocks: split_at_columns(&answers, &boundaries),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_utils::WHITE;
    use image::Luma;
    use imageproc::drawing::draw_filled_rect_mut;

    fn page(width: u32, height: u32) -> GrayImage {
        GrayImage::from_pixel(width, height, WHITE)
    }

    fn ink(img: &mut GrayImage, rect: Rect) {
        draw_filled_rect_mut(img, rect, Luma([0]));
    }

    #[test]
    fn margins_are_trimmed_by_fraction() {
        let (cropped, area) = crop_margins(&page(1000, 500), &Margins::default());
        assert_eq!(area, Rect::at(40, 10).of_size(940, 480));
        assert_eq!(cropped.dimensions(), (940, 480));
    }

    #[test]
    fn clusters_nearby_positions() {
        assert_eq!(cluster_positions(&[100, 102, 104, 300, 310, 600], 20), vec![102, 305, 600]);
        assert_eq!(cluster_positions(&[], 20), Vec::<u32>::new());
    }

    #[test]
    fn equal_width_bands_cover_the_image() {
        assert_eq!(equal_width_separators(400, 4), vec![100, 200, 300]);
        let bands = split_at_columns(&page(403, 10), &equal_width_separators(403, 4));
        let widths: Vec<u32> = bands.iter().map(|b| b.width()).collect();
        assert_eq!(widths, vec![100, 100, 100, 103]);
    }

    #[test]
    fn finds_long_thin_horizontal_rule() {
        let mut img = page(500, 400);
        ink(&mut img, Rect::at(20, 150).of_size(460, 3));
        ink(&mut img, Rect::at(20, 300).of_size(100, 3));
        let y = find_horizontal_separator(&img, &SheetConfig::default()).unwrap();
        assert!((150..=153).contains(&y), "{}", y);
    }

    #[test]
    fn short_rules_are_not_separators() {
        let mut img = page(500, 400);
        ink(&mut img, Rect::at(20, 150).of_size(300, 3));
        ink(&mut img, Rect::at(20, 200).of_size(460, 40));
        assert_eq!(find_horizontal_separator(&img, &SheetConfig::default()), None);
    }

    #[test]
    fn finds_vertical_rules_and_ignores_short_strokes() {
        let mut img = page(800, 600);
        for x in [200, 400, 600] {
            ink(&mut img, Rect::at(x, 20).of_size(3, 550));
        }
        // bubble-sized blobs must not count
        for y in (50..550).step_by(40) {
            ink(&mut img, Rect::at(100, y).of_size(18, 18));
        }
        let xs = find_vertical_separators(&img, &SheetConfig::default());
        assert_eq!(xs.len(), 3, "{:?}", xs);
        for (found, expected) in xs.iter().zip([200, 400, 600]) {
            assert!(found.abs_diff(expected) <= 2, "{:?}", xs);
        }
    }

    #[test]
    fn segments_with_detected_separators() {
        let mut img = page(1000, 1000);
        ink(&mut img, Rect::at(60, 300).of_size(900, 3));
        for x in [260, 480, 700] {
            ink(&mut img, Rect::at(x, 350).of_size(3, 600));
        }
        let mut warnings = vec![];
        let regions = segment_sheet(&img, &SheetConfig::default(), &mut warnings);
        assert!(warnings.is_empty(), "{:?}", warnings);
        assert_eq!(regions.answer_blocks.len(), 4);
        assert_eq!(regions.separators.len(), 3);
        assert!(regions.split_y.abs_diff(281) <= 2, "{}", regions.split_y);
        assert_eq!(regions.identifier.height(), regions.split_y);
    }

    #[test]
    fn falls_back_to_fixed_splits_with_warnings() {
        let img = page(1000, 1000);
        let mut warnings = vec![];
        let regions = segment_sheet(&img, &SheetConfig::default(), &mut warnings);
        assert_eq!(regions.split_y, (960.0 * 0.22) as u32);
        assert_eq!(regions.answer_blocks.len(), 4);
        assert!(regions.separators.is_empty());
        assert_eq!(
            warnings,
            vec![
                SheetWarning::Segmentation(SegmentationWarning::HorizontalSeparatorFallback {
                    fallback_y: 211
                }),
                SheetWarning::Segmentation(SegmentationWarning::VerticalSeparatorFallback {
                    expected: 3,
                    found: 0
                }),
            ]
        );
    }
}
