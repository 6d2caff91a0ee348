use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, RgbImage};
use imageproc::{
    drawing::{draw_cross_mut, draw_hollow_rect_mut, draw_line_segment_mut},
    rect::Rect,
};
use log::{debug, warn};

use crate::{
    alignment::MarkerCandidate,
    bubbles::BubbleScan,
    geometry::Quad,
    image_utils::{BLUE, CYAN, GREEN, PINK, RED},
    regions::SheetRegions,
};

/// Creates a path for a debug image.
pub fn debug_image_path(base: &Path, label: &str) -> PathBuf {
    let mut result = PathBuf::from(base);
    result.set_file_name(format!(
        "{}_debug_{}.png",
        base.file_stem().unwrap_or_default().to_string_lossy(),
        label
    ));
    result
}

/// Writes annotated copies of intermediate images next to the input image.
/// A disabled writer does no work at all.
#[derive(Debug, Clone)]
pub struct ImageDebugWriter {
    input_path: Option<PathBuf>,
}

impl ImageDebugWriter {
    pub fn new(input_path: PathBuf) -> Self {
        Self {
            input_path: Some(input_path),
        }
    }

    pub fn disabled() -> Self {
        Self { input_path: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.input_path.is_some()
    }

    /// Draws onto a color copy of `base` and saves it as
    /// `<stem>_debug_<label>.png`. Failing to save is logged, never fatal.
    pub fn write(&self, label: &str, base: &GrayImage, draw: impl FnOnce(&mut RgbImage)) {
        let Some(input_path) = &self.input_path else {
            return;
        };
        let mut canvas = DynamicImage::ImageLuma8(base.clone()).into_rgb8();
        draw(&mut canvas);
        let path = debug_image_path(input_path, label);
        match canvas.save(&path) {
            Ok(()) => debug!("Wrote debug image {}", path.display()),
            Err(e) => warn!("Could not write debug image {}: {}", path.display(), e),
        }
    }
}

/// Outlines the markers used for alignment and the quad they span.
pub fn draw_alignment_debug_image_mut(canvas: &mut RgbImage, markers: &[MarkerCandidate], quad: &Quad) {
    for marker in markers {
        draw_hollow_rect_mut(canvas, marker.bounds, GREEN);
        draw_cross_mut(
            canvas,
            PINK,
            marker.centroid.x.round() as i32,
            marker.centroid.y.round() as i32,
        );
    }

    let edges = [
        (quad.top_left, quad.top_right),
        (quad.top_right, quad.bottom_right),
        (quad.bottom_right, quad.bottom_left),
        (quad.bottom_left, quad.top_left),
    ];
    for (start, end) in edges {
        draw_line_segment_mut(canvas, (start.x, start.y), (end.x, end.y), BLUE);
    }
}

/// Shows the margin crop, the identifier/answer split and the block bands on
/// the rectified sheet.
pub fn draw_regions_debug_image_mut(canvas: &mut RgbImage, regions: &SheetRegions) {
    let area = regions.content_area;
    draw_hollow_rect_mut(canvas, area, CYAN);

    let split_y = (area.top() + regions.split_y as i32) as f32;
    draw_line_segment_mut(
        canvas,
        (area.left() as f32, split_y),
        (area.right() as f32, split_y),
        PINK,
    );

    let mut x = area.left();
    for block in &regions.answer_blocks {
        let band = Rect::at(x, split_y as i32).of_size(block.width().max(1), block.height().max(1));
        draw_hollow_rect_mut(canvas, band, BLUE);
        x += block.width() as i32;
    }
}

/// Outlines accepted bubble candidates in green and rejected contours in red.
pub fn draw_bubble_candidates_debug_image_mut(canvas: &mut RgbImage, scan: &BubbleScan) {
    for rect in &scan.rejected {
        draw_hollow_rect_mut(canvas, *rect, RED);
    }
    for candidate in &scan.accepted {
        draw_hollow_rect_mut(canvas, candidate.bounds, GREEN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bubbles::BubbleCandidate, image_utils::WHITE, types::RegionId};

    #[test]
    fn debug_path_sits_next_to_input() {
        assert_eq!(
            debug_image_path(Path::new("/scans/sheet-01.jpeg"), "alignment"),
            PathBuf::from("/scans/sheet-01_debug_alignment.png")
        );
    }

    #[test]
    fn disabled_writer_never_draws() {
        let writer = ImageDebugWriter::disabled();
        assert!(!writer.is_enabled());
        let mut called = false;
        writer.write("x", &GrayImage::new(4, 4), |_| called = true);
        assert!(!called);
    }

    #[test]
    fn enabled_writer_saves_annotated_png() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scan.png");
        let writer = ImageDebugWriter::new(input.clone());
        let base = GrayImage::from_pixel(40, 40, WHITE);
        let scan = BubbleScan {
            accepted: vec![BubbleCandidate::from_rect(
                RegionId::Identifier,
                Rect::at(5, 5).of_size(10, 10),
                80.0,
            )],
            rejected: vec![Rect::at(20, 20).of_size(15, 3)],
        };
        writer.write("bubbles", &base, |canvas| {
            draw_bubble_candidates_debug_image_mut(canvas, &scan)
        });

        let saved = image::open(debug_image_path(&input, "bubbles")).unwrap().into_rgb8();
        assert_eq!(*saved.get_pixel(5, 5), GREEN);
        assert_eq!(*saved.get_pixel(20, 20), RED);
        assert_eq!(saved.get_pixel(30, 10)[0], 255);
    }
}
