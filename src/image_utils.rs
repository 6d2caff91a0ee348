use image::{GrayImage, Luma, Rgb};
use imageproc::{
    contours::{find_contours, BorderType, Contour},
    drawing::draw_polygon_mut,
    map::map_colors,
    point::Point,
    rect::Rect,
};

use crate::config::Binarization;

pub const WHITE: Luma<u8> = Luma([u8::MAX]);
pub const BLACK: Luma<u8> = Luma([u8::MIN]);

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const CYAN: Rgb<u8> = Rgb([0, 255, 255]);
pub const PINK: Rgb<u8> = Rgb([255, 0, 255]);

/// Binarizes so that pixels at or below `cutoff` become foreground (white)
/// and everything brighter becomes background (black).
pub fn threshold_inverted(img: &GrayImage, cutoff: u8) -> GrayImage {
    map_colors(img, |p| if p[0] <= cutoff { WHITE } else { BLACK })
}

/// Local-mean adaptive thresholding with an inverted result: a pixel is
/// foreground when it is at least `offset` darker than the mean of the
/// `(2 * block_radius + 1)` square window around it. The window is clamped at
/// the image border.
pub fn adaptive_threshold_inverted(img: &GrayImage, block_radius: u32, offset: f32) -> GrayImage {
    let (width, height) = img.dimensions();
    let (w, h) = (width as usize, height as usize);
    let iw = w + 1;

    // integral[(y + 1) * iw + (x + 1)] = sum of img[0..=y][0..=x]
    let mut integral = vec![0u64; iw * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += img.get_pixel(x as u32, y as u32)[0] as u64;
            integral[(y + 1) * iw + (x + 1)] = row_sum + integral[y * iw + (x + 1)];
        }
    }

    let r = block_radius as usize;
    let mut out = GrayImage::new(width, height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let (x, y) = (x as usize, y as usize);
        let x0 = x.saturating_sub(r);
        let y0 = y.saturating_sub(r);
        let x1 = (x + r).min(w - 1) + 1;
        let y1 = (y + r).min(h - 1) + 1;

        let area = ((x1 - x0) * (y1 - y0)) as f64;
        let sum = integral[y1 * iw + x1] as f64 - integral[y0 * iw + x1] as f64
            - integral[y1 * iw + x0] as f64
            + integral[y0 * iw + x0] as f64;
        let threshold = sum / area - offset as f64;

        let value = img.get_pixel(x as u32, y as u32)[0] as f64;
        *pixel = if value <= threshold { WHITE } else { BLACK };
    }
    out
}

pub fn binarize(img: &GrayImage, binarization: &Binarization) -> GrayImage {
    match *binarization {
        Binarization::Fixed { cutoff } => threshold_inverted(img, cutoff),
        Binarization::Adaptive {
            block_radius,
            offset,
        } => adaptive_threshold_inverted(img, block_radius, offset),
    }
}

/// Morphological opening with a one pixel wide vertical line of the given
/// length. Foreground survives only where it belongs to a vertical run at
/// least `length` pixels long, which keeps ruled lines and drops everything
/// shorter.
pub fn open_vertical(binary: &GrayImage, length: u32) -> GrayImage {
    let (width, height) = binary.dimensions();
    let mut out = GrayImage::new(width, height);
    for x in 0..width {
        let mut y = 0;
        while y < height {
            if binary.get_pixel(x, y)[0] == 0 {
                y += 1;
                continue;
            }
            let start = y;
            while y < height && binary.get_pixel(x, y)[0] != 0 {
                y += 1;
            }
            if y - start >= length {
                for run_y in start..y {
                    out.put_pixel(x, run_y, WHITE);
                }
            }
        }
    }
    out
}

/// Finds the outermost contours of a binary image, i.e. outer borders that
/// are not nested inside another shape.
///
/// Border following only opens an outer border on a background-to-foreground
/// step, so foreground in the first column would be traced as a hole and
/// swallow every shape to its right. The image is traced inside a one pixel
/// background frame and the points are shifted back afterwards.
pub fn find_external_contours(binary: &GrayImage) -> Vec<Contour<i32>> {
    let mut framed = GrayImage::new(binary.width() + 2, binary.height() + 2);
    image::imageops::replace(&mut framed, binary, 1, 1);

    find_contours::<i32>(&framed)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
        .map(|mut contour| {
            for point in &mut contour.points {
                point.x -= 1;
                point.y -= 1;
            }
            contour
        })
        .collect()
}

/// Copies out the part of an image covered by `rect`, clamped to the image.
pub fn crop(img: &GrayImage, rect: &Rect) -> GrayImage {
    let x = rect.left().max(0) as u32;
    let y = rect.top().max(0) as u32;
    let width = rect.width().min(img.width().saturating_sub(x));
    let height = rect.height().min(img.height().saturating_sub(y));
    image::imageops::crop_imm(img, x, y, width, height).to_image()
}

/// Mean gray value of the pixels covered by a rect.
pub fn mean_intensity_in_rect(img: &GrayImage, rect: &Rect) -> f64 {
    let mut sum = 0u64;
    let mut count = 0u64;
    for y in rect.top().max(0)..=rect.bottom().min(img.height() as i32 - 1) {
        for x in rect.left().max(0)..=rect.right().min(img.width() as i32 - 1) {
            sum += img.get_pixel(x as u32, y as u32)[0] as u64;
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    sum as f64 / count as f64
}

/// Mean gray value inside a filled contour. Contours that do not describe a
/// polygon (fewer than three distinct points) fall back to their bounding
/// box.
pub fn mean_intensity_in_contour(img: &GrayImage, contour: &[Point<i32>], bounds: &Rect) -> f64 {
    let mut polygon: Vec<Point<i32>> = Vec::with_capacity(contour.len());
    for point in contour {
        let local = Point::new(point.x - bounds.left(), point.y - bounds.top());
        if polygon.last() != Some(&local) {
            polygon.push(local);
        }
    }
    while polygon.len() > 1 && polygon.first() == polygon.last() {
        polygon.pop();
    }
    if polygon.len() < 3 {
        return mean_intensity_in_rect(img, bounds);
    }

    let mut mask = GrayImage::new(bounds.width(), bounds.height());
    draw_polygon_mut(&mut mask, &polygon, WHITE);

    let mut sum = 0u64;
    let mut count = 0u64;
    for (mx, my, m) in mask.enumerate_pixels() {
        if m[0] == 0 {
            continue;
        }
        let x = bounds.left() + mx as i32;
        let y = bounds.top() + my as i32;
        if x < 0 || y < 0 || x >= img.width() as i32 || y >= img.height() as i32 {
            continue;
        }
        sum += img.get_pixel(x as u32, y as u32)[0] as u64;
        count += 1;
    }
    if count == 0 {
        return mean_intensity_in_rect(img, bounds);
    }
    sum as f64 / count as f64
}
