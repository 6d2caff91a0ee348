use std::fmt::Display;

use image::GrayImage;
use imageproc::{
    filter::gaussian_blur_f32,
    geometric_transformations::{warp_into, Interpolation, Projection},
    rect::Rect,
};
use log::{debug, error, info};
use logging_timer::time;

use crate::{
    config::MarkerProfile,
    geometry::{aspect_ratio, center_of_rect, get_contour_bounding_rect, ContourMoments, Point2D, Quad},
    image_utils::{find_external_contours, threshold_inverted, WHITE},
};

/// A dark, near-square blob that could be one of the corner markers.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerCandidate {
    pub bounds: Rect,
    pub area: f64,
    pub centroid: Point2D,
}

/// The rectified sheet along with what was used to rectify it.
#[derive(Debug, Clone)]
pub struct AlignedSheet {
    pub image: GrayImage,
    pub quad: Quad,
    pub markers: Vec<MarkerCandidate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlignmentError {
    /// Fewer than four blobs passed the marker shape filter.
    TooFewMarkers { found: usize },
    /// The four largest markers do not form a quadrilateral.
    DegenerateQuad { centroids: Vec<Point2D> },
    /// No perspective transform maps the markers onto a rectangle.
    ProjectionFailed { quad: Quad },
}

impl Display for AlignmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlignmentError::TooFewMarkers { found } => write!(
                f,
                "alignment failed: found {} fiducial markers, need 4",
                found
            ),
            AlignmentError::DegenerateQuad { centroids } => {
                write!(f, "alignment failed: markers at ")?;
                for (i, c) in centroids.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "({:.1}, {:.1})", c.x, c.y)?;
                }
                write!(f, " do not form a quadrilateral")
            }
            AlignmentError::ProjectionFailed { quad } => write!(
                f,
                "alignment failed: no perspective transform for quad {:?}",
                quad
            ),
        }
    }
}

impl std::error::Error for AlignmentError {}

/// Determines whether a blob could be a fiducial marker based on its shape.
pub fn blob_could_be_marker(profile: &MarkerProfile, bounds: &Rect, area: f64) -> bool {
    let ar = aspect_ratio(bounds);
    ar >= profile.min_aspect
        && ar <= profile.max_aspect
        && area > profile.min_area
        && area < profile.max_area
}

#[time]
pub fn find_marker_candidates(profile: &MarkerProfile, img: &GrayImage) -> Vec<MarkerCandidate> {
    let blurred = gaussian_blur_f32(img, profile.blur_sigma);
    let binary = threshold_inverted(&blurred, profile.cutoff);

    find_external_contours(&binary)
        .iter()
        .filter_map(|contour| {
            let bounds = get_contour_bounding_rect(&contour.points)?;
            let moments = ContourMoments::of(&contour.points);
            let area = moments.area();
            if !blob_could_be_marker(profile, &bounds, area) {
                return None;
            }
            Some(MarkerCandidate {
                bounds,
                area,
                centroid: moments.centroid().unwrap_or_else(|| center_of_rect(&bounds)),
            })
        })
        .collect()
}

/// Picks the four largest marker candidates and orders their centroids into
/// the sheet's corners.
pub fn find_fiducial_quad(
    candidates: &[MarkerCandidate],
) -> Result<(Quad, Vec<MarkerCandidate>), AlignmentError> {
    info!("Found {} potential fiducial markers.", candidates.len());
    if candidates.len() < 4 {
        error!("Could not find 4 fiducial markers. Alignment failed.");
        return Err(AlignmentError::TooFewMarkers {
            found: candidates.len(),
        });
    }

    let mut largest = candidates.to_vec();
    largest.sort_by(|a, b| b.area.total_cmp(&a.area));
    largest.truncate(4);

    let centroids = [
        largest[0].centroid,
        largest[1].centroid,
        largest[2].centroid,
        largest[3].centroid,
    ];
    let quad = Quad::from_centroids(centroids).ok_or_else(|| AlignmentError::DegenerateQuad {
        centroids: centroids.to_vec(),
    })?;
    debug!("Fiducial quad: {:?}", quad);
    Ok((quad, largest))
}

/// Resamples the quad's contents into an upright rectangle.
#[time]
pub fn rectify(img: &GrayImage, quad: &Quad) -> Result<GrayImage, AlignmentError> {
    let size = quad.rectified_size();
    let right = (size.width - 1) as f32;
    let bottom = (size.height - 1) as f32;
    let from = quad.corners().map(|p| (p.x, p.y));
    let to = [(0.0, 0.0), (right, 0.0), (0.0, bottom), (right, bottom)];

    let projection = Projection::from_control_points(from, to)
        .ok_or(AlignmentError::ProjectionFailed { quad: *quad })?;

    let mut out = GrayImage::new(size.width, size.height);
    warp_into(img, &projection, Interpolation::Bilinear, WHITE, &mut out);
    Ok(out)
}

/// Finds the corner markers and produces the de-skewed sheet.
#[time]
pub fn align_sheet(img: &GrayImage, profile: &MarkerProfile) -> Result<AlignedSheet, AlignmentError> {
    let candidates = find_marker_candidates(profile, img);
    let (quad, markers) = find_fiducial_quad(&candidates)?;
    let image = rectify(img, &quad)?;
    info!(
        "Rectified sheet to {}x{}",
        image.width(),
        image.height()
    );
    Ok(AlignedSheet {
        image,
        quad,
        markers,
    })
}
