use imageproc::point::Point;
use imageproc::rect::Rect;

use crate::types::Size;

pub type Point2D = Point<f32>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: Point2D,
    pub end: Point2D,
}

impl Segment {
    pub fn new(start: Point2D, end: Point2D) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f32 {
        distance_from_point_to_point(&self.start, &self.end)
    }
}

pub fn distance_from_point_to_point(p1: &Point2D, p2: &Point2D) -> f32 {
    ((p1.x - p2.x).powf(2.0) + (p1.y - p2.y).powf(2.0)).sqrt()
}

pub fn center_of_rect(rect: &Rect) -> Point2D {
    Point::new(
        rect.left() as f32 + rect.width() as f32 / 2.0,
        rect.top() as f32 + rect.height() as f32 / 2.0,
    )
}

pub fn aspect_ratio(rect: &Rect) -> f32 {
    rect.width() as f32 / rect.height() as f32
}

/// The x coordinate just past the right edge of a rect.
pub fn trailing_edge(rect: &Rect) -> i32 {
    rect.left() + rect.width() as i32
}

/// Gets the smallest axis-aligned rect containing every contour point.
pub fn get_contour_bounding_rect(points: &[Point<i32>]) -> Option<Rect> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for point in points {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }
    Some(Rect::at(min_x, min_y).of_size((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32))
}

/// Spatial moments of a closed polygon, computed with Green's theorem over
/// its edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContourMoments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl ContourMoments {
    pub fn of(points: &[Point<i32>]) -> Self {
        let mut m00 = 0.0;
        let mut m10 = 0.0;
        let mut m01 = 0.0;
        for (i, p) in points.iter().enumerate() {
            let q = &points[(i + 1) % points.len()];
            let (x0, y0, x1, y1) = (p.x as f64, p.y as f64, q.x as f64, q.y as f64);
            let cross = x0 * y1 - x1 * y0;
            m00 += cross;
            m10 += (x0 + x1) * cross;
            m01 += (y0 + y1) * cross;
        }
        Self {
            m00: m00 / 2.0,
            m10: m10 / 6.0,
            m01: m01 / 6.0,
        }
    }

    pub fn area(&self) -> f64 {
        self.m00.abs()
    }

    /// The area-weighted centroid, or `None` when the polygon encloses no area.
    pub fn centroid(&self) -> Option<Point2D> {
        if self.m00 == 0.0 {
            return None;
        }
        Some(Point::new(
            (self.m10 / self.m00) as f32,
            (self.m01 / self.m00) as f32,
        ))
    }
}

/// Four sheet corners in canonical order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub top_left: Point2D,
    pub top_right: Point2D,
    pub bottom_left: Point2D,
    pub bottom_right: Point2D,
}

impl Quad {
    /// Orders four marker centroids by coordinate sum and difference: the
    /// smallest `x + y` is top-left, the largest bottom-right, the largest
    /// `x - y` top-right and the smallest bottom-left. Returns `None` when two
    /// corners resolve to the same centroid.
    pub fn from_centroids(points: [Point2D; 4]) -> Option<Self> {
        let index_by = |key: fn(&Point2D) -> f32, pick_max: bool| -> usize {
            let mut best = 0;
            for i in 1..points.len() {
                let (candidate, current) = (key(&points[i]), key(&points[best]));
                if (pick_max && candidate > current) || (!pick_max && candidate < current) {
                    best = i;
                }
            }
            best
        };
        let sum = |p: &Point2D| p.x + p.y;
        let diff = |p: &Point2D| p.x - p.y;

        let top_left = index_by(sum, false);
        let bottom_right = index_by(sum, true);
        let top_right = index_by(diff, true);
        let bottom_left = index_by(diff, false);

        let mut used = [top_left, top_right, bottom_left, bottom_right];
        used.sort_unstable();
        if used.windows(2).any(|w| w[0] == w[1]) {
            return None;
        }

        Some(Self {
            top_left: points[top_left],
            top_right: points[top_right],
            bottom_left: points[bottom_left],
            bottom_right: points[bottom_right],
        })
    }

    pub fn corners(&self) -> [Point2D; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_left,
            self.bottom_right,
        ]
    }

    /// Size of the upright rectangle this quad is rectified into. Each side
    /// takes the longer of the two opposing edges so keystoned sheets are
    /// never shrunk.
    pub fn rectified_size(&self) -> Size<u32> {
        let top = Segment::new(self.top_left, self.top_right).length();
        let bottom = Segment::new(self.bottom_left, self.bottom_right).length();
        let left = Segment::new(self.top_left, self.bottom_left).length();
        let right = Segment::new(self.top_right, self.bottom_right).length();
        Size {
            width: (top as u32).max(bottom as u32).max(1),
            height: (left as u32).max(right as u32).max(1),
        }
    }
}
