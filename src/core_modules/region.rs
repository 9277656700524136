// THEORY:
// The `region` module holds the geometric data containers of the spot engine.
// A `Region` is one detected spot: a closed polygon traced around a connected
// patch of mask pixels. A `MergedRegion` is what the spatial grouper produces
// when several nearby spots are folded into one logical group.
//
// Key architectural principles:
// 1.  **Dumb Containers**: Like the pixel types, these structs carry data and the
//     closed-form geometry derived from it (area, centroid). They do not know how
//     they were found or how they will be measured.
// 2.  **Validity by Construction**: A `Region` can only be built from a polygon
//     with a non-zero enclosed area. Degenerate contours (single pixels, one-pixel
//     wide lines) are rejected at the constructor, so every downstream consumer can
//     rely on `area > 0`.
// 3.  **One Area Formula**: Automatic contours and manually drawn polygons both go
//     through the same shoelace computation, which keeps the two provenance paths
//     comparable.

/// A 2D integer point in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<imageproc::point::Point<i32>> for Point {
    fn from(p: imageproc::point::Point<i32>) -> Self {
        Self { x: p.x, y: p.y }
    }
}

impl From<Point> for imageproc::point::Point<i32> {
    fn from(p: Point) -> Self {
        imageproc::point::Point::new(p.x, p.y)
    }
}

/// Zeroth and first order area moments of a closed polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolygonMoments {
    /// Signed enclosed area; the sign follows the winding direction.
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl PolygonMoments {
    /// Computes the moments with the Green's theorem form of the shoelace sum.
    /// The polygon is implicitly closed (last point connects to the first).
    pub fn of(points: &[Point]) -> Self {
        Self::accumulate(points.len(), |i| (points[i].x as f64, points[i].y as f64))
    }

    /// Same as [`PolygonMoments::of`] for sub-pixel vertices.
    pub fn of_vertices(vertices: &[(f64, f64)]) -> Self {
        Self::accumulate(vertices.len(), |i| vertices[i])
    }

    fn accumulate(n: usize, vertex: impl Fn(usize) -> (f64, f64)) -> Self {
        let mut a = 0.0;
        let mut cx = 0.0;
        let mut cy = 0.0;
        if n < 3 {
            return Self { m00: 0.0, m10: 0.0, m01: 0.0 };
        }
        for i in 0..n {
            let (x0, y0) = vertex(i);
            let (x1, y1) = vertex((i + 1) % n);
            let cross = x0 * y1 - x1 * y0;
            a += cross;
            cx += (x0 + x1) * cross;
            cy += (y0 + y1) * cross;
        }
        Self {
            m00: a / 2.0,
            m10: cx / 6.0,
            m01: cy / 6.0,
        }
    }

    /// Center of mass, or `None` when the polygon encloses no area.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        if self.m00 == 0.0 {
            None
        } else {
            Some((self.m10 / self.m00, self.m01 / self.m00))
        }
    }
}

/// Enclosed area of a closed polygon (shoelace formula), always non-negative.
pub fn polygon_area(points: &[Point]) -> f64 {
    PolygonMoments::of(points).m00.abs()
}

/// A single detected spot.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Ordered boundary points of the contour.
    pub points: Vec<Point>,
    /// Enclosed area in pixel², always > 0.
    pub area: f64,
    /// Area-moment centroid (cx, cy).
    pub centroid: (f64, f64),
}

impl Region {
    /// Builds a region from a boundary polygon. Returns `None` for degenerate
    /// polygons whose enclosed area is zero.
    pub fn from_polygon(points: Vec<Point>) -> Option<Self> {
        let moments = PolygonMoments::of(&points);
        let centroid = moments.centroid()?;
        Some(Self {
            area: moments.m00.abs(),
            centroid,
            points,
        })
    }

    /// Builds a region from sub-pixel vertices. Area and centroid come from the
    /// exact vertices; `points` holds them rounded for drawing.
    pub fn from_vertices(vertices: &[(f64, f64)]) -> Option<Self> {
        let moments = PolygonMoments::of_vertices(vertices);
        let centroid = moments.centroid()?;
        let points = vertices
            .iter()
            .map(|&(x, y)| Point::new(x.round() as i32, y.round() as i32))
            .collect();
        Some(Self {
            area: moments.m00.abs(),
            centroid,
            points,
        })
    }

    /// Axis-aligned bounding box as (top-left, bottom-right).
    pub fn bounding_box(&self) -> (Point, Point) {
        bounding_box(&self.points)
    }
}

/// The result of folding one cluster of regions into a single group.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRegion {
    /// Convex hull of every member region's boundary points.
    pub hull: Vec<Point>,
    /// Enclosed area of the hull in pixel².
    pub area: f64,
    /// Number of regions folded into this group (always >= 1).
    pub member_count: usize,
    /// Mean of the member centroids.
    pub center: (f64, f64),
}

pub(crate) fn bounding_box(points: &[Point]) -> (Point, Point) {
    let mut min = Point::new(i32::MAX, i32::MAX);
    let mut max = Point::new(i32::MIN, i32::MIN);
    for p in points {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    (min, max)
}
