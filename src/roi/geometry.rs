//! Integer polygon geometry for ROI regions.
//!
//! Polygons are implicitly closed: the last vertex connects back to the first.
//! All arithmetic is exact (i128 products of i32-range coordinates), so
//! results do not depend on which vertex the list starts from.

/// A polygon vertex in frame pixel space.
pub type Vertex = [i32; 2];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    Inside,
    Boundary,
    Outside,
}

impl Placement {
    /// Boundary counts as inside for region membership.
    pub fn is_member(self) -> bool {
        !matches!(self, Placement::Outside)
    }
}

/// Locate a point relative to a closed polygon.
///
/// Boundary points are reported before the even-odd interior test runs, so a
/// point on any edge (including the closing edge) is always `Boundary`.
pub fn locate(point: (i64, i64), polygon: &[Vertex]) -> Placement {
    let (px, py) = (point.0 as i128, point.1 as i128);
    let n = polygon.len();
    if n == 0 {
        return Placement::Outside;
    }

    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        if on_segment(px, py, a, b) {
            return Placement::Boundary;
        }
    }

    if n < 3 {
        return Placement::Outside;
    }

    let mut inside = false;
    for i in 0..n {
        let (ax, ay) = (polygon[i][0] as i128, polygon[i][1] as i128);
        let j = (i + 1) % n;
        let (bx, by) = (polygon[j][0] as i128, polygon[j][1] as i128);

        if (ay > py) == (by > py) {
            continue;
        }

        // Crossing when px lies left of the edge's x at height py.
        let dy = by - ay;
        let lhs = (px - ax) * dy;
        let rhs = (bx - ax) * (py - ay);
        let left = if dy > 0 { lhs < rhs } else { lhs > rhs };
        if left {
            inside = !inside;
        }
    }

    if inside {
        Placement::Inside
    } else {
        Placement::Outside
    }
}

fn on_segment(px: i128, py: i128, a: Vertex, b: Vertex) -> bool {
    let (ax, ay) = (a[0] as i128, a[1] as i128);
    let (bx, by) = (b[0] as i128, b[1] as i128);
    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    cross == 0 && px >= ax.min(bx) && px <= ax.max(bx) && py >= ay.min(by) && py <= ay.max(by)
}

/// Area-weighted centroid of the polygon.
///
/// Returns `None` for degenerate polygons (zero signed area), where the
/// centroid denominator vanishes.
pub fn centroid(polygon: &[Vertex]) -> Option<(f64, f64)> {
    let n = polygon.len();
    if n < 3 {
        return None;
    }

    let mut twice_area: i128 = 0;
    let mut sum_x: i128 = 0;
    let mut sum_y: i128 = 0;
    for i in 0..n {
        let (x0, y0) = (polygon[i][0] as i128, polygon[i][1] as i128);
        let j = (i + 1) % n;
        let (x1, y1) = (polygon[j][0] as i128, polygon[j][1] as i128);
        let cross = x0 * y1 - x1 * y0;
        twice_area += cross;
        sum_x += (x0 + x1) * cross;
        sum_y += (y0 + y1) * cross;
    }

    if twice_area == 0 {
        return None;
    }

    let denom = 3.0 * twice_area as f64;
    Some((sum_x as f64 / denom, sum_y as f64 / denom))
}
