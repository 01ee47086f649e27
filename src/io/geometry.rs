use serde::{Deserialize, Serialize};

use super::input::Point;
use crate::error::{AnalysisError, Result};

/// Index of the point in `points` closest to `target`, lowest index on ties.
pub fn nearest_index_in(points: &[Point], target: &Point) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, p) in points.iter().enumerate() {
        let d = p.distance_to(target);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((i, d)),
        }
    }
    best.map(|(i, _)| i)
}

/// Sum of consecutive-point distances.
pub fn polyline_length(points: &[Point]) -> f64 {
    points.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}

/// Closed outline of the organism in one frame.
///
/// Insertion order of `points` is the traversal order around the boundary;
/// the last point connects back to the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawContour")]
pub struct Contour {
    pub id: u32,
    points: Vec<Point>,
}

#[derive(Deserialize)]
struct RawContour {
    id: u32,
    points: Vec<Point>,
}

impl TryFrom<RawContour> for Contour {
    type Error = AnalysisError;

    fn try_from(raw: RawContour) -> Result<Self> {
        Contour::new(raw.id, raw.points)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl Contour {
    pub const MIN_POINTS: usize = 3;

    pub fn new(id: u32, points: Vec<Point>) -> Result<Self> {
        if points.len() < Self::MIN_POINTS {
            return Err(AnalysisError::TooFewPoints {
                found: points.len(),
                required: Self::MIN_POINTS,
            });
        }
        Ok(Contour { id, points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn nearest_index(&self, target: &Point) -> usize {
        // a contour always holds at least MIN_POINTS points
        nearest_index_in(&self.points, target).unwrap_or(0)
    }

    pub fn nearest_point(&self, target: &Point) -> Point {
        self.points[self.nearest_index(target)]
    }

    /// Index of the first point that minimises (or maximises) the given axis.
    pub fn extreme_index(&self, axis: Axis, maximum: bool) -> usize {
        let coord = |p: &Point| match axis {
            Axis::X => p.x,
            Axis::Y => p.y,
        };
        let mut best = 0;
        for (i, p) in self.points.iter().enumerate().skip(1) {
            let better = if maximum {
                coord(p) > coord(&self.points[best])
            } else {
                coord(p) < coord(&self.points[best])
            };
            if better {
                best = i;
            }
        }
        best
    }

    /// Indices of the shorter way around the contour from `from` to `to`,
    /// both ends included and ordered starting at `from`.
    ///
    /// Length is counted in points. On a tie the path that does not wrap
    /// past the end of the point list wins.
    pub fn shorter_path_indices(&self, from: usize, to: usize) -> Vec<usize> {
        let n = self.points.len();
        let (lo, hi) = if from <= to { (from, to) } else { (to, from) };

        let inner_len = hi - lo + 1;
        let wrap_len = n - hi + lo + 1;

        let mut path: Vec<usize> = if inner_len <= wrap_len {
            (lo..=hi).collect()
        } else {
            (hi..n).chain(0..=lo).collect()
        };

        if path.first() != Some(&from) {
            path.reverse();
        }
        path
    }

    /// The longer way around, complementary to [`Contour::shorter_path_indices`].
    pub fn longer_path_indices(&self, from: usize, to: usize) -> Vec<usize> {
        let n = self.points.len();
        let shorter = self.shorter_path_indices(from, to);
        if from == to {
            // full loop back to the start
            return (0..=n).map(|k| (from + k) % n).collect();
        }
        let forward_is_shorter = shorter.len() < 2 || shorter[1] == (from + 1) % n;
        if forward_is_shorter {
            // walk backwards from `from`
            let len = n - shorter.len() + 2;
            (0..len).map(|k| (from + n - k) % n).collect()
        } else {
            let len = n - shorter.len() + 2;
            (0..len).map(|k| (from + k) % n).collect()
        }
    }

    /// Points along the shorter path between two contour indices, starting at `from`.
    pub fn path_between(&self, from: usize, to: usize) -> Vec<Point> {
        self.shorter_path_indices(from, to)
            .into_iter()
            .map(|i| self.points[i])
            .collect()
    }

    /// Length of the shorter contour path between the points nearest to `p1`
    /// and `p2`. Falls back to the straight-line distance when both snap to
    /// the same contour point.
    pub fn arc_length_between(&self, p1: &Point, p2: &Point) -> f64 {
        let a = self.nearest_index(p1);
        let b = self.nearest_index(p2);
        if a == b {
            return p1.distance_to(p2);
        }
        polyline_length(&self.path_between(a, b))
    }

    /// Full perimeter including the closing edge.
    pub fn perimeter(&self) -> f64 {
        let n = self.points.len();
        polyline_length(&self.points) + self.points[n - 1].distance_to(&self.points[0])
    }

    /// Returns (min corner, max corner).
    pub fn bounding_box(&self) -> (Point, Point) {
        let mut min = self.points[0];
        let mut max = self.points[0];
        for p in &self.points[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        (min, max)
    }

    pub fn centroid(&self) -> Point {
        let n = self.points.len() as f64;
        let (sx, sy) = self
            .points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / n, sy / n)
    }

    /// Shoelace area.
    pub fn area(&self) -> f64 {
        let n = self.points.len();
        let mut sum = 0.0_f64;
        for i in 0..n {
            let p1 = &self.points[i];
            let p2 = &self.points[(i + 1) % n];
            sum += p1.x * p2.y - p2.x * p1.y;
        }
        0.5 * sum.abs()
    }
}

/// Open curve along the body from head to tail.
///
/// The first point is exactly the head and the last exactly the tail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct Midline {
    points: Vec<Point>,
}

impl TryFrom<Vec<Point>> for Midline {
    type Error = AnalysisError;

    fn try_from(points: Vec<Point>) -> Result<Self> {
        Midline::from_points(points)
    }
}

impl From<Midline> for Vec<Point> {
    fn from(m: Midline) -> Self {
        m.points
    }
}

impl Midline {
    pub const MIN_POINTS: usize = 3;

    /// Builds `head, interior.., tail`, whatever smoothing produced the interior.
    pub fn with_endpoints<I>(head: Point, interior: I, tail: Point) -> Result<Self>
    where
        I: IntoIterator<Item = Point>,
    {
        let mut points = vec![head];
        points.extend(interior);
        points.push(tail);
        Self::from_points(points)
    }

    pub fn from_points(points: Vec<Point>) -> Result<Self> {
        if points.len() < Self::MIN_POINTS {
            return Err(AnalysisError::TooFewPoints {
                found: points.len(),
                required: Self::MIN_POINTS,
            });
        }
        Ok(Midline { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn head(&self) -> Point {
        self.points[0]
    }

    pub fn tail(&self) -> Point {
        self.points[self.points.len() - 1]
    }

    pub fn length(&self) -> f64 {
        polyline_length(&self.points)
    }

    pub fn nearest_index(&self, target: &Point) -> usize {
        nearest_index_in(&self.points, target).unwrap_or(0)
    }

    /// Points between two midline indices in head-to-tail order, both included.
    pub fn segment(&self, a: usize, b: usize) -> &[Point] {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        &self.points[lo..=hi]
    }

    /// Length along the midline between the points nearest to `p1` and `p2`.
    /// No wraparound; straight-line distance when both map to one index.
    pub fn arc_length_between(&self, p1: &Point, p2: &Point) -> f64 {
        let a = self.nearest_index(p1);
        let b = self.nearest_index(p2);
        if a == b {
            return p1.distance_to(p2);
        }
        polyline_length(self.segment(a, b))
    }
}

#[cfg(test)]
mod geometry_tests {
    use super::*;
    use crate::utils::test_utils::{larva_contour, regular_polygon, square_contour};
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_contour_requires_three_points() {
        let err = Contour::new(0, vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)]).unwrap_err();
        assert_eq!(
            err,
            AnalysisError::TooFewPoints {
                found: 2,
                required: 3
            }
        );
    }

    #[test]
    fn test_nearest_index_ties_prefer_lowest() {
        let c = square_contour();
        // (0.5, 0.0) is equally close to (0,0) at index 0 and (1,0) at index 1
        assert_eq!(c.nearest_index(&Point::new(0.5, 0.0)), 0);
        assert_eq!(c.nearest_index(&Point::new(0.9, 0.1)), 1);
    }

    #[test]
    fn test_shorter_path_wraps_when_shorter() {
        let c = regular_polygon(10, 10.0, Point::new(0.0, 0.0));
        assert_eq!(c.shorter_path_indices(1, 8), vec![1, 0, 9, 8]);
        assert_eq!(c.shorter_path_indices(8, 1), vec![8, 9, 0, 1]);
        assert_eq!(c.shorter_path_indices(2, 4), vec![2, 3, 4]);
        assert_eq!(c.shorter_path_indices(4, 2), vec![4, 3, 2]);
    }

    #[test]
    fn test_shorter_path_tie_prefers_non_wrapping() {
        let c = regular_polygon(10, 10.0, Point::new(0.0, 0.0));
        // 2..=7 and 7..=9,0..=2 both hold 6 points
        assert_eq!(c.shorter_path_indices(7, 2), vec![7, 6, 5, 4, 3, 2]);
        assert_eq!(c.shorter_path_indices(2, 7), vec![2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_longer_path_is_complement() {
        let c = regular_polygon(10, 10.0, Point::new(0.0, 0.0));
        assert_eq!(c.longer_path_indices(1, 3), vec![1, 0, 9, 8, 7, 6, 5, 4, 3]);
        assert_eq!(c.longer_path_indices(1, 8), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let short = c.shorter_path_indices(7, 2);
        let long = c.longer_path_indices(7, 2);
        assert_eq!(short.len() + long.len(), c.len() + 2);
        assert_eq!(long.first(), Some(&7));
        assert_eq!(long.last(), Some(&2));
    }

    #[test]
    fn test_arc_length_half_circle() {
        let n = 200;
        let r = 50.0;
        let c = regular_polygon(n, r, Point::new(100.0, 100.0));
        let p1 = c.points()[0];
        let p2 = c.points()[n / 2];
        let arc = c.arc_length_between(&p1, &p2);
        let perimeter = c.perimeter();

        assert_relative_eq!(arc, PI * r, max_relative = 1e-3);
        assert!(arc <= perimeter - arc + 1e-9);

        let p3 = c.points()[n / 2 + 3];
        let arc_short = c.arc_length_between(&p1, &p3);
        assert!(arc_short <= perimeter - arc_short);
    }

    #[test]
    fn test_arc_length_same_nearest_index_uses_straight_line() {
        let c = square_contour();
        let p1 = Point::new(0.1, 0.0);
        let p2 = Point::new(0.0, 0.1);
        assert_relative_eq!(c.arc_length_between(&p1, &p2), p1.distance_to(&p2));
    }

    #[test]
    fn test_bounding_box_area_centroid() {
        let c = square_contour();
        let (min, max) = c.bounding_box();
        assert_eq!(min, Point::new(0.0, 0.0));
        assert_eq!(max, Point::new(1.0, 1.0));
        assert_relative_eq!(c.area(), 1.0);
        assert_relative_eq!(c.centroid().x, 0.5);
        assert_relative_eq!(c.perimeter(), 4.0);
    }

    #[test]
    fn test_extreme_index() {
        let c = larva_contour(Point::new(100.0, 100.0), 60.0, 12.0, 0.0, 80);
        let top = c.extreme_index(Axis::Y, false);
        let bottom = c.extreme_index(Axis::Y, true);
        for p in c.points() {
            assert!(c.points()[top].y <= p.y);
            assert!(c.points()[bottom].y >= p.y);
        }
    }

    #[test]
    fn test_midline_endpoints_and_arc_length() -> anyhow::Result<()> {
        let head = Point::new(0.0, 0.0);
        let tail = Point::new(10.0, 0.0);
        let interior = (1..10).map(|i| Point::new(i as f64, 0.0));
        let m = Midline::with_endpoints(head, interior, tail)?;
        assert_eq!(m.head(), head);
        assert_eq!(m.tail(), tail);
        assert_eq!(m.len(), 11);
        assert_relative_eq!(m.length(), 10.0);
        assert_relative_eq!(
            m.arc_length_between(&Point::new(2.0, 1.0), &Point::new(7.0, -1.0)),
            5.0
        );
        Ok(())
    }

    #[test]
    fn test_midline_rejects_short_input() {
        assert!(Midline::from_points(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]).is_err());
    }
}
