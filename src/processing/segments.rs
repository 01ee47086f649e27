use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::midline::{calculate_midline, MidlineMode};
use crate::error::AnalysisError;
use crate::io::geometry::{nearest_index_in, Contour, Midline};
use crate::io::input::Point;

/// Landmarks per side: three thoracic then seven abdominal segments.
pub const SEGMENT_COUNT: usize = 10;
const SEGMENT_NAMES: [&str; SEGMENT_COUNT] =
    ["t1", "t2", "t3", "a1", "a2", "a3", "a4", "a5", "a6", "a7"];

/// Landmarks sit between 5% and 95% of body length.
const BODY_MARGIN: f64 = 0.05;
/// Midlines shorter than this cannot carry the landmark scheme.
const MIN_MIDLINE_POINTS: usize = 10;
/// Snapping paths are densified to roughly this spacing in pixels.
const SNAP_SPACING: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
    Midline,
}

/// One of the thirty fixed landmark names (`t1l`, `a7r`, `st2`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LandmarkLabel {
    side: Side,
    index: u8,
}

impl LandmarkLabel {
    pub fn new(side: Side, index: usize) -> Option<Self> {
        (index < SEGMENT_COUNT).then_some(LandmarkLabel {
            side,
            index: index as u8,
        })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// 0 (T1, anterior) ..= 9 (A7, posterior)
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Segment name shared by all three sides, e.g. `"a3"`.
    pub fn segment(&self) -> &'static str {
        SEGMENT_NAMES[self.index()]
    }

    /// All labels of one side in anterior→posterior order.
    pub fn side_labels(side: Side) -> impl Iterator<Item = LandmarkLabel> {
        (0..SEGMENT_COUNT as u8).map(move |index| LandmarkLabel { side, index })
    }

    /// Left, right and midline labels, thirty in total.
    pub fn all() -> impl Iterator<Item = LandmarkLabel> {
        [Side::Left, Side::Right, Side::Midline]
            .into_iter()
            .flat_map(Self::side_labels)
    }

    pub fn previous(&self) -> Option<LandmarkLabel> {
        (self.index > 0).then(|| LandmarkLabel {
            side: self.side,
            index: self.index - 1,
        })
    }

    pub fn next(&self) -> Option<LandmarkLabel> {
        LandmarkLabel::new(self.side, self.index() + 1)
    }

    /// The same segment on another side.
    pub fn with_side(&self, side: Side) -> LandmarkLabel {
        LandmarkLabel {
            side,
            index: self.index,
        }
    }
}

impl fmt::Display for LandmarkLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.side {
            Side::Left => write!(f, "{}l", self.segment()),
            Side::Right => write!(f, "{}r", self.segment()),
            Side::Midline => write!(f, "s{}", self.segment()),
        }
    }
}

impl FromStr for LandmarkLabel {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let (side, segment) = if let Some(rest) = lower.strip_prefix('s') {
            (Side::Midline, rest)
        } else if let Some(rest) = lower.strip_suffix('l') {
            (Side::Left, rest)
        } else if let Some(rest) = lower.strip_suffix('r') {
            (Side::Right, rest)
        } else {
            return Err(AnalysisError::UnknownLandmark(s.to_string()));
        };
        SEGMENT_NAMES
            .iter()
            .position(|n| *n == segment)
            .and_then(|index| LandmarkLabel::new(side, index))
            .ok_or_else(|| AnalysisError::UnknownLandmark(s.to_string()))
    }
}

impl TryFrom<String> for LandmarkLabel {
    type Error = AnalysisError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LandmarkLabel> for String {
    fn from(l: LandmarkLabel) -> Self {
        l.to_string()
    }
}

/// Landmark positions of one frame; may hold any subset of the labels.
pub type SegmentMap = BTreeMap<LandmarkLabel, Point>;

/// Body fraction of landmark `i`: 10 evenly spaced positions over [0.05, 0.95].
pub fn landmark_fraction(i: usize) -> f64 {
    BODY_MARGIN + i as f64 / (SEGMENT_COUNT - 1) as f64 * (1.0 - 2.0 * BODY_MARGIN)
}

fn sample_at(points: &[Point], t: f64) -> Point {
    let idx = (t * (points.len() - 1) as f64).round() as usize;
    points[idx.min(points.len() - 1)]
}

/// The two contour sides between head and tail, both ordered from the head.
/// Left is the shorter way around.
pub fn body_sides(contour: &Contour, head: &Point, tail: &Point) -> (Vec<Point>, Vec<Point>) {
    let h = contour.nearest_index(head);
    let t = contour.nearest_index(tail);
    let pick = |idx: Vec<usize>| idx.into_iter().map(|i| contour.points()[i]).collect();
    (
        pick(contour.shorter_path_indices(h, t)),
        pick(contour.longer_path_indices(h, t)),
    )
}

/// Places the thirty landmarks using an already computed midline.
pub fn sample_landmarks(
    contour: &Contour,
    head: &Point,
    tail: &Point,
    midline: &Midline,
) -> Option<SegmentMap> {
    if midline.len() < MIN_MIDLINE_POINTS {
        return None;
    }
    let (left, right) = body_sides(contour, head, tail);

    let mut map = SegmentMap::new();
    for i in 0..SEGMENT_COUNT {
        let t = landmark_fraction(i);
        for (side, path) in [
            (Side::Left, left.as_slice()),
            (Side::Right, right.as_slice()),
            (Side::Midline, midline.points()),
        ] {
            let label = LandmarkLabel::new(side, i)?;
            map.insert(label, sample_at(path, t));
        }
    }
    Some(map)
}

/// Computes the midline with `mode` and places the landmarks along it.
pub fn compute_landmarks(
    contour: &Contour,
    head: Point,
    tail: Point,
    mode: MidlineMode,
) -> Option<SegmentMap> {
    let midline = calculate_midline(mode, contour, head, tail)?;
    sample_landmarks(contour, &head, &tail, &midline)
}

/// Inserts linear samples wherever consecutive points are more than
/// `spacing` apart.
pub fn densify(path: &[Point], spacing: f64) -> Vec<Point> {
    let sparse = path.windows(2).any(|w| w[0].distance_to(&w[1]) > spacing);
    if !sparse {
        return path.to_vec();
    }

    let mut out = Vec::with_capacity(path.len() * 2);
    out.push(path[0]);
    for w in path.windows(2) {
        let (start, end) = (w[0], w[1]);
        let d = start.distance_to(&end);
        if d > spacing {
            let steps = (d / spacing).ceil() as usize;
            for j in 1..steps {
                out.push(start.lerp(&end, j as f64 / steps as f64));
            }
        }
        out.push(end);
    }
    out
}

fn nearest_on(path: &[Point], target: &Point) -> Option<Point> {
    nearest_index_in(path, target).map(|i| path[i])
}

/// Everything constrained snapping needs to know about one frame.
#[derive(Debug, Clone, Copy)]
pub struct SnapContext<'a> {
    pub contour: &'a Contour,
    pub head: Option<Point>,
    pub tail: Option<Point>,
    pub midline: Option<&'a Midline>,
    pub segments: Option<&'a SegmentMap>,
}

impl SnapContext<'_> {
    /// Previous and next neighbour of `label`; head and tail stand in at the ends.
    fn neighbours(&self, label: LandmarkLabel) -> (Option<Point>, Option<Point>) {
        let lookup = |l: LandmarkLabel| self.segments.and_then(|s| s.get(&l).copied());
        let prev = match label.previous() {
            Some(l) => lookup(l),
            None => self.head,
        };
        let next = match label.next() {
            Some(l) => lookup(l),
            None => self.tail,
        };
        (prev, next)
    }
}

/// Nearest contour point.
pub fn snap_to_contour(contour: &Contour, point: &Point) -> Point {
    contour.nearest_point(point)
}

/// Moves `point` onto the stretch of body between the landmark's neighbours.
///
/// Midline labels stay on the midline between their neighbours, left/right
/// labels on the shorter contour path between theirs. Without both
/// neighbours midline labels go to the nearest midline point and side labels
/// to the nearest contour point.
pub fn snap_landmark(ctx: &SnapContext<'_>, point: &Point, label: LandmarkLabel) -> Point {
    let (prev, next) = ctx.neighbours(label);

    if label.side() == Side::Midline {
        if let Some(midline) = ctx.midline {
            let path = match (prev, next) {
                (Some(p), Some(n)) => {
                    densify(midline.segment(midline.nearest_index(&p), midline.nearest_index(&n)), SNAP_SPACING)
                }
                _ => midline.points().to_vec(),
            };
            if let Some(snapped) = nearest_on(&path, point) {
                return snapped;
            }
        }
        return snap_to_contour(ctx.contour, point);
    }

    if let (Some(p), Some(n)) = (prev, next) {
        let a = ctx.contour.nearest_index(&p);
        let b = ctx.contour.nearest_index(&n);
        let path = densify(&ctx.contour.path_between(a, b), SNAP_SPACING);
        if let Some(snapped) = nearest_on(&path, point) {
            return snapped;
        }
    }
    snap_to_contour(ctx.contour, point)
}

#[cfg(test)]
mod segment_tests {
    use super::*;
    use crate::processing::endpoints::{detect_extremes, DetectionStrategy};
    use crate::utils::test_utils::{larva_contour, regular_polygon};
    use approx::assert_relative_eq;

    #[test]
    fn test_label_names_round_trip() {
        let names: Vec<String> = LandmarkLabel::all().map(|l| l.to_string()).collect();
        assert_eq!(names.len(), 30);
        assert_eq!(names[0], "t1l");
        assert_eq!(names[9], "a7l");
        assert_eq!(names[10], "t1r");
        assert_eq!(names[20], "st1");
        assert_eq!(names[29], "sa7");
        for l in LandmarkLabel::all() {
            assert_eq!(l.to_string().parse(), Ok(l));
        }
        assert!("a8l".parse::<LandmarkLabel>().is_err());
        assert!("t1x".parse::<LandmarkLabel>().is_err());
    }

    #[test]
    fn test_fractions_span_five_to_ninety_five_percent() {
        assert_relative_eq!(landmark_fraction(0), 0.05);
        assert_relative_eq!(landmark_fraction(9), 0.95);
        assert_relative_eq!(landmark_fraction(1) - landmark_fraction(0), 0.1);
    }

    #[test]
    fn test_compute_landmarks_places_thirty_points_inside_bbox() {
        let contour = larva_contour(Point::new(160.0, 140.0), 70.0, 14.0, 0.5, 180);
        let (head, tail) = detect_extremes(&contour, DetectionStrategy::Top);
        for mode in [MidlineMode::Simple, MidlineMode::Skeleton] {
            let map = compute_landmarks(&contour, head, tail, mode).expect("landmarks");
            assert_eq!(map.len(), 30);
            let (min, max) = contour.bounding_box();
            let eps = 1e-6;
            for (label, p) in &map {
                assert!(
                    p.x >= min.x - eps && p.x <= max.x + eps && p.y >= min.y - eps && p.y <= max.y + eps,
                    "{} at {:?} outside bbox",
                    label,
                    p
                );
            }
            for l in LandmarkLabel::all() {
                assert!(map.contains_key(&l));
            }
        }
    }

    #[test]
    fn test_sides_start_at_head_and_left_is_shorter() {
        let contour = regular_polygon(40, 30.0, Point::new(100.0, 100.0));
        let head = contour.points()[0];
        let tail = contour.points()[15];
        let (left, right) = body_sides(&contour, &head, &tail);
        assert_eq!(left.first(), Some(&head));
        assert_eq!(right.first(), Some(&head));
        assert_eq!(left.last(), Some(&tail));
        assert_eq!(right.last(), Some(&tail));
        assert_eq!(left.len(), 16);
        assert_eq!(right.len(), 26);
    }

    #[test]
    fn test_densify_caps_spacing() {
        let path = vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(11.0, 0.0)];
        let dense = densify(&path, 3.0);
        assert_eq!(dense.first(), Some(&Point::new(0.0, 0.0)));
        assert_eq!(dense.last(), Some(&Point::new(11.0, 0.0)));
        for w in dense.windows(2) {
            assert!(w[0].distance_to(&w[1]) <= 3.0 + 1e-9);
        }
        // 10px gap split into four 2.5px steps
        assert_eq!(dense.len(), 6);

        let tight = vec![Point::new(0.0, 0.0), Point::new(2.0, 0.0)];
        assert_eq!(densify(&tight, 3.0), tight);
    }

    #[test]
    fn test_snap_side_landmark_stays_between_neighbours() {
        let contour = regular_polygon(60, 40.0, Point::new(100.0, 100.0));
        let pts = contour.points();
        let mut segments = SegmentMap::new();
        let t2l = LandmarkLabel::new(Side::Left, 1).unwrap();
        let t3l = LandmarkLabel::new(Side::Left, 2).unwrap();
        let a1l = LandmarkLabel::new(Side::Left, 3).unwrap();
        segments.insert(t2l, pts[10]);
        segments.insert(a1l, pts[14]);

        let ctx = SnapContext {
            contour: &contour,
            head: Some(pts[0]),
            tail: Some(pts[30]),
            midline: None,
            segments: Some(&segments),
        };

        // dragging far past a1l clamps to the a1l end of the allowed arc
        let snapped = snap_landmark(&ctx, &pts[25], t3l);
        assert_relative_eq!(snapped.x, pts[14].x, epsilon = 1e-9);
        assert_relative_eq!(snapped.y, pts[14].y, epsilon = 1e-9);

        // a point just off the arc snaps onto the densified arc
        let off = Point::new(pts[12].x + 3.0, pts[12].y + 1.0);
        let snapped = snap_landmark(&ctx, &off, t3l);
        let dist_to_arc = contour.path_between(10, 14).windows(2).fold(f64::MAX, |acc, w| {
            acc.min(w[0].distance_to(&snapped) + w[1].distance_to(&snapped) - w[0].distance_to(&w[1]))
        });
        assert!(dist_to_arc < 1e-6, "snapped point left the arc");
    }

    #[test]
    fn test_snap_without_neighbours_uses_contour() {
        let contour = regular_polygon(60, 40.0, Point::new(100.0, 100.0));
        let ctx = SnapContext {
            contour: &contour,
            head: None,
            tail: None,
            midline: None,
            segments: None,
        };
        let label = LandmarkLabel::new(Side::Right, 0).unwrap();
        let target = Point::new(141.0, 100.0);
        assert_eq!(snap_landmark(&ctx, &target, label), contour.nearest_point(&target));

        let mid = LandmarkLabel::new(Side::Midline, 4).unwrap();
        assert_eq!(snap_landmark(&ctx, &target, mid), contour.nearest_point(&target));
    }

    #[test]
    fn test_snap_midline_landmark_uses_midline_segment() -> anyhow::Result<()> {
        let contour = larva_contour(Point::new(100.0, 100.0), 50.0, 10.0, 0.0, 120);
        let head = Point::new(50.0, 100.0);
        let tail = Point::new(150.0, 100.0);
        let midline = Midline::with_endpoints(
            head,
            (1..20).map(|i| Point::new(50.0 + i as f64 * 5.0, 100.0)),
            tail,
        )?;
        let mut segments = SegmentMap::new();
        segments.insert(LandmarkLabel::new(Side::Midline, 0).unwrap(), Point::new(60.0, 100.0));
        segments.insert(LandmarkLabel::new(Side::Midline, 2).unwrap(), Point::new(80.0, 100.0));

        let ctx = SnapContext {
            contour: &contour,
            head: Some(head),
            tail: Some(tail),
            midline: Some(&midline),
            segments: Some(&segments),
        };
        let st2 = LandmarkLabel::new(Side::Midline, 1).unwrap();
        let snapped = snap_landmark(&ctx, &Point::new(71.0, 104.0), st2);
        assert_relative_eq!(snapped.y, 100.0);
        assert_relative_eq!(snapped.x, 71.0, epsilon = 1.0);

        let clamped = snap_landmark(&ctx, &Point::new(120.0, 100.0), st2);
        assert_relative_eq!(clamped.x, 80.0);
        Ok(())
    }
}
