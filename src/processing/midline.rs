use std::fmt;
use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::skeleton::{extract_skeleton, order_greedy};
use super::spline::SmoothingSpline;
use crate::error::AnalysisError;
use crate::io::geometry::{Contour, Midline};
use crate::io::input::Point;

/// Evenly spaced stations along the head→tail axis, endpoints included.
const AXIS_STATIONS: usize = 30;
const WINDOW_OVERLAP: f64 = 1.5;
const SIMPLE_SMOOTHING: f64 = 30.0;

const SKELETON_SMOOTHING: f64 = 100.0;
const SKELETON_MIN_POINTS: usize = 5;
const SKELETON_MAX_STEP: f64 = 15.0;
const SKELETON_SAMPLES: usize = 30;
/// Ordered paths up to this length are used without smoothing.
const SKELETON_RAW_LIMIT: usize = 10;

/// Points resampled from the smoothing spline, between head and tail.
const RESAMPLED_INTERIOR: usize = 98;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MidlineMode {
    /// medial axis of the rasterised body, falls back to `Simple`
    Skeleton,
    /// averages outline points across the head→tail axis
    Simple,
}

impl MidlineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MidlineMode::Skeleton => "skeleton",
            MidlineMode::Simple => "simple",
        }
    }
}

impl fmt::Display for MidlineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MidlineMode {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skeleton" | "skeleton-based" => Ok(MidlineMode::Skeleton),
            "simple" | "simple interpolation" | "interpolation" => Ok(MidlineMode::Simple),
            _ => Err(AnalysisError::UnknownMidlineMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for MidlineMode {
    type Error = AnalysisError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MidlineMode> for String {
    fn from(m: MidlineMode) -> Self {
        m.as_str().to_string()
    }
}

/// Midline from `head` to `tail` with the chosen algorithm.
///
/// A failed skeleton extraction silently falls back to simple interpolation.
pub fn calculate_midline(
    mode: MidlineMode,
    contour: &Contour,
    head: Point,
    tail: Point,
) -> Option<Midline> {
    match mode {
        MidlineMode::Simple => simple_midline(contour, head, tail),
        MidlineMode::Skeleton => skeleton_midline(contour, head, tail).or_else(|| {
            debug!(
                "contour {}: skeleton midline failed, using simple interpolation",
                contour.id
            );
            simple_midline(contour, head, tail)
        }),
    }
}

/// Follows the outline by averaging contour points that project near
/// evenly spaced stations of the head→tail axis.
pub fn simple_midline(contour: &Contour, head: Point, tail: Point) -> Option<Midline> {
    let ax = tail.x - head.x;
    let ay = tail.y - head.y;
    let axis_length = (ax * ax + ay * ay).sqrt();
    if axis_length < 1.0 {
        return None;
    }
    let (ux, uy) = (ax / axis_length, ay / axis_length);

    let projections: Vec<f64> = contour
        .points()
        .iter()
        .map(|p| (p.x - head.x) * ux + (p.y - head.y) * uy)
        .collect();
    let window = axis_length / (AXIS_STATIONS - 1) as f64 * WINDOW_OVERLAP;

    let interior: Vec<Point> = (1..AXIS_STATIONS - 1)
        .map(|i| {
            let t = i as f64 / (AXIS_STATIONS - 1) as f64;
            let target = t * axis_length;

            let (mut sx, mut sy, mut count) = (0.0, 0.0, 0usize);
            for (p, proj) in contour.points().iter().zip(&projections) {
                if (proj - target).abs() < window {
                    sx += p.x;
                    sy += p.y;
                    count += 1;
                }
            }
            if count > 0 {
                Point::new(sx / count as f64, sy / count as f64)
            } else {
                head.lerp(&tail, t)
            }
        })
        .collect();

    let smoothed = match SmoothingSpline::fit(&interior, SIMPLE_SMOOTHING) {
        Ok(spline) => spline.resample(RESAMPLED_INTERIOR),
        Err(e) => {
            debug!("contour {}: simple midline spline failed: {}", contour.id, e);
            interior
        }
    };

    Midline::with_endpoints(head, smoothed, tail).ok()
}

/// Orders the medial-axis pixels from head to tail and smooths them.
pub fn skeleton_midline(contour: &Contour, head: Point, tail: Point) -> Option<Midline> {
    let skeleton = extract_skeleton(contour)?;
    if skeleton.len() < SKELETON_MIN_POINTS {
        debug!(
            "contour {}: too few skeleton points ({})",
            contour.id,
            skeleton.len()
        );
        return None;
    }

    let ordered = order_greedy(&skeleton, &head, &tail, SKELETON_MAX_STEP);
    if ordered.len() < SKELETON_MIN_POINTS {
        debug!("contour {}: skeleton path too short ({})", contour.id, ordered.len());
        return None;
    }

    if ordered.len() <= SKELETON_RAW_LIMIT {
        return Midline::with_endpoints(head, ordered, tail).ok();
    }

    let step = ordered.len().div_ceil(SKELETON_SAMPLES);
    let sampled: Vec<Point> = ordered.iter().step_by(step).copied().collect();
    if sampled.len() < 4 {
        return Midline::with_endpoints(head, sampled, tail).ok();
    }

    match SmoothingSpline::fit(&sampled, SKELETON_SMOOTHING) {
        Ok(spline) => Midline::with_endpoints(head, spline.resample(RESAMPLED_INTERIOR), tail).ok(),
        Err(e) => {
            warn!("contour {}: skeleton spline failed, keeping raw path: {}", contour.id, e);
            Midline::with_endpoints(head, sampled, tail).ok()
        }
    }
}

#[cfg(test)]
mod midline_tests {
    use super::*;
    use crate::processing::endpoints::{detect_extremes, DetectionStrategy};
    use crate::utils::test_utils::{bent_larva_contour, larva_contour, sliver_contour};
    use approx::assert_relative_eq;

    fn endpoints(contour: &Contour, strategy: DetectionStrategy) -> (Point, Point) {
        detect_extremes(contour, strategy)
    }

    #[test]
    fn test_both_modes_force_exact_endpoints() {
        let contours = [
            larva_contour(Point::new(150.0, 120.0), 60.0, 12.0, 0.4, 140),
            larva_contour(Point::new(80.0, 200.0), 45.0, 9.0, 1.3, 90),
            bent_larva_contour(Point::new(200.0, 200.0), 70.0, 10.0),
        ];
        for contour in &contours {
            for strategy in [DetectionStrategy::Top, DetectionStrategy::Left] {
                let (head, tail) = endpoints(contour, strategy);
                for mode in [MidlineMode::Simple, MidlineMode::Skeleton] {
                    let m = calculate_midline(mode, contour, head, tail).expect("midline");
                    assert_eq!(m.head(), head, "{:?} head drifted", mode);
                    assert_eq!(m.tail(), tail, "{:?} tail drifted", mode);
                    assert!(m.len() >= 3);
                }
            }
        }
    }

    #[test]
    fn test_simple_midline_of_straight_body_is_centred() {
        let contour = larva_contour(Point::new(100.0, 100.0), 50.0, 10.0, 0.0, 200);
        let (head, tail) = endpoints(&contour, DetectionStrategy::Left);
        let m = simple_midline(&contour, head, tail).expect("midline");
        assert_eq!(m.len(), RESAMPLED_INTERIOR + 2);
        for p in &m.points()[1..m.len() - 1] {
            assert_relative_eq!(p.y, 100.0, epsilon = 1.0);
        }
    }

    #[test]
    fn test_simple_midline_rejects_short_axis() {
        let contour = larva_contour(Point::new(100.0, 100.0), 50.0, 10.0, 0.0, 60);
        let p = Point::new(100.0, 100.0);
        assert!(simple_midline(&contour, p, Point::new(100.5, 100.0)).is_none());
    }

    #[test]
    fn test_skeleton_midline_follows_body() {
        let contour = larva_contour(Point::new(150.0, 100.0), 60.0, 12.0, 0.0, 160);
        let (head, tail) = endpoints(&contour, DetectionStrategy::Left);
        let m = skeleton_midline(&contour, head, tail).expect("skeleton midline");
        assert_eq!(m.len(), RESAMPLED_INTERIOR + 2);
        // interior runs roughly from left to right near the body axis
        let interior = &m.points()[1..m.len() - 1];
        assert!(interior[0].x < interior[interior.len() - 1].x);
        for p in interior {
            assert!((p.y - 100.0).abs() < 10.0, "strayed to {:?}", p);
        }
    }

    #[test]
    fn test_skeleton_failure_falls_back_to_simple() {
        let contour = sliver_contour();
        let (head, tail) = endpoints(&contour, DetectionStrategy::Left);
        assert!(skeleton_midline(&contour, head, tail).is_none());
        let skeleton = calculate_midline(MidlineMode::Skeleton, &contour, head, tail);
        let simple = calculate_midline(MidlineMode::Simple, &contour, head, tail);
        assert!(simple.is_some());
        assert_eq!(skeleton, simple);
    }

    #[test]
    fn test_mode_names() {
        assert_eq!("Skeleton".parse(), Ok(MidlineMode::Skeleton));
        assert_eq!("Simple interpolation".parse(), Ok(MidlineMode::Simple));
        assert!("medial".parse::<MidlineMode>().is_err());
    }
}
