use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::segments::{LandmarkLabel, SegmentMap, Side};
use crate::io::geometry::{Contour, Midline};
use crate::io::input::Point;

/// Midlines shorter than this carry no curvature.
const CURVATURE_MIN_POINTS: usize = 5;

/// Per-frame derived measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub body_angle: f64,
    /// Change from the nearest earlier frame that has a body angle.
    pub turning_angle: Option<f64>,
    pub curvature: Option<f64>,
    pub landmark_distances: BTreeMap<String, f64>,
}

/// Wraps any angle in degrees into (-180, 180].
pub fn normalize_angle(degrees: f64) -> f64 {
    let mut a = degrees % 360.0;
    if a > 180.0 {
        a -= 360.0;
    } else if a <= -180.0 {
        a += 360.0;
    }
    a
}

/// Orientation of the tail→head vector in image coordinates (y down), degrees.
pub fn body_angle(head: &Point, tail: &Point) -> f64 {
    normalize_angle((head.y - tail.y).atan2(head.x - tail.x).to_degrees())
}

pub fn turning_angle(previous: f64, current: f64) -> f64 {
    normalize_angle(current - previous)
}

/// Central differences with one-sided ends, like `numpy.gradient`.
fn gradient(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..n)
            .map(|i| {
                if i == 0 {
                    values[1] - values[0]
                } else if i == n - 1 {
                    values[n - 1] - values[n - 2]
                } else {
                    (values[i + 1] - values[i - 1]) / 2.0
                }
            })
            .collect(),
    }
}

/// Mean discrete curvature `|x'y'' - y'x''| / (x'^2 + y'^2)^1.5` over the
/// interior midline points, derivatives taken along the point index.
///
/// Points where the curve is stationary are skipped.
pub fn curvature(midline: &Midline) -> Option<f64> {
    let pts = midline.points();
    if pts.len() < CURVATURE_MIN_POINTS {
        return None;
    }
    let xs: Vec<f64> = pts.iter().map(|p| p.x).collect();
    let ys: Vec<f64> = pts.iter().map(|p| p.y).collect();
    let dx = gradient(&xs);
    let dy = gradient(&ys);
    let ddx = gradient(&dx);
    let ddy = gradient(&dy);

    let values: Vec<f64> = (1..pts.len() - 1)
        .map(|i| {
            let speed = (dx[i] * dx[i] + dy[i] * dy[i]).powf(1.5);
            (dx[i] * ddy[i] - dy[i] * ddx[i]).abs() / speed
        })
        .filter(|k| k.is_finite())
        .collect();

    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Distances between anatomically adjacent landmarks plus left/right widths.
///
/// Side pairs are measured along the contour and midline pairs along the
/// midline; either falls back to the straight line when its curve is
/// missing. Widths are always straight lines. Pairs with a missing landmark
/// are left out.
pub fn landmark_distances(
    segments: &SegmentMap,
    contour: Option<&Contour>,
    midline: Option<&Midline>,
) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();

    for side in [Side::Left, Side::Right, Side::Midline] {
        for label in LandmarkLabel::side_labels(side) {
            let Some(next) = label.next() else { continue };
            let (Some(a), Some(b)) = (segments.get(&label), segments.get(&next)) else {
                continue;
            };
            let d = match (side, contour, midline) {
                (Side::Midline, _, Some(m)) => m.arc_length_between(a, b),
                (Side::Left | Side::Right, Some(c), _) => c.arc_length_between(a, b),
                _ => a.distance_to(b),
            };
            out.insert(format!("{}_{}_dist", label, next), d);
        }
    }

    for left in LandmarkLabel::side_labels(Side::Left) {
        let right = left.with_side(Side::Right);
        if let (Some(a), Some(b)) = (segments.get(&left), segments.get(&right)) {
            out.insert(format!("{}_width", left.segment()), a.distance_to(b));
        }
    }
    out
}
