use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::io::geometry::{Axis, Contour};
use crate::io::input::Point;

/// Which extreme of the outline is taken as the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DetectionStrategy {
    /// head = minimum y
    Top,
    /// head = maximum y
    Bottom,
    /// head = minimum x
    Left,
    /// head = maximum x
    Right,
    /// keep user-placed endpoints, top/bottom when none exist
    Manual,
}

impl DetectionStrategy {
    pub const ALL: [DetectionStrategy; 5] = [
        DetectionStrategy::Top,
        DetectionStrategy::Bottom,
        DetectionStrategy::Left,
        DetectionStrategy::Right,
        DetectionStrategy::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionStrategy::Top => "top",
            DetectionStrategy::Bottom => "bottom",
            DetectionStrategy::Left => "left",
            DetectionStrategy::Right => "right",
            DetectionStrategy::Manual => "manual",
        }
    }

    /// (axis, head takes the maximum) for the four extreme strategies.
    fn extreme(&self) -> (Axis, bool) {
        match self {
            DetectionStrategy::Top | DetectionStrategy::Manual => (Axis::Y, false),
            DetectionStrategy::Bottom => (Axis::Y, true),
            DetectionStrategy::Left => (Axis::X, false),
            DetectionStrategy::Right => (Axis::X, true),
        }
    }
}

impl fmt::Display for DetectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DetectionStrategy {
    type Err = AnalysisError;

    /// Accepts short names ("top", "extreme-top") and the labels used by the
    /// desktop tool ("Anterior = Top", "Manual (click on video)").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let key = lower
            .strip_prefix("anterior =")
            .or_else(|| lower.strip_prefix("extreme-"))
            .unwrap_or(&lower)
            .trim();
        match key {
            "top" => Ok(DetectionStrategy::Top),
            "bottom" => Ok(DetectionStrategy::Bottom),
            "left" => Ok(DetectionStrategy::Left),
            "right" => Ok(DetectionStrategy::Right),
            k if k.starts_with("manual") => Ok(DetectionStrategy::Manual),
            _ => Err(AnalysisError::UnknownStrategy(s.to_string())),
        }
    }
}

impl TryFrom<String> for DetectionStrategy {
    type Error = AnalysisError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DetectionStrategy> for String {
    fn from(s: DetectionStrategy) -> Self {
        s.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub position: Point,
    pub provenance: Provenance,
}

impl Endpoint {
    pub fn auto(position: Point) -> Self {
        Endpoint {
            position,
            provenance: Provenance::Auto,
        }
    }

    pub fn manual(position: Point) -> Self {
        Endpoint {
            position,
            provenance: Provenance::Manual,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.provenance == Provenance::Manual
    }
}

/// Head and tail of one frame; either may still be missing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EndpointPair {
    pub head: Option<Endpoint>,
    pub tail: Option<Endpoint>,
}

impl EndpointPair {
    pub fn new(head: Point, tail: Point, provenance: Provenance) -> Self {
        EndpointPair {
            head: Some(Endpoint {
                position: head,
                provenance,
            }),
            tail: Some(Endpoint {
                position: tail,
                provenance,
            }),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.head.is_some() && self.tail.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none() && self.tail.is_none()
    }

    /// (head, tail) when both are set.
    pub fn positions(&self) -> Option<(Point, Point)> {
        match (self.head, self.tail) {
            (Some(h), Some(t)) => Some((h.position, t.position)),
            _ => None,
        }
    }

    pub fn head_position(&self) -> Option<Point> {
        self.head.map(|e| e.position)
    }

    pub fn tail_position(&self) -> Option<Point> {
        self.tail.map(|e| e.position)
    }

    /// True when both endpoints were placed by hand.
    pub fn is_manual(&self) -> bool {
        matches!((self.head, self.tail), (Some(h), Some(t)) if h.is_manual() && t.is_manual())
    }

    pub fn has_manual(&self) -> bool {
        self.head.is_some_and(|e| e.is_manual()) || self.tail.is_some_and(|e| e.is_manual())
    }

    /// Exchanges head and tail; no effect unless both are present.
    pub fn swap(&mut self) {
        if self.is_complete() {
            std::mem::swap(&mut self.head, &mut self.tail);
        }
    }
}

/// Head and tail from the contour extremes for `strategy`.
///
/// The tail always extremises the opposite direction of the head.
pub fn detect_extremes(contour: &Contour, strategy: DetectionStrategy) -> (Point, Point) {
    let (axis, head_max) = strategy.extreme();
    let head_idx = contour.extreme_index(axis, head_max);
    let tail_idx = contour.extreme_index(axis, !head_max);
    (contour.points()[head_idx], contour.points()[tail_idx])
}

/// Resolves the endpoints of one frame.
///
/// With [`DetectionStrategy::Manual`] a complete `existing` pair is returned
/// unchanged; otherwise the contour extremes are used.
pub fn resolve(
    contour: &Contour,
    strategy: DetectionStrategy,
    existing: Option<&EndpointPair>,
) -> EndpointPair {
    if strategy == DetectionStrategy::Manual {
        if let Some(pair) = existing.filter(|p| p.is_complete()) {
            return *pair;
        }
    }
    let (head, tail) = detect_extremes(contour, strategy);
    EndpointPair::new(head, tail, Provenance::Auto)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PolicyOutcome {
    /// both endpoints already present, left alone
    Preserved,
    Updated(EndpointPair),
}

/// Batch endpoint policy for one frame.
///
/// `preserve_manual = true` ("apply to all") leaves complete pairs alone and
/// re-resolves frames missing the head or the tail as a whole pair.
/// `preserve_manual = false` ("force re-detect") discards existing endpoints.
pub fn apply_policy(
    contour: &Contour,
    strategy: DetectionStrategy,
    existing: Option<&EndpointPair>,
    preserve_manual: bool,
) -> PolicyOutcome {
    if !preserve_manual {
        return PolicyOutcome::Updated(resolve(contour, strategy, None));
    }

    match existing {
        Some(pair) if pair.is_complete() => PolicyOutcome::Preserved,
        pair => PolicyOutcome::Updated(resolve(contour, strategy, pair)),
    }
}

#[cfg(test)]
mod endpoint_tests {
    use super::*;
    use crate::utils::test_utils::{larva_contour, random_blob};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_extreme_strategies_pick_arg_extrema() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..25 {
            let contour = random_blob(&mut rng, 40);
            for strategy in [
                DetectionStrategy::Top,
                DetectionStrategy::Bottom,
                DetectionStrategy::Left,
                DetectionStrategy::Right,
            ] {
                let pair = resolve(&contour, strategy, None);
                let (head, tail) = pair.positions().expect("complete pair");
                assert!(contour.points().contains(&head));
                assert!(contour.points().contains(&tail));
                assert_ne!(head, tail);

                for p in contour.points() {
                    match strategy {
                        DetectionStrategy::Top => assert!(head.y <= p.y && tail.y >= p.y),
                        DetectionStrategy::Bottom => assert!(head.y >= p.y && tail.y <= p.y),
                        DetectionStrategy::Left => assert!(head.x <= p.x && tail.x >= p.x),
                        DetectionStrategy::Right => assert!(head.x >= p.x && tail.x <= p.x),
                        DetectionStrategy::Manual => unreachable!(),
                    }
                }
                assert!(!pair.has_manual());
            }
        }
    }

    #[test]
    fn test_manual_strategy_keeps_existing_or_falls_back_to_top() {
        let contour = larva_contour(Point::new(50.0, 50.0), 30.0, 6.0, 0.3, 60);
        let existing = EndpointPair::new(Point::new(1.0, 2.0), Point::new(3.0, 4.0), Provenance::Manual);

        let kept = resolve(&contour, DetectionStrategy::Manual, Some(&existing));
        assert_eq!(kept, existing);

        let fallback = resolve(&contour, DetectionStrategy::Manual, None);
        assert_eq!(fallback, resolve(&contour, DetectionStrategy::Top, None));
    }

    #[test]
    fn test_swap_requires_both() {
        let mut pair = EndpointPair::new(Point::new(0.0, 0.0), Point::new(5.0, 5.0), Provenance::Auto);
        pair.swap();
        assert_eq!(pair.head_position(), Some(Point::new(5.0, 5.0)));
        assert_eq!(pair.tail_position(), Some(Point::new(0.0, 0.0)));

        let mut half = EndpointPair {
            head: Some(Endpoint::manual(Point::new(1.0, 1.0))),
            tail: None,
        };
        half.swap();
        assert_eq!(half.head_position(), Some(Point::new(1.0, 1.0)));
        assert!(half.tail.is_none());
    }

    #[test]
    fn test_policy_preserve_and_force() {
        let contour = larva_contour(Point::new(50.0, 50.0), 30.0, 6.0, 0.0, 60);
        let manual = EndpointPair::new(Point::new(1.0, 2.0), Point::new(3.0, 4.0), Provenance::Manual);

        assert_eq!(
            apply_policy(&contour, DetectionStrategy::Top, Some(&manual), true),
            PolicyOutcome::Preserved
        );

        match apply_policy(&contour, DetectionStrategy::Top, Some(&manual), false) {
            PolicyOutcome::Updated(p) => {
                assert_eq!(p, resolve(&contour, DetectionStrategy::Top, None));
                assert!(!p.has_manual());
            }
            PolicyOutcome::Preserved => panic!("force must overwrite"),
        }
    }

    #[test]
    fn test_policy_redetects_incomplete_pair() {
        let contour = larva_contour(Point::new(50.0, 50.0), 30.0, 6.0, 0.4, 60);
        // a hand-placed head sitting on the Top strategy's tail extreme
        let (_, bottom) = detect_extremes(&contour, DetectionStrategy::Top);
        let head_only = EndpointPair {
            head: Some(Endpoint::manual(bottom)),
            tail: None,
        };
        let PolicyOutcome::Updated(p) =
            apply_policy(&contour, DetectionStrategy::Top, Some(&head_only), true)
        else {
            panic!("incomplete pair must be updated");
        };
        assert_eq!(p, resolve(&contour, DetectionStrategy::Top, None));
        let (head, tail) = p.positions().expect("complete pair");
        assert_ne!(head, tail);
        assert!(!p.has_manual());

        let tail_only = EndpointPair {
            head: None,
            tail: Some(Endpoint::manual(bottom)),
        };
        assert_eq!(
            apply_policy(&contour, DetectionStrategy::Manual, Some(&tail_only), true),
            PolicyOutcome::Updated(resolve(&contour, DetectionStrategy::Top, None))
        );
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!("Anterior = Bottom".parse(), Ok(DetectionStrategy::Bottom));
        assert_eq!("extreme-right".parse(), Ok(DetectionStrategy::Right));
        assert_eq!("Manual (click on video)".parse(), Ok(DetectionStrategy::Manual));
        assert!("sideways".parse::<DetectionStrategy>().is_err());
        for s in DetectionStrategy::ALL {
            assert_eq!(s.to_string().parse(), Ok(s));
        }
    }
}
