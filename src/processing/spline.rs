//! Parametric cubic smoothing spline.
//!
//! Points are parametrised by normalised chord length. Each coordinate is
//! fitted with a natural cubic smoothing spline (Reinsch form) sharing one
//! penalty weight, chosen so that the total squared residual matches the
//! requested smoothing factor as closely as possible without exceeding it.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::io::input::Point;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SplineError {
    #[error("spline needs at least {required} points, got {found}")]
    TooFewPoints { found: usize, required: usize },
    #[error("consecutive points {0} and {1} coincide")]
    RepeatedPoint(usize, usize),
    #[error("non-finite coordinate at index {0}")]
    NonFinite(usize),
    #[error("smoothing system is singular")]
    Singular,
}

const MIN_POINTS: usize = 3;
const LOG_LAMBDA_MIN: f64 = -12.0;
const LOG_LAMBDA_MAX: f64 = 12.0;
const BISECTION_STEPS: usize = 80;

#[derive(Debug, Clone)]
pub struct SmoothingSpline {
    knots: Vec<f64>,
    values_x: Vec<f64>,
    values_y: Vec<f64>,
    curv_x: Vec<f64>,
    curv_y: Vec<f64>,
}

/// Fitted values and second derivatives of one coordinate.
struct Fit {
    values: Vec<f64>,
    curvature: Vec<f64>,
}

impl SmoothingSpline {
    /// Fits a spline through `points` whose squared residual sum stays at or
    /// below `smoothing` (0 interpolates).
    pub fn fit(points: &[Point], smoothing: f64) -> Result<Self, SplineError> {
        let n = points.len();
        if n < MIN_POINTS {
            return Err(SplineError::TooFewPoints {
                found: n,
                required: MIN_POINTS,
            });
        }
        if let Some(i) = points
            .iter()
            .position(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(SplineError::NonFinite(i));
        }

        let knots = chord_parameters(points)?;
        let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
        let system = ReinschSystem::new(&knots);

        let residual = |log_lambda: f64| -> Result<(Fit, Fit, f64), SplineError> {
            let lambda = 10f64.powf(log_lambda);
            let fx = system.solve(&xs, lambda)?;
            let fy = system.solve(&ys, lambda)?;
            let ss = sum_sq_diff(&xs, &fx.values) + sum_sq_diff(&ys, &fy.values);
            Ok((fx, fy, ss))
        };

        let smoothing = smoothing.max(0.0);
        let (fx, fy) = if smoothing == 0.0 {
            let (fx, fy, _) = residual(LOG_LAMBDA_MIN)?;
            (fx, fy)
        } else {
            let (hx, hy, ss_hi) = residual(LOG_LAMBDA_MAX)?;
            if ss_hi <= smoothing {
                (hx, hy)
            } else {
                // residual grows monotonically with the penalty weight
                let mut lo = LOG_LAMBDA_MIN;
                let mut hi = LOG_LAMBDA_MAX;
                for _ in 0..BISECTION_STEPS {
                    let mid = 0.5 * (lo + hi);
                    let (_, _, ss) = residual(mid)?;
                    if ss <= smoothing {
                        lo = mid;
                    } else {
                        hi = mid;
                    }
                }
                let (fx, fy, _) = residual(lo)?;
                (fx, fy)
            }
        };

        Ok(SmoothingSpline {
            knots,
            values_x: fx.values,
            values_y: fy.values,
            curv_x: fx.curvature,
            curv_y: fy.curvature,
        })
    }

    /// Point on the curve at parameter `u` in `[0, 1]` (clamped).
    pub fn evaluate(&self, u: f64) -> Point {
        let t = u.clamp(0.0, 1.0);
        let last = self.knots.len() - 2;
        let i = match self.knots.iter().rposition(|&k| k <= t) {
            Some(i) => i.min(last),
            None => 0,
        };
        Point::new(
            eval_piece(&self.knots, &self.values_x, &self.curv_x, i, t),
            eval_piece(&self.knots, &self.values_y, &self.curv_y, i, t),
        )
    }

    /// `count` points at evenly spaced parameters over `[0, 1]`.
    pub fn resample(&self, count: usize) -> Vec<Point> {
        match count {
            0 => Vec::new(),
            1 => vec![self.evaluate(0.0)],
            _ => (0..count)
                .map(|k| self.evaluate(k as f64 / (count - 1) as f64))
                .collect(),
        }
    }
}

fn sum_sq_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Cumulative chord length scaled to `[0, 1]`.
fn chord_parameters(points: &[Point]) -> Result<Vec<f64>, SplineError> {
    let mut params = Vec::with_capacity(points.len());
    params.push(0.0);
    let mut total = 0.0;
    for i in 1..points.len() {
        let d = points[i - 1].distance_to(&points[i]);
        if d <= f64::EPSILON {
            return Err(SplineError::RepeatedPoint(i - 1, i));
        }
        total += d;
        params.push(total);
    }
    for p in params.iter_mut() {
        *p /= total;
    }
    Ok(params)
}

fn eval_piece(knots: &[f64], g: &[f64], gamma: &[f64], i: usize, t: f64) -> f64 {
    let h = knots[i + 1] - knots[i];
    let a = t - knots[i];
    let b = knots[i + 1] - t;
    (a * g[i + 1] + b * g[i]) / h
        - a * b / 6.0 * ((1.0 + a / h) * gamma[i + 1] + (1.0 + b / h) * gamma[i])
}

/// Band matrices of the Reinsch algorithm for fixed knots.
struct ReinschSystem {
    q: DMatrix<f64>,
    r: DMatrix<f64>,
}

impl ReinschSystem {
    fn new(knots: &[f64]) -> Self {
        let n = knots.len();
        let m = n - 2;
        let h: Vec<f64> = knots.windows(2).map(|w| w[1] - w[0]).collect();

        let mut q = DMatrix::<f64>::zeros(n, m);
        let mut r = DMatrix::<f64>::zeros(m, m);
        for j in 1..=m {
            let c = j - 1;
            q[(j - 1, c)] = 1.0 / h[j - 1];
            q[(j, c)] = -1.0 / h[j - 1] - 1.0 / h[j];
            q[(j + 1, c)] = 1.0 / h[j];

            r[(c, c)] = (h[j - 1] + h[j]) / 3.0;
            if j < m {
                r[(c, c + 1)] = h[j] / 6.0;
                r[(c + 1, c)] = h[j] / 6.0;
            }
        }
        ReinschSystem { q, r }
    }

    /// Solves `(R + λ QᵀQ) γ = Qᵀ y` and returns `g = y − λ Q γ` with the
    /// natural boundary second derivatives padded in.
    fn solve(&self, y: &[f64], lambda: f64) -> Result<Fit, SplineError> {
        let yv = DVector::from_column_slice(y);
        let qt = self.q.transpose();
        let lhs = &self.r + (&qt * &self.q) * lambda;
        let rhs = &qt * &yv;
        let chol = lhs.cholesky().ok_or(SplineError::Singular)?;
        let gamma = chol.solve(&rhs);
        let g = &yv - (&self.q * &gamma) * lambda;

        let mut curvature = Vec::with_capacity(y.len());
        curvature.push(0.0);
        curvature.extend(gamma.iter().copied());
        curvature.push(0.0);

        if g.iter().any(|v| !v.is_finite()) {
            return Err(SplineError::Singular);
        }
        Ok(Fit {
            values: g.iter().copied().collect(),
            curvature,
        })
    }
}
