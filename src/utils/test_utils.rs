use rand::rngs::StdRng;
use rand::Rng;
use std::f64::consts::PI;

use crate::io::geometry::Contour;
use crate::io::input::Point;

/// Rotates a point around the origin.
pub fn rotate_point(point: (f64, f64), angle: f64) -> (f64, f64) {
    let (x, y) = point;
    let cos = angle.cos();
    let sin = angle.sin();
    (x * cos - y * sin, x * sin + y * cos)
}

/// Elongated ellipse standing in for a straight larva outline.
///
/// `angle` rotates the long axis away from the x axis (radians).
pub fn larva_contour(
    center: Point,
    half_length: f64,
    half_width: f64,
    angle: f64,
    num_points: usize,
) -> Contour {
    let points = (0..num_points)
        .map(|i| {
            let theta = 2.0 * PI * (i as f64) / (num_points as f64);
            let (x, y) = rotate_point((half_length * theta.cos(), half_width * theta.sin()), angle);
            Point::new(x + center.x, y + center.y)
        })
        .collect();
    Contour::new(0, points).expect("ellipse has enough points")
}

/// Tapered body bent along a parabola, ends lower than the middle.
pub fn bent_larva_contour(center: Point, half_length: f64, half_width: f64) -> Contour {
    let steps = 40;
    let axis = |x: f64| center.y + 0.004 * (x - center.x).powi(2);
    let width = |x: f64| {
        let u = (x - center.x) / half_length;
        half_width * (1.0 - u * u).max(0.0).sqrt()
    };
    let xs: Vec<f64> = (0..=steps)
        .map(|i| center.x - half_length + 2.0 * half_length * i as f64 / steps as f64)
        .collect();

    let mut points: Vec<Point> = xs.iter().map(|&x| Point::new(x, axis(x) - width(x))).collect();
    // lower side back towards the start, skipping the shared tips
    points.extend(
        xs[1..steps]
            .iter()
            .rev()
            .map(|&x| Point::new(x, axis(x) + width(x))),
    );
    Contour::new(1, points).expect("bent body has enough points")
}

/// Regular N-gon, vertex 0 at `(cx + r, cy)`, counter-clockwise in maths orientation.
pub fn regular_polygon(n: usize, radius: f64, center: Point) -> Contour {
    let points = (0..n)
        .map(|k| {
            let theta = 2.0 * PI * k as f64 / n as f64;
            Point::new(center.x + radius * theta.cos(), center.y + radius * theta.sin())
        })
        .collect();
    Contour::new(0, points).expect("polygon has enough points")
}

pub fn square_contour() -> Contour {
    Contour::new(
        0,
        vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ],
    )
    .expect("square has enough points")
}

/// Zero-area outline along y = 50: out from x = 10 to 100, then back.
pub fn sliver_contour() -> Contour {
    let mut points: Vec<Point> = (0..=18).map(|i| Point::new(10.0 + 5.0 * i as f64, 50.0)).collect();
    points.extend((1..=17).rev().map(|i| Point::new(10.0 + 5.0 * i as f64, 50.0)));
    Contour::new(2, points).expect("sliver has enough points")
}

/// Star-shaped outline with random radii around (100, 100).
pub fn random_blob(rng: &mut StdRng, n: usize) -> Contour {
    let points = (0..n)
        .map(|k| {
            let theta = 2.0 * PI * k as f64 / n as f64;
            let r = rng.random_range(20.0..60.0);
            Point::new(100.0 + r * theta.cos(), 100.0 + r * theta.sin())
        })
        .collect();
    Contour::new(3, points).expect("blob has enough points")
}
