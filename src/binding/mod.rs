pub mod classes;

use classes::{PyFrameAnalysis, PyFrameMetrics};
use pyo3::prelude::*;

use crate::io::input::Point;
use crate::processing::metrics;

/// Body angle in degrees of the tail→head vector.
///
/// Image coordinates: y grows downwards, so a head below the tail gives +90.
///
/// Example:
///
/// .. code-block:: python
///
///    import larvars
///    larvars.body_angle((110.0, 100.0), (100.0, 100.0))  # 0.0
#[pyfunction]
pub fn body_angle(head: (f64, f64), tail: (f64, f64)) -> f64 {
    metrics::body_angle(&Point::from(head), &Point::from(tail))
}

/// Change between two body angles, wrapped into (-180, 180].
#[pyfunction]
pub fn turning_angle(previous: f64, current: f64) -> f64 {
    metrics::turning_angle(previous, current)
}

pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add_function(wrap_pyfunction!(body_angle, m)?)?;
    m.add_function(wrap_pyfunction!(turning_angle, m)?)?;
    m.add_class::<PyFrameAnalysis>()?;
    m.add_class::<PyFrameMetrics>()?;
    Ok(())
}
