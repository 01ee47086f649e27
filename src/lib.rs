pub mod analysis;
pub mod config;
pub mod error;
pub mod io;
pub mod processing;
mod utils;

#[cfg(feature = "python")]
mod binding;

pub use analysis::{BatchSummary, CancelToken, FrameAnalysisState};
pub use config::AnalysisSettings;
pub use error::AnalysisError;

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn larvars(m: &Bound<'_, PyModule>) -> PyResult<()> {
    binding::register(m)
}
