pub mod endpoints;
pub mod metrics;
pub mod midline;
pub mod segments;
pub mod skeleton;
pub mod spline;
