use std::collections::BTreeMap;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::analysis::{CancelToken, EndpointKind, FrameAnalysisState};
use crate::config::AnalysisSettings;
use crate::io::geometry::Contour;
use crate::io::input::Point;
use crate::io::session::Session;
use crate::io::RoiSequence;
use crate::processing::endpoints::DetectionStrategy;
use crate::processing::metrics::FrameMetrics;
use crate::processing::midline::MidlineMode;
use crate::processing::segments::{LandmarkLabel, SegmentMap};

type PyPoint = (f64, f64);

fn to_py(p: &Point) -> PyPoint {
    (p.x, p.y)
}

fn value_err<E: std::fmt::Display>(e: E) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn runtime_err<E: std::fmt::Display>(e: E) -> PyErr {
    PyRuntimeError::new_err(e.to_string())
}

fn segments_to_py(segments: &SegmentMap) -> BTreeMap<String, PyPoint> {
    segments.iter().map(|(l, p)| (l.to_string(), to_py(p))).collect()
}

/// Metrics of one frame
///
/// Attributes:
///     body_angle (float): Tail→head direction in degrees, image y axis pointing down
///     turning_angle (float | None): Change from the previous frame with an angle
///     curvature (float | None): Mean midline curvature (1/pixels)
///     landmark_distances (dict[str, float]): e.g. ``t1l_t2l_dist``, ``a3_width``
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyFrameMetrics {
    #[pyo3(get)]
    pub body_angle: f64,
    #[pyo3(get)]
    pub turning_angle: Option<f64>,
    #[pyo3(get)]
    pub curvature: Option<f64>,
    #[pyo3(get)]
    pub landmark_distances: BTreeMap<String, f64>,
}

#[pymethods]
impl PyFrameMetrics {
    fn __repr__(&self) -> String {
        format!(
            "FrameMetrics(body_angle={:.2}, turning_angle={:?}, curvature={:?}, distances={})",
            self.body_angle,
            self.turning_angle,
            self.curvature,
            self.landmark_distances.len()
        )
    }
}

impl From<&FrameMetrics> for PyFrameMetrics {
    fn from(m: &FrameMetrics) -> Self {
        Self {
            body_angle: m.body_angle,
            turning_angle: m.turning_angle,
            curvature: m.curvature,
            landmark_distances: m.landmark_distances.clone(),
        }
    }
}

/// Per-frame larva analysis
///
/// Holds outlines, head/tail positions, midlines, segment landmarks and
/// metrics of an image sequence. Points are ``(x, y)`` tuples in pixels.
///
/// Example:
///     >>> fa = FrameAnalysis(120, detection_strategy="Anterior = Left")
///     >>> fa.load_roi_csv("rois.csv")
///     >>> fa.analyze_all()
///     >>> fa.get_metrics(10).body_angle
#[pyclass(name = "FrameAnalysis")]
#[derive(Debug, Clone)]
pub struct PyFrameAnalysis {
    inner: FrameAnalysisState,
}

#[pymethods]
impl PyFrameAnalysis {
    #[new]
    #[pyo3(signature = (
        total_frames,
        detection_strategy = "top",
        midline_mode = "skeleton",
        roi_offset = 0,
        snap_to_roi = true,
        auto_detect = true,
    ))]
    fn new(
        total_frames: u32,
        detection_strategy: &str,
        midline_mode: &str,
        roi_offset: i64,
        snap_to_roi: bool,
        auto_detect: bool,
    ) -> PyResult<Self> {
        let settings = AnalysisSettings {
            detection_strategy: detection_strategy.parse().map_err(value_err)?,
            midline_mode: midline_mode.parse().map_err(value_err)?,
            roi_offset,
            snap_to_roi,
            auto_detect,
        };
        Ok(Self {
            inner: FrameAnalysisState::new(settings, total_frames),
        })
    }

    /// Builds the analysis from a saved session file.
    #[staticmethod]
    fn from_session(path: &str) -> PyResult<Self> {
        let session = Session::load(path).map_err(runtime_err)?;
        let mut inner = FrameAnalysisState::default();
        session.restore(&mut inner).map_err(value_err)?;
        Ok(Self { inner })
    }

    #[getter]
    fn total_frames(&self) -> u32 {
        self.inner.total_frames()
    }

    fn set_contour(&mut self, frame: u32, points: Vec<PyPoint>) -> PyResult<()> {
        let contour = Contour::new(frame, points.into_iter().map(Point::from).collect())
            .map_err(value_err)?;
        self.inner.set_contour(frame, Some(contour));
        Ok(())
    }

    /// Loads ROI outlines (``roi_index, x, y`` rows) and assigns them to
    /// frames with the ROI offset. Returns the number of frames with an outline.
    fn load_roi_csv(&mut self, path: &str) -> PyResult<usize> {
        let rois = RoiSequence::read_csv(path).map_err(runtime_err)?;
        self.inner.load_contours(&rois).map_err(value_err)
    }

    /// (head, tail) when both are set.
    fn get_endpoints(&self, frame: u32) -> Option<(PyPoint, PyPoint)> {
        self.inner
            .get_endpoints(frame)
            .and_then(|p| p.positions())
            .map(|(h, t)| (to_py(&h), to_py(&t)))
    }

    fn has_manual_endpoints(&self, frame: u32) -> bool {
        self.inner
            .get_endpoints(frame)
            .is_some_and(|p| p.has_manual())
    }

    #[pyo3(signature = (frame, head, tail, manual = true))]
    fn set_endpoints(&mut self, frame: u32, head: PyPoint, tail: PyPoint, manual: bool) {
        self.inner
            .set_endpoints(frame, head.into(), tail.into(), manual);
    }

    fn clear_endpoints(&mut self, frame: u32) {
        self.inner.clear_endpoints(frame);
    }

    fn clear_frame(&mut self, frame: u32) {
        self.inner.clear_frame(frame);
    }

    fn swap_endpoints(&mut self, frame: u32) -> bool {
        self.inner.swap_endpoints(frame)
    }

    /// Drag of the head (``is_head=True``) or tail; returns the stored position.
    fn move_endpoint(&mut self, frame: u32, is_head: bool, point: PyPoint) -> PyPoint {
        let which = if is_head {
            EndpointKind::Head
        } else {
            EndpointKind::Tail
        };
        to_py(&self.inner.move_endpoint(frame, which, point.into()))
    }

    /// Returns (updated, preserved, failed) frame lists.
    #[pyo3(signature = (frames, strategy = None, preserve_manual = true))]
    fn recompute_endpoints(
        &mut self,
        frames: Vec<u32>,
        strategy: Option<&str>,
        preserve_manual: bool,
    ) -> PyResult<(Vec<u32>, Vec<u32>, Vec<u32>)> {
        let strategy: DetectionStrategy = match strategy {
            Some(s) => s.parse().map_err(value_err)?,
            None => self.inner.settings.detection_strategy,
        };
        let summary =
            self.inner
                .recompute_endpoints(frames, strategy, preserve_manual, &CancelToken::new());
        Ok((summary.updated, summary.preserved, summary.failed))
    }

    #[pyo3(signature = (frame, mode = None))]
    fn compute_midline(&mut self, frame: u32, mode: Option<&str>) -> PyResult<Option<Vec<PyPoint>>> {
        let mode: MidlineMode = match mode {
            Some(m) => m.parse().map_err(value_err)?,
            None => self.inner.settings.midline_mode,
        };
        Ok(self
            .inner
            .compute_midline(frame, mode)
            .map(|m| m.points().iter().map(to_py).collect()))
    }

    fn get_midline(&self, frame: u32) -> Option<Vec<PyPoint>> {
        self.inner
            .get_midline(frame)
            .map(|m| m.points().iter().map(to_py).collect())
    }

    fn compute_segments(&mut self, frame: u32) -> Option<BTreeMap<String, PyPoint>> {
        self.inner.compute_segments(frame).map(segments_to_py)
    }

    fn get_segments(&self, frame: u32) -> Option<BTreeMap<String, PyPoint>> {
        self.inner.get_segments(frame).map(segments_to_py)
    }

    fn move_landmark(&mut self, frame: u32, label: &str, point: PyPoint) -> PyResult<PyPoint> {
        let label: LandmarkLabel = label.parse().map_err(value_err)?;
        Ok(to_py(&self.inner.move_landmark(frame, label, point.into())))
    }

    #[pyo3(signature = (frame, point, label = None))]
    fn snap_point(&self, frame: u32, point: PyPoint, label: Option<&str>) -> PyResult<PyPoint> {
        let label = label
            .map(str::parse::<LandmarkLabel>)
            .transpose()
            .map_err(value_err)?;
        Ok(to_py(&self.inner.snap_point(frame, point.into(), label)))
    }

    /// Returns the frames that could not be measured.
    fn compute_metrics(&mut self, frames: Vec<u32>) -> Vec<u32> {
        self.inner
            .compute_metrics(frames, &CancelToken::new())
            .failed
    }

    fn get_metrics(&self, frame: u32) -> Option<PyFrameMetrics> {
        self.inner.get_metrics(frame).map(PyFrameMetrics::from)
    }

    /// Fills in missing endpoints and measures every frame. Returns the
    /// frames that could not be measured.
    fn analyze_all(&mut self) -> Vec<u32> {
        let frames = 0..self.inner.total_frames();
        self.inner.analyze_all(frames, &CancelToken::new()).metrics.failed
    }

    #[pyo3(signature = (path, video_file = None, timestamp = None))]
    fn save_session(
        &self,
        path: &str,
        video_file: Option<String>,
        timestamp: Option<String>,
    ) -> PyResult<()> {
        let mut session = Session::capture(&self.inner);
        session.video_file = video_file;
        session.timestamp = timestamp;
        session.save(path).map_err(runtime_err)
    }

    /// Replaces endpoints and landmarks with those of a session file.
    fn load_session(&mut self, path: &str) -> PyResult<usize> {
        let session = Session::load(path).map_err(runtime_err)?;
        session.restore(&mut self.inner).map_err(value_err)
    }

    fn __repr__(&self) -> String {
        format!(
            "FrameAnalysis(total_frames={}, frames_with_data={}, strategy={}, midline={})",
            self.inner.total_frames(),
            self.inner.frames().count(),
            self.inner.settings.detection_strategy,
            self.inner.settings.midline_mode
        )
    }
}
