//! Per-frame analysis records and the batch operations that fill them.
//!
//! Every write to a frame replaces that frame's entry in one step, so a
//! reader holding a snapshot never observes a half-updated frame.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::AnalysisSettings;
use crate::error::{AnalysisError, Result};
use crate::io::geometry::{Contour, Midline};
use crate::io::input::Point;
use crate::io::{contour_index_for_frame, ContourSource};
use crate::processing::endpoints::{
    apply_policy, resolve, DetectionStrategy, Endpoint, EndpointPair, PolicyOutcome, Provenance,
};
use crate::processing::metrics::{
    body_angle, curvature, landmark_distances, turning_angle, FrameMetrics,
};
use crate::processing::midline::{calculate_midline, MidlineMode};
use crate::processing::segments::{
    sample_landmarks, snap_landmark, snap_to_contour, LandmarkLabel, SegmentMap, SnapContext,
};

/// Shared flag a driver sets to stop a running batch between frames.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a batch did, frame by frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub updated: Vec<u32>,
    /// Frames left untouched because they already held complete endpoints.
    pub preserved: Vec<u32>,
    /// Frames lacking the input the operation needs.
    pub failed: Vec<u32>,
    /// Set when the batch stopped early; frames listed above stay committed.
    pub cancelled: bool,
}

/// Outcome of [`FrameAnalysisState::analyze_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzeSummary {
    pub endpoints: BatchSummary,
    pub metrics: BatchSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Previous,
    Next,
}

impl Direction {
    fn step(self) -> i64 {
        match self {
            Direction::Previous => -1,
            Direction::Next => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Head,
    Tail,
}

/// Everything known about one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameEntry {
    pub contour: Option<Contour>,
    pub endpoints: EndpointPair,
    pub midline: Option<Midline>,
    pub segments: Option<SegmentMap>,
    pub metrics: Option<FrameMetrics>,
}

/// Analysis records of a whole image sequence.
///
/// Entries are created on first write to a frame and only removed data-wise
/// by [`FrameAnalysisState::clear_frame`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameAnalysisState {
    pub settings: AnalysisSettings,
    total_frames: u32,
    entries: BTreeMap<u32, FrameEntry>,
}

impl FrameAnalysisState {
    pub fn new(settings: AnalysisSettings, total_frames: u32) -> Self {
        FrameAnalysisState {
            settings,
            total_frames,
            entries: BTreeMap::new(),
        }
    }

    pub fn total_frames(&self) -> u32 {
        self.total_frames
    }

    pub fn set_total_frames(&mut self, total_frames: u32) {
        self.total_frames = total_frames;
    }

    /// Frames that have an entry, ascending.
    pub fn frames(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    pub fn entry(&self, frame: u32) -> Option<&FrameEntry> {
        self.entries.get(&frame)
    }

    fn entry_mut(&mut self, frame: u32) -> &mut FrameEntry {
        self.entries.entry(frame).or_default()
    }

    /// Copy of the current entry, or an empty one.
    fn snapshot(&self, frame: u32) -> FrameEntry {
        self.entries.get(&frame).cloned().unwrap_or_default()
    }

    fn commit(&mut self, frame: u32, entry: FrameEntry) {
        self.entries.insert(frame, entry);
    }

    // ---- contours ----

    pub fn contour(&self, frame: u32) -> Option<&Contour> {
        self.entries.get(&frame).and_then(|e| e.contour.as_ref())
    }

    pub fn set_contour(&mut self, frame: u32, contour: Option<Contour>) {
        self.entry_mut(frame).contour = contour;
    }

    /// Pulls the contour of every frame in `0..total_frames` from `source`,
    /// applying the configured ROI offset.
    ///
    /// Fails without touching the state when any frame maps outside the
    /// source. Returns the number of frames that received an outline.
    pub fn load_contours<S: ContourSource + ?Sized>(&mut self, source: &S) -> Result<usize> {
        let available = source.contour_count();
        let offset = self.settings.roi_offset;
        let indices = (0..self.total_frames)
            .map(|frame| contour_index_for_frame(frame, offset, available).map(|i| (frame, i)))
            .collect::<Result<Vec<_>>>()?;

        let mut loaded = 0;
        for (frame, index) in indices {
            let contour = source.contour_at(index).cloned();
            loaded += usize::from(contour.is_some());
            self.set_contour(frame, contour);
        }
        info!(
            "loaded {} contours for {} frames (ROI offset {})",
            loaded, self.total_frames, offset
        );
        Ok(loaded)
    }

    // ---- accessors ----

    /// Endpoints of `frame`, `None` when neither head nor tail is set.
    pub fn get_endpoints(&self, frame: u32) -> Option<EndpointPair> {
        self.entries
            .get(&frame)
            .map(|e| e.endpoints)
            .filter(|p| !p.is_empty())
    }

    pub fn get_midline(&self, frame: u32) -> Option<&Midline> {
        self.entries.get(&frame).and_then(|e| e.midline.as_ref())
    }

    pub fn get_segments(&self, frame: u32) -> Option<&SegmentMap> {
        self.entries.get(&frame).and_then(|e| e.segments.as_ref())
    }

    pub fn get_metrics(&self, frame: u32) -> Option<&FrameMetrics> {
        self.entries.get(&frame).and_then(|e| e.metrics.as_ref())
    }

    // ---- endpoint edits ----

    fn provenance(manual: bool) -> Provenance {
        if manual {
            Provenance::Manual
        } else {
            Provenance::Auto
        }
    }

    pub fn set_endpoints(&mut self, frame: u32, head: Point, tail: Point, manual: bool) {
        self.entry_mut(frame).endpoints = EndpointPair::new(head, tail, Self::provenance(manual));
    }

    pub fn set_head(&mut self, frame: u32, head: Point, manual: bool) {
        self.entry_mut(frame).endpoints.head = Some(Endpoint {
            position: head,
            provenance: Self::provenance(manual),
        });
    }

    pub fn set_tail(&mut self, frame: u32, tail: Point, manual: bool) {
        self.entry_mut(frame).endpoints.tail = Some(Endpoint {
            position: tail,
            provenance: Self::provenance(manual),
        });
    }

    pub fn clear_endpoints(&mut self, frame: u32) {
        if let Some(e) = self.entries.get_mut(&frame) {
            e.endpoints = EndpointPair::default();
        }
    }

    /// Exchanges head and tail; false when the frame lacks either.
    pub fn swap_endpoints(&mut self, frame: u32) -> bool {
        match self.entries.get_mut(&frame) {
            Some(e) if e.endpoints.is_complete() => {
                e.endpoints.swap();
                true
            }
            _ => false,
        }
    }

    /// Drops endpoints and everything derived from them; the contour stays.
    pub fn clear_frame(&mut self, frame: u32) {
        if let Some(e) = self.entries.get_mut(&frame) {
            e.endpoints = EndpointPair::default();
            e.midline = None;
            e.segments = None;
            e.metrics = None;
        }
    }

    /// Re-detects one frame with the configured strategy, discarding
    /// whatever endpoints it had.
    pub fn redetect_endpoints(&mut self, frame: u32) -> Option<EndpointPair> {
        let pair = resolve(self.contour(frame)?, self.settings.detection_strategy, None);
        self.entry_mut(frame).endpoints = pair;
        Some(pair)
    }

    /// Endpoint policy over `frames`.
    ///
    /// With `preserve_manual` frames that already hold head and tail are
    /// skipped and half-set frames are re-detected as a pair. Without it
    /// every frame with a contour is re-detected and frames without one
    /// lose their endpoints.
    pub fn recompute_endpoints<I>(
        &mut self,
        frames: I,
        strategy: DetectionStrategy,
        preserve_manual: bool,
        cancel: &CancelToken,
    ) -> BatchSummary
    where
        I: IntoIterator<Item = u32>,
    {
        let mut summary = BatchSummary::default();
        for frame in frames {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let Some(contour) = self.contour(frame) else {
                debug!("frame {}: no contour, endpoints not detected", frame);
                if !preserve_manual {
                    self.clear_endpoints(frame);
                }
                summary.failed.push(frame);
                continue;
            };
            let existing = self.get_endpoints(frame);
            match apply_policy(contour, strategy, existing.as_ref(), preserve_manual) {
                PolicyOutcome::Preserved => summary.preserved.push(frame),
                PolicyOutcome::Updated(pair) => {
                    self.entry_mut(frame).endpoints = pair;
                    summary.updated.push(frame);
                }
            }
        }
        info!(
            "endpoints ({}, {}): {} updated, {} preserved, {} without contour{}",
            strategy,
            if preserve_manual { "preserve manual" } else { "forced" },
            summary.updated.len(),
            summary.preserved.len(),
            summary.failed.len(),
            if summary.cancelled { ", cancelled" } else { "" }
        );
        summary
    }

    /// Head and tail of `frame`, auto-detecting missing ones first when
    /// the settings allow it.
    fn ensure_endpoints(&mut self, frame: u32) -> Option<(Point, Point)> {
        if let Some(positions) = self.get_endpoints(frame).and_then(|p| p.positions()) {
            return Some(positions);
        }
        if !self.settings.auto_detect {
            return None;
        }
        let contour = self.contour(frame)?;
        let existing = self.get_endpoints(frame);
        match apply_policy(contour, self.settings.detection_strategy, existing.as_ref(), true) {
            PolicyOutcome::Updated(pair) => {
                debug!("frame {}: endpoints auto-detected", frame);
                self.entry_mut(frame).endpoints = pair;
                pair.positions()
            }
            PolicyOutcome::Preserved => existing.and_then(|p| p.positions()),
        }
    }

    fn midline_from(&self, frame: u32, head: Point, tail: Point, mode: MidlineMode) -> Option<Midline> {
        calculate_midline(mode, self.contour(frame)?, head, tail)
    }

    // ---- derived data ----

    /// Recomputes the midline of `frame`; a failed extraction leaves the
    /// frame without a midline.
    pub fn compute_midline(&mut self, frame: u32, mode: MidlineMode) -> Option<&Midline> {
        let midline = self
            .ensure_endpoints(frame)
            .and_then(|(head, tail)| self.midline_from(frame, head, tail, mode));
        if midline.is_none() {
            debug!("frame {}: no midline", frame);
        }
        self.entry_mut(frame).midline = midline;
        self.get_midline(frame)
    }

    /// Places the thirty landmarks on `frame` with the configured midline
    /// mode. Existing landmarks are kept when placement fails.
    pub fn compute_segments(&mut self, frame: u32) -> Option<&SegmentMap> {
        let (head, tail) = self.ensure_endpoints(frame)?;
        let contour = self.contour(frame)?;
        let midline = calculate_midline(self.settings.midline_mode, contour, head, tail);
        let segments = midline
            .as_ref()
            .and_then(|m| sample_landmarks(contour, &head, &tail, m));

        let mut entry = self.snapshot(frame);
        entry.midline = midline;
        let placed = segments.is_some();
        if placed {
            entry.segments = segments;
        } else {
            debug!("frame {}: landmark placement failed", frame);
        }
        self.commit(frame, entry);
        if placed {
            self.get_segments(frame)
        } else {
            None
        }
    }

    pub fn compute_segments_all<I>(&mut self, frames: I, cancel: &CancelToken) -> BatchSummary
    where
        I: IntoIterator<Item = u32>,
    {
        let mut summary = BatchSummary::default();
        for frame in frames {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if self.compute_segments(frame).is_some() {
                summary.updated.push(frame);
            } else {
                summary.failed.push(frame);
            }
        }
        info!(
            "landmarks: {} frames placed, {} failed{}",
            summary.updated.len(),
            summary.failed.len(),
            if summary.cancelled { ", cancelled" } else { "" }
        );
        summary
    }

    /// Body angle of the closest earlier frame that has both endpoints.
    fn previous_body_angle(&self, frame: u32) -> Option<f64> {
        self.entries
            .range(..frame)
            .rev()
            .find_map(|(_, e)| e.endpoints.positions())
            .map(|(h, t)| body_angle(&h, &t))
    }

    /// Metrics for `frames`, processed in the order given. Turning angles
    /// see endpoints auto-detected earlier in the batch, so pass frames
    /// ascending.
    ///
    /// Frames without endpoints lose their metrics and are reported as
    /// failed. A failed midline only leaves curvature and midline distances
    /// out.
    pub fn compute_metrics<I>(&mut self, frames: I, cancel: &CancelToken) -> BatchSummary
    where
        I: IntoIterator<Item = u32>,
    {
        let mode = self.settings.midline_mode;
        let mut summary = BatchSummary::default();

        for frame in frames {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let Some((head, tail)) = self.ensure_endpoints(frame) else {
                if let Some(e) = self.entries.get_mut(&frame) {
                    e.metrics = None;
                }
                summary.failed.push(frame);
                continue;
            };

            let angle = body_angle(&head, &tail);
            let turning = self
                .previous_body_angle(frame)
                .map(|prev| turning_angle(prev, angle));
            let midline = self.midline_from(frame, head, tail, mode);

            let mut entry = self.snapshot(frame);
            let distances = entry
                .segments
                .as_ref()
                .map(|s| landmark_distances(s, entry.contour.as_ref(), midline.as_ref()))
                .unwrap_or_default();
            entry.metrics = Some(FrameMetrics {
                body_angle: angle,
                turning_angle: turning,
                curvature: midline.as_ref().and_then(curvature),
                landmark_distances: distances,
            });
            entry.midline = midline;
            self.commit(frame, entry);
            summary.updated.push(frame);
        }
        info!(
            "metrics: {} frames, {} without endpoints{}",
            summary.updated.len(),
            summary.failed.len(),
            if summary.cancelled { ", cancelled" } else { "" }
        );
        summary
    }

    /// Fills missing endpoints (manual ones are kept) and computes midline
    /// and metrics for every frame.
    pub fn analyze_all<I>(&mut self, frames: I, cancel: &CancelToken) -> AnalyzeSummary
    where
        I: IntoIterator<Item = u32>,
    {
        let frames: Vec<u32> = frames.into_iter().collect();
        let strategy = self.settings.detection_strategy;
        let endpoints = self.recompute_endpoints(frames.iter().copied(), strategy, true, cancel);
        if endpoints.cancelled {
            return AnalyzeSummary {
                endpoints,
                metrics: BatchSummary {
                    cancelled: true,
                    ..BatchSummary::default()
                },
            };
        }
        let metrics = self.compute_metrics(frames, cancel);
        AnalyzeSummary { endpoints, metrics }
    }

    // ---- snapping and drags ----

    /// Midline to constrain snapping on `frame`: the stored one, else one
    /// computed from the current endpoints.
    fn snapping_midline(&self, frame: u32) -> Option<Midline> {
        let entry = self.entries.get(&frame)?;
        if let Some(m) = &entry.midline {
            return Some(m.clone());
        }
        let (head, tail) = entry.endpoints.positions()?;
        self.midline_from(frame, head, tail, self.settings.midline_mode)
    }

    fn snap_with(&self, frame: u32, point: Point, label: Option<LandmarkLabel>, segments: Option<&SegmentMap>) -> Point {
        let Some(entry) = self.entries.get(&frame) else {
            return point;
        };
        let Some(contour) = entry.contour.as_ref() else {
            return point;
        };
        let Some(label) = label else {
            return snap_to_contour(contour, &point);
        };
        let midline = self.snapping_midline(frame);
        let ctx = SnapContext {
            contour,
            head: entry.endpoints.head_position(),
            tail: entry.endpoints.tail_position(),
            midline: midline.as_ref(),
            segments: segments.or(entry.segments.as_ref()),
        };
        snap_landmark(&ctx, &point, label)
    }

    /// Snaps `point` onto the frame's outline, or onto the constrained path
    /// of `label` when one is given. Frames without a contour return the
    /// point unchanged.
    pub fn snap_point(&self, frame: u32, point: Point, label: Option<LandmarkLabel>) -> Point {
        self.snap_with(frame, point, label, None)
    }

    /// Drag of the head or tail; the result is manual.
    pub fn move_endpoint(&mut self, frame: u32, which: EndpointKind, point: Point) -> Point {
        let placed = if self.settings.snap_to_roi {
            self.snap_point(frame, point, None)
        } else {
            point
        };
        match which {
            EndpointKind::Head => self.set_head(frame, placed, true),
            EndpointKind::Tail => self.set_tail(frame, placed, true),
        }
        placed
    }

    /// Drag of one landmark.
    pub fn move_landmark(&mut self, frame: u32, label: LandmarkLabel, point: Point) -> Point {
        let placed = if self.settings.snap_to_roi {
            self.snap_point(frame, point, Some(label))
        } else {
            point
        };
        self.place_landmark(frame, label, placed);
        placed
    }

    /// Stores a landmark as given, creating the frame's map if needed.
    pub fn place_landmark(&mut self, frame: u32, label: LandmarkLabel, point: Point) {
        self.entry_mut(frame)
            .segments
            .get_or_insert_with(SegmentMap::new)
            .insert(label, point);
    }

    fn adjacent(&self, frame: u32, direction: Direction) -> Result<u32> {
        let target = frame as i64 + direction.step();
        if target < 0 || target >= self.total_frames as i64 {
            return Err(AnalysisError::FrameOutOfRange {
                frame: target,
                total: self.total_frames,
            });
        }
        Ok(target as u32)
    }

    /// Copies head and tail to the neighbouring frame as manual endpoints,
    /// re-snapped onto that frame's outline when snapping is on.
    ///
    /// `Ok(None)` when `frame` has no complete endpoints.
    pub fn copy_endpoints_to_adjacent(
        &mut self,
        frame: u32,
        direction: Direction,
    ) -> Result<Option<EndpointPair>> {
        let target = self.adjacent(frame, direction)?;
        let Some((head, tail)) = self.get_endpoints(frame).and_then(|p| p.positions()) else {
            return Ok(None);
        };
        let (head, tail) = if self.settings.snap_to_roi {
            (
                self.snap_point(target, head, None),
                self.snap_point(target, tail, None),
            )
        } else {
            (head, tail)
        };
        let pair = EndpointPair::new(head, tail, Provenance::Manual);
        self.entry_mut(target).endpoints = pair;
        debug!("endpoints copied from frame {} to {}", frame, target);
        Ok(Some(pair))
    }

    /// Copies the landmark map to the neighbouring frame. With snapping on,
    /// each landmark is snapped with the copied map as its neighbours.
    ///
    /// `Ok(None)` when `frame` has no landmarks.
    pub fn copy_segments_to_adjacent(
        &mut self,
        frame: u32,
        direction: Direction,
    ) -> Result<Option<SegmentMap>> {
        let target = self.adjacent(frame, direction)?;
        let Some(source) = self.get_segments(frame).cloned() else {
            return Ok(None);
        };
        let copied: SegmentMap = if self.settings.snap_to_roi {
            source
                .iter()
                .map(|(label, p)| (*label, self.snap_with(target, *p, Some(*label), Some(&source))))
                .collect()
        } else {
            source
        };
        self.entry_mut(target).segments = Some(copied.clone());
        debug!("{} landmarks copied from frame {} to {}", copied.len(), frame, target);
        Ok(Some(copied))
    }
}
