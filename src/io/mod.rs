pub mod geometry;
pub mod input;
pub mod session;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use log::{info, warn};

use crate::error::{AnalysisError, Result};
use geometry::Contour;
use input::{read_roi_records, Point, RoiRecord};

/// Provides the outline ROI stored at a given contour index.
///
/// Contour indices are numbered independently of frames; callers map a frame
/// to an index with [`contour_index_for_frame`].
pub trait ContourSource {
    /// Number of addressable contour slots.
    fn contour_count(&self) -> usize;

    /// The contour at `index`, `None` when that slot holds no usable outline.
    fn contour_at(&self, index: usize) -> Option<&Contour>;
}

/// Maps `frame` to a contour index (`frame + offset`).
///
/// Indices outside `0..available` break the source contract and are errors.
pub fn contour_index_for_frame(frame: u32, offset: i64, available: usize) -> Result<usize> {
    let index = frame as i64 + offset;
    if index < 0 || index >= available as i64 {
        return Err(AnalysisError::ContourIndexOutOfRange {
            frame,
            offset,
            index,
            available,
        });
    }
    Ok(index as usize)
}

/// Ordered list of per-ROI outlines, some of which may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoiSequence {
    pub contours: Vec<Option<Contour>>,
}

impl RoiSequence {
    pub fn new(contours: Vec<Option<Contour>>) -> Self {
        RoiSequence { contours }
    }

    /// Groups vertices by ROI index; indices without a usable outline
    /// (fewer than three vertices) become empty slots.
    pub fn from_records(records: Vec<RoiRecord>) -> Self {
        let mut groups: BTreeMap<u32, Vec<Point>> = BTreeMap::new();
        for r in records {
            groups
                .entry(r.roi_index)
                .or_default()
                .push(Point::new(r.x, r.y));
        }

        let len = groups.keys().next_back().map_or(0, |k| *k as usize + 1);
        let mut contours: Vec<Option<Contour>> = vec![None; len];

        for (idx, points) in groups {
            match Contour::new(idx, points) {
                Ok(c) => contours[idx as usize] = Some(c),
                Err(e) => warn!("ROI {} dropped: {}", idx, e),
            }
        }

        RoiSequence { contours }
    }

    pub fn read_csv<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let records =
            read_roi_records(path).with_context(|| format!("reading ROIs from {}", path.display()))?;
        let seq = Self::from_records(records);
        info!(
            "loaded {} ROI slots ({} usable) from {}",
            seq.contours.len(),
            seq.contours.iter().filter(|c| c.is_some()).count(),
            path.display()
        );
        Ok(seq)
    }
}

impl ContourSource for RoiSequence {
    fn contour_count(&self) -> usize {
        self.contours.len()
    }

    fn contour_at(&self, index: usize) -> Option<&Contour> {
        self.contours.get(index).and_then(|c| c.as_ref())
    }
}
