use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

use super::input::Point;
use crate::analysis::FrameAnalysisState;
use crate::config::AnalysisSettings;
use crate::error::AnalysisError;
use crate::processing::endpoints::Provenance;
use crate::processing::segments::SegmentMap;

/// Version written by [`Session::save`].
pub const SESSION_VERSION: &str = "1.2";
/// 1.0 and 1.1 files carry no provenance; their endpoints load as manual.
const LEGACY_VERSIONS: [&str; 2] = ["1.0", "1.1"];

fn legacy_version() -> String {
    LEGACY_VERSIONS[0].to_string()
}

/// Saved annotations of one analysed sequence.
///
/// .. code-block:: json
///
///    {
///      "version": "1.2",
///      "total_frames": 120,
///      "settings": { "detection_strategy": "top", ... },
///      "head_positions": { "0": [101.5, 88.0] },
///      "tail_positions": { "0": [180.0, 91.25] },
///      "segment_points": { "0": { "t1l": [110.0, 84.0], ... } },
///      "manual_frames": [0]
///    }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default = "legacy_version")]
    pub version: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub video_file: Option<String>,
    #[serde(default)]
    pub roi_path: Option<String>,
    #[serde(default)]
    pub total_frames: u32,
    #[serde(default)]
    pub settings: AnalysisSettings,
    #[serde(default)]
    pub head_positions: BTreeMap<u32, Point>,
    #[serde(default)]
    pub tail_positions: BTreeMap<u32, Point>,
    #[serde(default)]
    pub segment_points: BTreeMap<u32, SegmentMap>,
    /// Frames with at least one hand-placed endpoint.
    #[serde(default)]
    pub manual_frames: BTreeSet<u32>,
}

impl Session {
    /// Endpoints, landmarks and settings of `state`; file metadata is left empty.
    pub fn capture(state: &FrameAnalysisState) -> Self {
        let mut session = Session {
            version: SESSION_VERSION.to_string(),
            timestamp: None,
            video_file: None,
            roi_path: None,
            total_frames: state.total_frames(),
            settings: state.settings,
            head_positions: BTreeMap::new(),
            tail_positions: BTreeMap::new(),
            segment_points: BTreeMap::new(),
            manual_frames: BTreeSet::new(),
        };

        for frame in state.frames() {
            if let Some(pair) = state.get_endpoints(frame) {
                if let Some(head) = pair.head_position() {
                    session.head_positions.insert(frame, head);
                }
                if let Some(tail) = pair.tail_position() {
                    session.tail_positions.insert(frame, tail);
                }
                if pair.has_manual() {
                    session.manual_frames.insert(frame);
                }
            }
            if let Some(segments) = state.get_segments(frame) {
                session.segment_points.insert(frame, segments.clone());
            }
        }
        session
    }

    pub fn is_legacy(&self) -> bool {
        LEGACY_VERSIONS.contains(&self.version.as_str())
    }

    pub fn validate(&self) -> std::result::Result<(), AnalysisError> {
        if self.is_legacy() || self.version == SESSION_VERSION {
            Ok(())
        } else {
            Err(AnalysisError::UnsupportedSessionVersion(self.version.clone()))
        }
    }

    /// Replaces the annotations of `state` with the saved ones.
    ///
    /// Contours stay; midlines and metrics are dropped since they derive
    /// from the replaced endpoints. Returns the number of frames that got
    /// endpoints back.
    pub fn restore(&self, state: &mut FrameAnalysisState) -> std::result::Result<usize, AnalysisError> {
        self.validate()?;

        state.settings = self.settings;
        if self.total_frames > 0 {
            state.set_total_frames(self.total_frames);
        }
        let known: Vec<u32> = state.frames().collect();
        for frame in known {
            state.clear_frame(frame);
        }

        let legacy = self.is_legacy();
        let provenance = |frame: u32| {
            if legacy || self.manual_frames.contains(&frame) {
                Provenance::Manual
            } else {
                Provenance::Auto
            }
        };

        let mut restored = BTreeSet::new();
        for (frame, head) in &self.head_positions {
            state.set_head(*frame, *head, provenance(*frame) == Provenance::Manual);
            restored.insert(*frame);
        }
        for (frame, tail) in &self.tail_positions {
            state.set_tail(*frame, *tail, provenance(*frame) == Provenance::Manual);
            restored.insert(*frame);
        }
        for (frame, segments) in &self.segment_points {
            for (label, p) in segments {
                state.place_landmark(*frame, *label, *p);
            }
        }

        info!(
            "session {} restored: {} frames with endpoints, {} with landmarks",
            self.version,
            restored.len(),
            self.segment_points.len()
        );
        Ok(restored.len())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serializing session")
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let session: Session = serde_json::from_str(text).context("parsing session JSON")?;
        session.validate()?;
        Ok(session)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("failed to create session file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .with_context(|| format!("failed to write session {}", path.display()))?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open session file {}", path.display()))?;
        let session: Session = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse session {}", path.display()))?;
        session
            .validate()
            .with_context(|| format!("in session file {}", path.display()))?;
        Ok(session)
    }
}
