use thiserror::Error;

/// Errors surfaced to callers of the analysis engine.
///
/// Per-frame algorithmic failures never end up here; they are reported as
/// absent results so that batches keep going.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("need at least {required} points, found {found}")]
    TooFewPoints { found: usize, required: usize },

    #[error(
        "frame {frame} with ROI offset {offset} maps to contour index {index}, \
         but the source only holds {available} contours"
    )]
    ContourIndexOutOfRange {
        frame: u32,
        offset: i64,
        index: i64,
        available: usize,
    },

    #[error("frame {frame} is outside the analysed range 0..{total}")]
    FrameOutOfRange { frame: i64, total: u32 },

    #[error("unknown landmark label '{0}'")]
    UnknownLandmark(String),

    #[error("unknown endpoint detection strategy '{0}'")]
    UnknownStrategy(String),

    #[error("unknown midline mode '{0}'")]
    UnknownMidlineMode(String),

    #[error("unsupported session file version '{0}'")]
    UnsupportedSessionVersion(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
