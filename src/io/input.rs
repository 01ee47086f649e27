use anyhow::{Context, Result};
use csv::ReaderBuilder;
use log::warn;
use serde::{Deserialize, Serialize};

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A position in image pixel coordinates (x to the right, y downwards).
///
/// Serialized as a two-element `[x, y]` array, which is how positions are
/// stored in session files.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    /// Euclidean distance between two points.
    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Linear interpolation, `t = 0` gives `self`, `t = 1` gives `other`.
    pub fn lerp(&self, other: &Point, t: f64) -> Point {
        Point {
            x: self.x + t * (other.x - self.x),
            y: self.y + t * (other.y - self.y),
        }
    }
}

impl From<[f64; 2]> for Point {
    fn from(v: [f64; 2]) -> Self {
        Point { x: v[0], y: v[1] }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Point { x, y }
    }
}

/// One row of an ROI export: the ROI it belongs to and one outline vertex.
///
/// ```text
/// roi_index, x, y
/// ```
///
/// Rows of the same ROI are expected in traversal order.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct RoiRecord {
    pub roi_index: u32,
    pub x: f64,
    pub y: f64,
}

/// Utility: detect whether the file uses comma or tab as delimiter.
fn detect_delimiter<P: AsRef<Path>>(path: P) -> Result<u8> {
    let file = File::open(&path).with_context(|| {
        format!(
            "failed to open file for delimiter sniffing: {:?}",
            path.as_ref()
        )
    })?;
    let mut reader = BufReader::new(file);
    let mut first_line = String::new();
    reader
        .read_line(&mut first_line)
        .with_context(|| "failed to read first line for delimiter detection")?;

    let tabs = first_line.matches('\t').count();
    let commas = first_line.matches(',').count();

    if tabs > commas {
        Ok(b'\t')
    } else {
        Ok(b',')
    }
}

/// Reads ROI outline vertices from a headerless CSV/TSV file.
///
/// Rows that cannot be parsed are skipped with a warning.
pub fn read_roi_records<P: AsRef<Path>>(path: P) -> Result<Vec<RoiRecord>> {
    let path = path.as_ref();
    let delim = detect_delimiter(path)?;
    let file = File::open(path).with_context(|| format!("failed to open ROI file {:?}", path))?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delim)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut records = Vec::new();
    for result in rdr.records() {
        match result {
            Ok(row) => match row.deserialize(None) {
                Ok(rec) => records.push(rec),
                Err(e) => warn!("skipping invalid ROI record in {:?}: {}", path, e),
            },
            Err(e) => warn!("skipping invalid ROI row in {:?}: {}", path, e),
        }
    }

    Ok(records)
}
