//! Sensor line decoding.
//!
//! The sensor emits ASCII lines such as `+23.50C`. A line is a sample only if
//! it is longer than six characters and ends with the unit marker `C`; the
//! five characters after the leading sign hold the magnitude. Anything else is
//! noise and is dropped without surfacing an error.

use crate::domain::reading::Temperature;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Trailing unit marker of every sample line
pub const UNIT_MARKER: char = 'C';

/// A sample line must be strictly longer than this many characters
pub const MIN_LINE_LEN_EXCLUSIVE: usize = 6;

const FIELD_START: usize = 1;
const FIELD_END: usize = 6;

/// Why a line was not turned into a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Too short or missing the unit marker; no numeric parse attempted
    Shape,
    /// Right shape, but the magnitude field is not a finite decimal number
    Numeric,
}

/// Decode one line into a Celsius reading, or `None` if it is not a sample.
pub fn parse_line(line: &str) -> Option<Temperature> {
    classify(line).ok()
}

fn classify(line: &str) -> Result<Temperature, Rejection> {
    if line.chars().count() <= MIN_LINE_LEN_EXCLUSIVE || !line.ends_with(UNIT_MARKER) {
        return Err(Rejection::Shape);
    }

    // Length check above guarantees character FIELD_END exists.
    let mut offsets = line.char_indices().map(|(offset, _)| offset);
    let start = offsets.nth(FIELD_START).ok_or(Rejection::Shape)?;
    let end = offsets
        .nth(FIELD_END - FIELD_START - 1)
        .ok_or(Rejection::Shape)?;

    line[start..end]
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(Temperature::celsius)
        .ok_or(Rejection::Numeric)
}

/// Counters kept by [`LineParser`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParserStats {
    pub accepted: u64,
    pub rejected_shape: u64,
    pub rejected_numeric: u64,
}

/// [`parse_line`] plus accept/reject counters for diagnostics.
#[derive(Debug, Default)]
pub struct LineParser {
    accepted: AtomicU64,
    rejected_shape: AtomicU64,
    rejected_numeric: AtomicU64,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&self, line: &str) -> Option<Temperature> {
        match classify(line) {
            Ok(reading) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                trace!("Accepted sensor line {:?} as {}", line, reading);
                Some(reading)
            }
            Err(Rejection::Shape) => {
                self.rejected_shape.fetch_add(1, Ordering::Relaxed);
                trace!("Dropped non-sample line {:?}", line);
                None
            }
            Err(Rejection::Numeric) => {
                self.rejected_numeric.fetch_add(1, Ordering::Relaxed);
                debug!("Dropped sample line with malformed value {:?}", line);
                None
            }
        }
    }

    pub fn stats(&self) -> ParserStats {
        ParserStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected_shape: self.rejected_shape.load(Ordering::Relaxed),
            rejected_numeric: self.rejected_numeric.load(Ordering::Relaxed),
        }
    }
}
