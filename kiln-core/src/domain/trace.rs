//! Trace range types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inclusive byte range `start-end` declared by a trace append
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
}

impl ContentRange {
    /// Range covering `len` bytes starting at `start`; `None` for empty chunks
    pub fn covering(start: u64, len: u64) -> Option<Self> {
        if len == 0 {
            return None;
        }
        Some(Self {
            start,
            end: start + len - 1,
        })
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeParseError {
    #[error("range must have the form start-end")]
    Malformed,

    #[error("range end {end} is before start {start}")]
    Inverted { start: u64, end: u64 },
}

impl FromStr for ContentRange {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("bytes ").unwrap_or(s);
        let (start, end) = s.split_once('-').ok_or(RangeParseError::Malformed)?;
        let start: u64 = start
            .trim()
            .parse()
            .map_err(|_| RangeParseError::Malformed)?;
        let end: u64 = end.trim().parse().map_err(|_| RangeParseError::Malformed)?;

        if end < start {
            return Err(RangeParseError::Inverted { start, end });
        }

        Ok(Self { start, end })
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// The authoritative acceptable range `0-length` reported by the coordinator
pub fn accepted_range(length: u64) -> String {
    format!("0-{}", length)
}

/// Parses an `0-length` range header back into a length
pub fn parse_accepted_range(header: &str) -> Option<u64> {
    let (start, end) = header.trim().split_once('-')?;
    if start.trim() != "0" {
        return None;
    }
    end.trim().parse().ok()
}
