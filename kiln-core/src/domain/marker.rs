//! Poll markers
//!
//! A marker is an opaque fencing token handed out on an empty poll. The
//! runner echoes it on its next poll; if it still matches the cached value
//! the coordinator answers "not modified" instead of a full no-work response.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollMarker(String);

impl PollMarker {
    /// Generates a fresh marker from the current time plus a random suffix,
    /// so two markers generated in the same instant still differ.
    pub fn generate() -> Self {
        let nonce = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", Utc::now().timestamp_micros(), &nonce[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PollMarker {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PollMarker {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for PollMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_markers_differ() {
        let a = PollMarker::generate();
        let b = PollMarker::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_marker_from_echoed_string_matches() {
        let marker = PollMarker::generate();
        let echoed = PollMarker::from(marker.to_string());
        assert_eq!(marker, echoed);
    }
}
