// ============================================================================
// FIELD PATH PARSING
// ============================================================================
// Turns a target string such as `metricResults.rds[primary]` into an ordered
// list of map keys. Dot and bracket notation may be mixed freely; bracketed
// segments may contain dots.
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PathError, PathResult};

/// Matches either a bracketed key or a bare run of key characters.
static SEGMENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^\[\]]+)\]|([^.\[\]]+)").expect("segment pattern is a valid regex")
});

/// A parsed field path. Always holds at least one non-empty segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dot/bracket path string.
    pub fn parse(input: &str) -> PathResult<Self> {
        let segments: Vec<String> = SEGMENT_PATTERN
            .captures_iter(input)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str().to_string())
            .collect();

        if segments.is_empty() {
            return Err(PathError::InvalidPath {
                input: input.to_string(),
            });
        }

        Ok(Self { segments })
    }

    /// Build a path from already-split segments. Empty segments are rejected.
    pub fn from_segments<I, S>(segments: I) -> PathResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(PathError::InvalidPath {
                input: segments.join("."),
            });
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false for a parsed path.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Split into the intermediate segments and the terminal one.
    pub fn split_last(&self) -> (&[String], &str) {
        match self.segments.split_last() {
            Some((last, parents)) => (parents, last.as_str()),
            None => (&[], ""),
        }
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if segment.contains('.') {
                write!(f, "[{}]", segment)?;
            } else if i == 0 {
                write!(f, "{}", segment)?;
            } else {
                write!(f, ".{}", segment)?;
            }
        }
        Ok(())
    }
}
