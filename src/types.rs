//! Core data types used throughout the access layer
//!
//! # Key Types
//!
//! - **`SeriesKey`**: Canonical identifier of one time series (base name
//!   joined with ordered label values)
//! - **`Labels`**: Ordered label name/value mapping attached to a series
//! - **`DataPoint`**: A single measurement (epoch-millisecond timestamp + value)
//! - **`DuplicatePolicy`**: Store-side resolution for duplicate timestamps
//! - **`Aggregations`**: Ordered mapping from aggregation function to window
//!   expression
//!
//! # Example
//!
//! ```rust
//! use rts_bridge::types::{DataPoint, Labels};
//!
//! let mut labels = Labels::new();
//! labels.insert("site", "site_101");
//! labels.insert("parameter", "parameter_3");
//!
//! let point = DataPoint::new(1693298532000, 33.0);
//! assert_eq!(point.timestamp, 1693298532000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Canonical identifier of a time series
///
/// Derived deterministically from a base name and the ordered label values,
/// joined with `:`. Two requests with the same base name and the same label
/// values in the same order resolve to the same key.
pub type SeriesKey = String;

/// Separator between the base name and label values in a derived key
pub const KEY_SEPARATOR: &str = ":";

/// Label name reserved for the datapoint payload in ingestion streams
///
/// Must never reach the store as a label; stripped before key derivation
/// and before any LABELS clause is rendered.
pub const RESERVED_LABEL: &str = "datapoints";

/// Ordered label name/value mapping
///
/// Insertion order is significant: the derived series key joins the values
/// in exactly this order, so the mapping is backed by a vector rather than
/// a hash map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    /// Create an empty label set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a label, preserving position on overwrite
    ///
    /// Values of any primitive type are accepted and stored in their
    /// rendered form (`9` becomes `"9"`).
    pub fn insert(&mut self, name: impl Into<String>, value: impl ToString) {
        let name = name.into();
        let value = value.to_string();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.insert(name, value);
        self
    }

    /// Remove a label by name, returning its value if present
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self.0.iter().position(|(n, _)| n == name)?;
        Some(self.0.remove(idx).1)
    }

    /// Look up a label value by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// True when no labels are present
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over `(name, value)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Iterate over label values in insertion order
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(_, v)| v.as_str())
    }

    /// Copy of this label set with the reserved entry stripped
    pub fn without_reserved(&self) -> Labels {
        Labels(
            self.0
                .iter()
                .filter(|(n, _)| n != RESERVED_LABEL)
                .cloned()
                .collect(),
        )
    }
}

impl<N: Into<String>, V: ToString> FromIterator<(N, V)> for Labels {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut labels = Labels::new();
        for (name, value) in iter {
            labels.insert(name, value);
        }
        labels
    }
}

/// A single time-series measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Epoch timestamp in milliseconds
    pub timestamp: i64,

    /// Measured value
    pub value: f64,
}

impl DataPoint {
    /// Create a new data point
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Store-side resolution for a duplicate timestamp on the same series
///
/// Parsed case-insensitively; anything outside the six accepted values is a
/// local validation failure with no store traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    /// Reject the duplicate write
    Block,
    /// Keep the first value written
    First,
    /// Keep the most recent value
    Last,
    /// Keep the smaller value
    Min,
    /// Keep the larger value
    Max,
    /// Sum both values
    Sum,
}

impl DuplicatePolicy {
    /// Keyword form used in rendered commands
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::Block => "BLOCK",
            DuplicatePolicy::First => "FIRST",
            DuplicatePolicy::Last => "LAST",
            DuplicatePolicy::Min => "MIN",
            DuplicatePolicy::Max => "MAX",
            DuplicatePolicy::Sum => "SUM",
        }
    }
}

impl FromStr for DuplicatePolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(DuplicatePolicy::Block),
            "first" => Ok(DuplicatePolicy::First),
            "last" => Ok(DuplicatePolicy::Last),
            "min" => Ok(DuplicatePolicy::Min),
            "max" => Ok(DuplicatePolicy::Max),
            "sum" => Ok(DuplicatePolicy::Sum),
            other => Err(ValidationError::InvalidDuplicatePolicy(other.to_string())),
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered mapping from aggregation function name to window expression
///
/// Window expressions are human-readable duration strings (`"2hours"`);
/// the converter normalizes each one to integer milliseconds before a
/// command is rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregations(Vec<(String, String)>);

impl Aggregations {
    /// Create an empty aggregation spec
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an aggregation, preserving position on overwrite
    pub fn insert(&mut self, function: impl Into<String>, window: impl Into<String>) {
        let function = function.into();
        let window = window.into();
        match self.0.iter_mut().find(|(f, _)| *f == function) {
            Some(entry) => entry.1 = window,
            None => self.0.push((function, window)),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, function: impl Into<String>, window: impl Into<String>) -> Self {
        self.insert(function, window);
        self
    }

    /// True when no aggregations are present
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of aggregations
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over `(function, window)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(f, w)| (f.as_str(), w.as_str()))
    }
}

impl<F: Into<String>, W: Into<String>> FromIterator<(F, W)> for Aggregations {
    fn from_iter<T: IntoIterator<Item = (F, W)>>(iter: T) -> Self {
        let mut aggs = Aggregations::new();
        for (function, window) in iter {
            aggs.insert(function, window);
        }
        aggs
    }
}
