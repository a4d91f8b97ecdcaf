//! Aggregation window conversion
//!
//! Translates human-readable window expressions (`"2hours"`, `"30Minutes"`)
//! into the millisecond counts the store's command grammar expects. Pure,
//! no dependencies beyond the error type.

use crate::error::ConversionError;
use crate::types::Aggregations;

/// Unit suffixes and their millisecond multipliers, most specific first.
///
/// Matched in order with first-match-wins suffix stripping, so
/// "milliseconds" must stay ahead of "seconds". Months assume 30 days,
/// years 366 days.
const UNITS: [(&str, i64); 8] = [
    ("milliseconds", 1),
    ("seconds", 1_000),
    ("minutes", 60_000),
    ("hours", 3_600_000),
    ("days", 86_400_000),
    ("weeks", 604_800_000),
    ("months", 2_592_000_000),
    ("years", 31_622_400_000),
];

/// Convert one window expression to milliseconds
///
/// The expression is an integer magnitude immediately followed by a unit
/// suffix, matched case-insensitively.
///
/// # Example
///
/// ```rust
/// use rts_bridge::convert::window_to_millis;
///
/// assert_eq!(window_to_millis("2hours").unwrap(), 7_200_000);
/// assert_eq!(window_to_millis("500Milliseconds").unwrap(), 500);
/// ```
pub fn window_to_millis(expression: &str) -> Result<i64, ConversionError> {
    let lowered = expression.trim().to_ascii_lowercase();

    for (unit, multiplier) in UNITS {
        if let Some(magnitude) = lowered.strip_suffix(unit) {
            let magnitude = magnitude.trim();
            let count: i64 = magnitude.parse().map_err(|_| {
                ConversionError::InvalidMagnitude {
                    magnitude: magnitude.to_string(),
                    expression: expression.to_string(),
                }
            })?;
            return Ok(count * multiplier);
        }
    }

    Err(ConversionError::UnknownUnit(expression.to_string()))
}

/// Convert every window in an aggregation spec to milliseconds
///
/// Returns the same function names, in the same order, with each window
/// replaced by its millisecond equivalent. Any malformed window aborts the
/// whole conversion.
pub fn convert(spec: &Aggregations) -> Result<Vec<(String, i64)>, ConversionError> {
    spec.iter()
        .map(|(function, window)| Ok((function.to_string(), window_to_millis(window)?)))
        .collect()
}
