//! Command construction for the series store
//!
//! Turns structured time-series requests into the textual command grammar
//! understood by the store (`TS.CREATE`, `TS.ALTER`, `TS.ADD`, `TS.MADD`,
//! `TS.RANGE`, `TS.MRANGE`, `TS.DEL`). Validation happens while building
//! the structured [`TsCommand`]; rendering is a separate, infallible step,
//! and nothing here ever executes a command.

use std::fmt;

use crate::convert;
use crate::error::{Error, ValidationError};
use crate::types::{
    Aggregations, DataPoint, DuplicatePolicy, Labels, SeriesKey, KEY_SEPARATOR,
};

/// Default retention for newly created series (24 hours)
pub const DEFAULT_RETENTION_MS: i64 = 86_400_000;

/// A structured request against the series store
///
/// Each variant maps to exactly one store keyword. Fields hold typed,
/// already-validated data; [`TsCommand::render`] produces the final
/// command text.
#[derive(Debug, Clone, PartialEq)]
pub enum TsCommand {
    /// Create a series skeleton (`TS.CREATE`)
    Create {
        /// Derived series key
        key: SeriesKey,
        /// Labels attached at creation time (reserved entry already stripped)
        labels: Labels,
        /// Duplicate timestamp resolution
        duplicate_policy: DuplicatePolicy,
        /// Retention window in milliseconds
        retention_ms: i64,
    },

    /// Insert a single datapoint (`TS.ADD`), creating the series on demand
    Add {
        /// Derived series key
        key: SeriesKey,
        /// Epoch-millisecond timestamp
        timestamp: i64,
        /// Measured value
        value: f64,
        /// Duplicate timestamp resolution
        duplicate_policy: DuplicatePolicy,
        /// Labels applied if the series does not exist yet
        labels: Labels,
    },

    /// Insert a batch of datapoints for one key (`TS.MADD`)
    MAdd {
        /// Target series key
        key: SeriesKey,
        /// Points in the batch
        datapoints: Vec<DataPoint>,
    },

    /// Range query over one series (`TS.RANGE`)
    Range {
        /// Target series key
        key: SeriesKey,
        /// Range start, epoch milliseconds
        start_ms: i64,
        /// Range end, epoch milliseconds
        end_ms: i64,
        /// Emit WITHLABELS
        with_labels: bool,
        /// Aggregation functions with windows already in milliseconds
        aggregations: Vec<(String, i64)>,
        /// Optional label filter; empty set omits the FILTER clause
        filters: Labels,
    },

    /// Range query across series (`TS.MRANGE`)
    MRange {
        /// Range start, epoch milliseconds
        start_ms: i64,
        /// Range end, epoch milliseconds
        end_ms: i64,
        /// Emit WITHLABELS
        with_labels: bool,
        /// Aggregation functions with windows already in milliseconds
        aggregations: Vec<(String, i64)>,
        /// Label filter; guaranteed non-empty by construction
        filters: Labels,
        /// GROUPBY label and REDUCE function, only ever both or neither
        group_by: Option<(String, String)>,
    },

    /// Delete datapoints in a range (`TS.DEL`)
    Del {
        /// Target series key
        key: SeriesKey,
        /// Lower bound; `None` renders the open sentinel `-`
        from_ms: Option<i64>,
        /// Upper bound; `None` renders the open sentinel `+`
        to_ms: Option<i64>,
    },

    /// Alter series configuration (`TS.ALTER`)
    Alter {
        /// Target series key
        key: SeriesKey,
        /// Replacement labels, when supplied
        labels: Option<Labels>,
        /// Replacement duplicate policy, when supplied
        duplicate_policy: Option<DuplicatePolicy>,
        /// Replacement retention; zero means "unspecified" and is omitted
        retention_ms: i64,
    },
}

impl TsCommand {
    /// Store keyword for this command
    pub fn keyword(&self) -> &'static str {
        match self {
            TsCommand::Create { .. } => "TS.CREATE",
            TsCommand::Add { .. } => "TS.ADD",
            TsCommand::MAdd { .. } => "TS.MADD",
            TsCommand::Range { .. } => "TS.RANGE",
            TsCommand::MRange { .. } => "TS.MRANGE",
            TsCommand::Del { .. } => "TS.DEL",
            TsCommand::Alter { .. } => "TS.ALTER",
        }
    }

    /// True for commands that change store state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            TsCommand::Create { .. }
                | TsCommand::Add { .. }
                | TsCommand::MAdd { .. }
                | TsCommand::Del { .. }
                | TsCommand::Alter { .. }
        )
    }

    /// Series key this command targets, when it targets exactly one
    pub fn key(&self) -> Option<&str> {
        match self {
            TsCommand::Create { key, .. }
            | TsCommand::Add { key, .. }
            | TsCommand::MAdd { key, .. }
            | TsCommand::Range { key, .. }
            | TsCommand::Del { key, .. }
            | TsCommand::Alter { key, .. } => Some(key),
            TsCommand::MRange { .. } => None,
        }
    }

    /// Render the final command text
    pub fn render(&self) -> String {
        match self {
            TsCommand::Create {
                key,
                labels,
                duplicate_policy,
                retention_ms,
            } => {
                let mut out = format!(
                    "TS.CREATE {} RETENTION {} DUPLICATE_POLICY {}",
                    key, retention_ms, duplicate_policy
                );
                push_labels_clause(&mut out, labels);
                out
            },

            TsCommand::Add {
                key,
                timestamp,
                value,
                duplicate_policy,
                labels,
            } => {
                let mut out = format!(
                    "TS.ADD {} {} {} DUPLICATE_POLICY {}",
                    key, timestamp, value, duplicate_policy
                );
                push_labels_clause(&mut out, labels);
                out
            },

            TsCommand::MAdd { key, datapoints } => {
                let triples: Vec<String> = datapoints
                    .iter()
                    .map(|p| format!("{} {} {}", key, p.timestamp, p.value))
                    .collect();
                format!("TS.MADD {}", triples.join(", "))
            },

            TsCommand::Range {
                key,
                start_ms,
                end_ms,
                with_labels,
                aggregations,
                filters,
            } => {
                let mut out = format!("TS.RANGE {} {} {}", key, start_ms, end_ms);
                if *with_labels {
                    out.push_str(" WITHLABELS");
                }
                push_aggregation_clause(&mut out, aggregations);
                if !filters.is_empty() {
                    out.push_str(" FILTER");
                    for (name, value) in filters.iter() {
                        out.push_str(&format!(" {} {}", name, value));
                    }
                }
                out
            },

            TsCommand::MRange {
                start_ms,
                end_ms,
                with_labels,
                aggregations,
                filters,
                group_by,
            } => {
                let mut out = format!("TS.MRANGE {} {}", start_ms, end_ms);
                if *with_labels {
                    out.push_str(" WITHLABELS");
                }
                push_aggregation_clause(&mut out, aggregations);
                out.push_str(" FILTER");
                for (name, value) in filters.iter() {
                    out.push_str(&format!(" {}={}", name, value));
                }
                if let Some((label, reduce)) = group_by {
                    out.push_str(&format!(" GROUPBY {} REDUCE {}", label, reduce));
                }
                out
            },

            TsCommand::Del { key, from_ms, to_ms } => {
                let from = from_ms.map_or_else(|| "-".to_string(), |t| t.to_string());
                let to = to_ms.map_or_else(|| "+".to_string(), |t| t.to_string());
                format!("TS.DEL {} {} {}", key, from, to)
            },

            TsCommand::Alter {
                key,
                labels,
                duplicate_policy,
                retention_ms,
            } => {
                let mut out = format!("TS.ALTER {}", key);
                // Zero retention means the caller did not ask for a change.
                if *retention_ms != 0 {
                    out.push_str(&format!(" RETENTION {}", retention_ms));
                }
                if let Some(policy) = duplicate_policy {
                    out.push_str(&format!(" DUPLICATE_POLICY {}", policy));
                }
                if let Some(labels) = labels {
                    push_labels_clause(&mut out, labels);
                }
                out
            },
        }
    }
}

impl fmt::Display for TsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn push_labels_clause(out: &mut String, labels: &Labels) {
    if labels.is_empty() {
        return;
    }
    out.push_str(" LABELS");
    for (name, value) in labels.iter() {
        out.push_str(&format!(" {} {}", name, value));
    }
}

fn push_aggregation_clause(out: &mut String, aggregations: &[(String, i64)]) {
    if aggregations.is_empty() {
        return;
    }
    // Windows always align to the query start.
    out.push_str(" ALIGN START AGGREGATION");
    for (function, window_ms) in aggregations {
        out.push_str(&format!(" {} {}", function, window_ms));
    }
}

/// Derive the canonical series key for a base name and label set
///
/// Joins the base name with every label value in insertion order using the
/// fixed separator, after stripping the reserved entry. Pure and total:
/// identical inputs always resolve to the same key.
pub fn derive_key(base_name: &str, labels: &Labels) -> SeriesKey {
    let stripped = labels.without_reserved();
    let mut key = String::from(base_name);
    for value in stripped.values() {
        key.push_str(KEY_SEPARATOR);
        key.push_str(value);
    }
    key
}

/// Build a series creation command
///
/// Returns the derived key alongside the command so callers that only need
/// the key (deferred single-point inserts) can skip execution.
pub fn build_create(
    base_name: &str,
    labels: &Labels,
    duplicate_policy: DuplicatePolicy,
    retention_ms: i64,
) -> (SeriesKey, TsCommand) {
    let stripped = labels.without_reserved();
    let key = derive_key(base_name, &stripped);
    let command = TsCommand::Create {
        key: key.clone(),
        labels: stripped,
        duplicate_policy,
        retention_ms,
    };
    (key, command)
}

/// Build a single-point insertion command
///
/// The timestamp and value take the positions the creation template
/// reserves for them; the store creates the series with the given labels
/// if it does not exist yet.
pub fn build_insert_one(
    base_name: &str,
    labels: &Labels,
    timestamp: i64,
    value: f64,
    duplicate_policy: DuplicatePolicy,
) -> (SeriesKey, TsCommand) {
    let stripped = labels.without_reserved();
    let key = derive_key(base_name, &stripped);
    let command = TsCommand::Add {
        key: key.clone(),
        timestamp,
        value,
        duplicate_policy,
        labels: stripped,
    };
    (key, command)
}

/// Build a bulk insertion command covering every datapoint for one key
pub fn build_insert_bulk(key: &str, datapoints: Vec<DataPoint>) -> TsCommand {
    TsCommand::MAdd {
        key: key.to_string(),
        datapoints,
    }
}

/// Build a range query over a single series
///
/// The aggregation spec passes through the unit converter first; a
/// malformed window aborts construction. An empty filter set omits the
/// FILTER clause entirely.
pub fn build_range_query(
    key: &str,
    start_ms: i64,
    end_ms: i64,
    filter_labels: &Labels,
    aggregations: &Aggregations,
    show_labels: bool,
) -> Result<TsCommand, Error> {
    let converted = convert::convert(aggregations)?;
    Ok(TsCommand::Range {
        key: key.to_string(),
        start_ms,
        end_ms,
        with_labels: show_labels,
        aggregations: converted,
        filters: filter_labels.clone(),
    })
}

/// Build a range query across multiple series
///
/// At least one filter label is required: an unfiltered multi-series query
/// has no bounded result set and is rejected before any command text is
/// rendered. GROUPBY/REDUCE is emitted only when both parts are supplied.
pub fn build_multi_range_query(
    start_ms: i64,
    end_ms: i64,
    filter_labels: &Labels,
    aggregations: &Aggregations,
    group_by: Option<(&str, &str)>,
    show_labels: bool,
) -> Result<TsCommand, Error> {
    if filter_labels.is_empty() {
        return Err(ValidationError::MissingFilter.into());
    }
    let converted = convert::convert(aggregations)?;
    Ok(TsCommand::MRange {
        start_ms,
        end_ms,
        with_labels: show_labels,
        aggregations: converted,
        filters: filter_labels.clone(),
        group_by: group_by.map(|(label, reduce)| (label.to_string(), reduce.to_string())),
    })
}

/// Build a deletion command over an open-ended or bounded range
///
/// `None` bounds render as the literal sentinels `-` and `+`.
pub fn build_delete(key: &str, from_ms: Option<i64>, to_ms: Option<i64>) -> TsCommand {
    TsCommand::Del {
        key: key.to_string(),
        from_ms,
        to_ms,
    }
}

/// Build an alteration command rendering only the supplied clauses
///
/// A retention of zero is treated as "unspecified" and omitted, not as
/// "set retention to zero".
pub fn build_alter(
    key: &str,
    labels: Option<&Labels>,
    duplicate_policy: Option<DuplicatePolicy>,
    retention_ms: i64,
) -> TsCommand {
    TsCommand::Alter {
        key: key.to_string(),
        labels: labels.map(|l| l.without_reserved()),
        duplicate_policy,
        retention_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_labels() -> Labels {
        Labels::new()
            .with("site", "site_101")
            .with("parameter", "parameter_3")
            .with("t", 9)
            .with("factor", "U")
    }

    #[test]
    fn test_derive_key_joins_values_in_order() {
        let key = derive_key("ganga_live_data", &sample_labels());
        assert_eq!(key, "ganga_live_data:site_101:parameter_3:9:U");
    }

    #[test]
    fn test_derive_key_deterministic() {
        let labels = sample_labels();
        assert_eq!(
            derive_key("base", &labels),
            derive_key("base", &labels.clone())
        );
    }

    #[test]
    fn test_derive_key_strips_reserved() {
        let labels = Labels::new()
            .with("site", "site_101")
            .with("datapoints", "[[1,2]]");
        assert_eq!(derive_key("base", &labels), "base:site_101");
    }

    #[test]
    fn test_derive_key_no_labels() {
        assert_eq!(derive_key("base", &Labels::new()), "base");
    }

    #[test]
    fn test_create_renders_labels_and_retention() {
        let (key, cmd) = build_create(
            "ganga_live_data",
            &sample_labels(),
            DuplicatePolicy::Last,
            DEFAULT_RETENTION_MS,
        );
        assert_eq!(key, "ganga_live_data:site_101:parameter_3:9:U");
        assert_eq!(
            cmd.render(),
            "TS.CREATE ganga_live_data:site_101:parameter_3:9:U RETENTION 86400000 \
             DUPLICATE_POLICY LAST LABELS site site_101 parameter parameter_3 t 9 factor U"
        );
    }

    #[test]
    fn test_create_without_labels_omits_clause() {
        let (_, cmd) = build_create("plain", &Labels::new(), DuplicatePolicy::Block, 1000);
        assert_eq!(cmd.render(), "TS.CREATE plain RETENTION 1000 DUPLICATE_POLICY BLOCK");
    }

    #[test]
    fn test_create_strips_reserved_from_labels_clause() {
        let labels = Labels::new()
            .with("datapoints", "x")
            .with("site", "site_101");
        let (key, cmd) = build_create("base", &labels, DuplicatePolicy::Block, 1000);
        assert_eq!(key, "base:site_101");
        assert!(!cmd.render().contains("datapoints"));
    }

    #[test]
    fn test_insert_one_substitutes_timestamp_and_value() {
        let (key, cmd) = build_insert_one(
            "ganga_live_data",
            &sample_labels(),
            1693298532000,
            33.0,
            DuplicatePolicy::Last,
        );
        assert_eq!(key, "ganga_live_data:site_101:parameter_3:9:U");
        assert_eq!(
            cmd.render(),
            "TS.ADD ganga_live_data:site_101:parameter_3:9:U 1693298532000 33 \
             DUPLICATE_POLICY LAST LABELS site site_101 parameter parameter_3 t 9 factor U"
        );
    }

    #[test]
    fn test_insert_bulk_comma_joined() {
        let cmd = build_insert_bulk(
            "ganga_live_data:site_101:parameter_3:9:U",
            vec![
                DataPoint::new(1693298532000, 33.0),
                DataPoint::new(1693298544000, 100.0),
            ],
        );
        assert_eq!(
            cmd.render(),
            "TS.MADD ganga_live_data:site_101:parameter_3:9:U 1693298532000 33, \
             ganga_live_data:site_101:parameter_3:9:U 1693298544000 100"
        );
    }

    #[test]
    fn test_range_aggregation_aligned_to_start() {
        let aggs = Aggregations::new().with("avg", "2hours");
        let cmd = build_range_query("k", 1000, 2000, &Labels::new(), &aggs, false).unwrap();
        assert_eq!(
            cmd.render(),
            "TS.RANGE k 1000 2000 ALIGN START AGGREGATION avg 7200000"
        );
    }

    #[test]
    fn test_range_with_labels_and_filter() {
        let aggs = Aggregations::new();
        let filters = Labels::new().with("site", "site_101");
        let cmd = build_range_query("k", 1000, 2000, &filters, &aggs, true).unwrap();
        assert_eq!(cmd.render(), "TS.RANGE k 1000 2000 WITHLABELS FILTER site site_101");
    }

    #[test]
    fn test_range_empty_filter_omits_clause() {
        let cmd =
            build_range_query("k", 0, 10, &Labels::new(), &Aggregations::new(), false).unwrap();
        assert!(!cmd.render().contains("FILTER"));
    }

    #[test]
    fn test_range_bad_window_aborts() {
        let aggs = Aggregations::new().with("avg", "2eons");
        let err = build_range_query("k", 0, 10, &Labels::new(), &aggs, false).unwrap_err();
        assert!(matches!(err, Error::Conversion(_)));
    }

    #[test]
    fn test_multi_range_requires_filter() {
        let err = build_multi_range_query(0, 10, &Labels::new(), &Aggregations::new(), None, false)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MissingFilter)
        ));
    }

    #[test]
    fn test_multi_range_filter_renders_equals_form() {
        let filters = Labels::new().with("site_id", "site_4041");
        let aggs = Aggregations::new().with("avg", "1hours");
        let cmd = build_multi_range_query(
            1671940300000,
            1698960200120,
            &filters,
            &aggs,
            Some(("parameter_id", "avg")),
            true,
        )
        .unwrap();
        assert_eq!(
            cmd.render(),
            "TS.MRANGE 1671940300000 1698960200120 WITHLABELS \
             ALIGN START AGGREGATION avg 3600000 \
             FILTER site_id=site_4041 GROUPBY parameter_id REDUCE avg"
        );
    }

    #[test]
    fn test_multi_range_groupby_needs_both_parts() {
        let filters = Labels::new().with("site", "s1");
        let cmd =
            build_multi_range_query(0, 10, &filters, &Aggregations::new(), None, false).unwrap();
        let rendered = cmd.render();
        assert!(!rendered.contains("GROUPBY"));
        assert!(!rendered.contains("REDUCE"));
    }

    #[test]
    fn test_delete_sentinel_bounds() {
        let cmd = build_delete("stale:1", None, None);
        assert_eq!(cmd.render(), "TS.DEL stale:1 - +");
    }

    #[test]
    fn test_delete_bounded_range() {
        let cmd = build_delete("k", Some(1678950300000), Some(1678960200000));
        assert_eq!(cmd.render(), "TS.DEL k 1678950300000 1678960200000");
    }

    #[test]
    fn test_delete_half_open() {
        let cmd = build_delete("k", Some(500), None);
        assert_eq!(cmd.render(), "TS.DEL k 500 +");
    }

    #[test]
    fn test_alter_renders_only_supplied_clauses() {
        let cmd = build_alter("k", None, Some(DuplicatePolicy::Min), 0);
        assert_eq!(cmd.render(), "TS.ALTER k DUPLICATE_POLICY MIN");

        let labels = Labels::new().with("site", "site_2");
        let cmd = build_alter("k", Some(&labels), None, 5000);
        assert_eq!(cmd.render(), "TS.ALTER k RETENTION 5000 LABELS site site_2");
    }

    #[test]
    fn test_alter_zero_retention_is_unspecified() {
        let cmd = build_alter("k", None, None, 0);
        assert_eq!(cmd.render(), "TS.ALTER k");
    }

    #[test]
    fn test_mutating_classification() {
        assert!(build_delete("k", None, None).is_mutating());
        assert!(build_insert_bulk("k", vec![]).is_mutating());
        let range =
            build_range_query("k", 0, 1, &Labels::new(), &Aggregations::new(), false).unwrap();
        assert!(!range.is_mutating());
    }

    #[test]
    fn test_command_key() {
        let cmd = build_delete("k1", None, None);
        assert_eq!(cmd.key(), Some("k1"));

        let filters = Labels::new().with("a", "b");
        let mrange =
            build_multi_range_query(0, 1, &filters, &Aggregations::new(), None, false).unwrap();
        assert_eq!(mrange.key(), None);
    }
}
