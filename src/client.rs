//! High-level time-series operations
//!
//! [`TimeSeries`] composes the command builder, the injected series store,
//! and the write ledger. Every successful mutating command (create with
//! data, single insert, bulk insert, alter) is followed by a ledger upsert
//! for the affected key; the cleanup service depends on that post-condition.
//!
//! Error policy:
//! - Validation and conversion failures reject locally, before any store
//!   traffic, and surface as `Err`.
//! - Query-style operations (`range`, `multi_range`, `execute_raw`)
//!   propagate store failures, since the caller cannot proceed without the
//!   result.
//! - Fire-and-forget mutations (`create_series`, `alter`, `delete`) log the
//!   store failure and report it through the returned flag.
//! - Ledger failures are logged and swallowed; the store mutation is the
//!   source of truth.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::command::{self, DEFAULT_RETENTION_MS};
use crate::error::Result;
use crate::ledger::WriteLedger;
use crate::store::{SeriesStore, StoreResponse};
use crate::types::{Aggregations, DataPoint, DuplicatePolicy, Labels, SeriesKey};

/// Typed access layer over the series store
pub struct TimeSeries {
    store: Arc<dyn SeriesStore>,
    ledger: Arc<WriteLedger>,
    retention_ms: i64,
}

impl TimeSeries {
    /// Create a new access layer over the given store and ledger
    pub fn new(store: Arc<dyn SeriesStore>, ledger: Arc<WriteLedger>) -> Self {
        Self {
            store,
            ledger,
            retention_ms: DEFAULT_RETENTION_MS,
        }
    }

    /// Override the retention applied to newly created series
    pub fn with_retention(mut self, retention_ms: i64) -> Self {
        self.retention_ms = retention_ms;
        self
    }

    /// Derive the canonical key for a base name and label set without
    /// touching the store
    pub fn derive_key(&self, base_name: &str, labels: &Labels) -> SeriesKey {
        command::derive_key(base_name, labels)
    }

    /// Create a series skeleton
    ///
    /// Returns the derived key and whether the store accepted the command.
    /// A store-side failure (commonly: the series already exists) is logged
    /// and reported through the flag rather than propagated.
    pub async fn create_series(
        &self,
        base_name: &str,
        labels: &Labels,
        duplicate_policy: &str,
    ) -> Result<(SeriesKey, bool)> {
        let policy: DuplicatePolicy = duplicate_policy.parse()?;
        let (key, cmd) = command::build_create(base_name, labels, policy, self.retention_ms);

        match self.store.execute(&cmd.render()).await {
            Ok(_) => Ok((key, true)),
            Err(e) => {
                warn!(key = %key, error = %e, "series creation failed");
                Ok((key, false))
            },
        }
    }

    /// Insert a single datapoint, creating the series on demand
    ///
    /// The derived key is returned; the ledger records the write.
    pub async fn insert_one(
        &self,
        base_name: &str,
        labels: &Labels,
        point: DataPoint,
        duplicate_policy: &str,
    ) -> Result<SeriesKey> {
        let policy: DuplicatePolicy = duplicate_policy.parse()?;
        let (key, cmd) =
            command::build_insert_one(base_name, labels, point.timestamp, point.value, policy);

        self.store.execute(&cmd.render()).await?;
        self.note_write(&key);
        Ok(key)
    }

    /// Insert a batch of datapoints against one derived key
    ///
    /// The series is created first with the batch's label set; a creation
    /// failure (typically: already exists) is tolerated. An empty batch
    /// derives the key but issues no insertion and no ledger upsert.
    pub async fn insert_bulk(
        &self,
        base_name: &str,
        labels: &Labels,
        datapoints: Vec<DataPoint>,
        duplicate_policy: &str,
    ) -> Result<SeriesKey> {
        let policy: DuplicatePolicy = duplicate_policy.parse()?;
        let (key, create) = command::build_create(base_name, labels, policy, self.retention_ms);

        if let Err(e) = self.store.execute(&create.render()).await {
            debug!(key = %key, error = %e, "series creation before bulk insert failed");
        }

        if datapoints.is_empty() {
            return Ok(key);
        }

        let madd = command::build_insert_bulk(&key, datapoints);
        self.store.execute(&madd.render()).await?;
        self.note_write(&key);
        Ok(key)
    }

    /// Range query over a single series
    pub async fn range(
        &self,
        key: &str,
        start_ms: i64,
        end_ms: i64,
        filter_labels: &Labels,
        aggregations: &Aggregations,
        show_labels: bool,
    ) -> Result<StoreResponse> {
        let cmd = command::build_range_query(
            key,
            start_ms,
            end_ms,
            filter_labels,
            aggregations,
            show_labels,
        )?;
        Ok(self.store.execute(&cmd.render()).await?)
    }

    /// Range query across series; at least one filter label is mandatory
    #[allow(clippy::too_many_arguments)]
    pub async fn multi_range(
        &self,
        start_ms: i64,
        end_ms: i64,
        filter_labels: &Labels,
        aggregations: &Aggregations,
        group_by: Option<(&str, &str)>,
        show_labels: bool,
    ) -> Result<StoreResponse> {
        let cmd = command::build_multi_range_query(
            start_ms,
            end_ms,
            filter_labels,
            aggregations,
            group_by,
            show_labels,
        )?;
        Ok(self.store.execute(&cmd.render()).await?)
    }

    /// Delete datapoints for a key; `None` bounds are open-ended
    ///
    /// Store failures are logged and reported through the returned flag.
    pub async fn delete(
        &self,
        key: &str,
        from_ms: Option<i64>,
        to_ms: Option<i64>,
    ) -> Result<bool> {
        let cmd = command::build_delete(key, from_ms, to_ms);
        match self.store.execute(&cmd.render()).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(key, error = %e, "series deletion failed");
                Ok(false)
            },
        }
    }

    /// Alter series configuration, rendering only the supplied clauses
    ///
    /// A retention of zero leaves retention untouched. A successful
    /// alteration counts as a write and is recorded in the ledger.
    pub async fn alter(
        &self,
        key: &str,
        labels: Option<&Labels>,
        duplicate_policy: Option<&str>,
        retention_ms: i64,
    ) -> Result<bool> {
        let policy = match duplicate_policy {
            Some(p) => Some(p.parse::<DuplicatePolicy>()?),
            None => None,
        };
        let cmd = command::build_alter(key, labels, policy, retention_ms);

        match self.store.execute(&cmd.render()).await {
            Ok(_) => {
                self.note_write(key);
                Ok(true)
            },
            Err(e) => {
                warn!(key, error = %e, "series alteration failed");
                Ok(false)
            },
        }
    }

    /// Execute a caller-supplied command verbatim
    pub async fn execute_raw(&self, query: &str) -> Result<StoreResponse> {
        Ok(self.store.execute(query).await?)
    }

    /// Ledger upsert after a successful mutating command
    ///
    /// Best-effort: the store write already succeeded, so a ledger failure
    /// is logged and swallowed.
    fn note_write(&self, key: &str) {
        if let Err(e) = self.ledger.record(key) {
            warn!(key, error = %e, "ledger update failed after store write");
        }
    }
}

impl std::fmt::Debug for TimeSeries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeries")
            .field("retention_ms", &self.retention_ms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, StoreError};
    use parking_lot::Mutex;

    /// Store double that records every executed command
    struct RecordingStore {
        commands: Mutex<Vec<String>>,
        fail_matching: Option<&'static str>,
    }

    impl RecordingStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                commands: Mutex::new(Vec::new()),
                fail_matching: None,
            })
        }

        fn failing_on(prefix: &'static str) -> Arc<Self> {
            Arc::new(Self {
                commands: Mutex::new(Vec::new()),
                fail_matching: Some(prefix),
            })
        }

        fn executed(&self) -> Vec<String> {
            self.commands.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl SeriesStore for RecordingStore {
        async fn execute(&self, command: &str) -> std::result::Result<StoreResponse, StoreError> {
            self.commands.lock().push(command.to_string());
            if let Some(prefix) = self.fail_matching {
                if command.starts_with(prefix) {
                    return Err(StoreError::Execution("boom".to_string()));
                }
            }
            Ok(redis::Value::Okay)
        }
    }

    fn client(store: Arc<RecordingStore>) -> TimeSeries {
        TimeSeries::new(store, Arc::new(WriteLedger::in_memory().unwrap()))
    }

    fn sample_labels() -> Labels {
        Labels::new()
            .with("site", "site_101")
            .with("parameter", "parameter_3")
            .with("t", 9)
            .with("factor", "U")
    }

    #[tokio::test]
    async fn test_invalid_policy_rejected_before_store_call() {
        let store = RecordingStore::new();
        let ts = client(store.clone());

        let err = ts
            .insert_one("base", &Labels::new(), DataPoint::new(1, 2.0), "MAYBE")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.executed().is_empty());
    }

    #[tokio::test]
    async fn test_mixed_case_policy_accepted() {
        let store = RecordingStore::new();
        let ts = client(store.clone());

        ts.insert_one("base", &Labels::new(), DataPoint::new(1, 2.0), "Last")
            .await
            .unwrap();
        assert_eq!(store.executed().len(), 1);
        assert!(store.executed()[0].contains("DUPLICATE_POLICY LAST"));
    }

    #[tokio::test]
    async fn test_bulk_insert_creates_then_madds_then_records() {
        let store = RecordingStore::new();
        let ledger = Arc::new(WriteLedger::in_memory().unwrap());
        let ts = TimeSeries::new(store.clone(), ledger.clone());

        let key = ts
            .insert_bulk(
                "ganga_live_data",
                &sample_labels(),
                vec![
                    DataPoint::new(1693298532000, 33.0),
                    DataPoint::new(1693298544000, 100.0),
                ],
                "last",
            )
            .await
            .unwrap();

        assert_eq!(key, "ganga_live_data:site_101:parameter_3:9:U");

        let commands = store.executed();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].starts_with("TS.CREATE ganga_live_data:site_101:parameter_3:9:U"));
        assert_eq!(
            commands[1],
            "TS.MADD ganga_live_data:site_101:parameter_3:9:U 1693298532000 33, \
             ganga_live_data:site_101:parameter_3:9:U 1693298544000 100"
        );

        // Exactly one ledger row, for that exact key.
        let now = chrono::Utc::now().timestamp_millis();
        assert_eq!(ledger.stale_keys(now + 1000).unwrap(), vec![key]);
    }

    #[tokio::test]
    async fn test_bulk_insert_empty_batch_skips_madd_and_ledger() {
        let store = RecordingStore::new();
        let ledger = Arc::new(WriteLedger::in_memory().unwrap());
        let ts = TimeSeries::new(store.clone(), ledger.clone());

        ts.insert_bulk("base", &Labels::new(), vec![], "block")
            .await
            .unwrap();

        // Only the creation command went out.
        assert_eq!(store.executed().len(), 1);
        assert!(ledger.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_bulk_insert_tolerates_create_failure() {
        let store = RecordingStore::failing_on("TS.CREATE");
        let ts = client(store.clone());

        let key = ts
            .insert_bulk("base", &Labels::new(), vec![DataPoint::new(1, 2.0)], "min")
            .await
            .unwrap();
        assert_eq!(key, "base");
        assert_eq!(store.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_create_failure_reported_not_propagated() {
        let store = RecordingStore::failing_on("TS.CREATE");
        let ts = client(store.clone());

        let (key, created) = ts
            .create_series("base", &Labels::new().with("a", 1), "block")
            .await
            .unwrap();
        assert_eq!(key, "base:1");
        assert!(!created);
    }

    #[tokio::test]
    async fn test_create_does_not_touch_ledger() {
        let store = RecordingStore::new();
        let ledger = Arc::new(WriteLedger::in_memory().unwrap());
        let ts = TimeSeries::new(store, ledger.clone());

        ts.create_series("base", &Labels::new(), "block")
            .await
            .unwrap();
        assert!(ledger.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_delete_failure_returns_false() {
        let store = RecordingStore::failing_on("TS.DEL");
        let ts = client(store.clone());

        assert!(!ts.delete("k", None, None).await.unwrap());
        assert_eq!(store.executed(), vec!["TS.DEL k - +".to_string()]);
    }

    #[tokio::test]
    async fn test_alter_records_write() {
        let store = RecordingStore::new();
        let ledger = Arc::new(WriteLedger::in_memory().unwrap());
        let ts = TimeSeries::new(store.clone(), ledger.clone());

        let altered = ts.alter("k", None, Some("min"), 0).await.unwrap();
        assert!(altered);
        assert_eq!(store.executed(), vec!["TS.ALTER k DUPLICATE_POLICY MIN"]);
        assert_eq!(ledger.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_alter_invalid_policy_rejected_locally() {
        let store = RecordingStore::new();
        let ts = client(store.clone());

        let err = ts.alter("k", None, Some("upsert"), 0).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.executed().is_empty());
    }

    #[tokio::test]
    async fn test_range_propagates_store_failure() {
        let store = RecordingStore::failing_on("TS.RANGE");
        let ts = client(store);

        let err = ts
            .range("k", 0, 10, &Labels::new(), &Aggregations::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn test_multi_range_without_filter_no_store_call() {
        let store = RecordingStore::new();
        let ts = client(store.clone());

        let err = ts
            .multi_range(0, 10, &Labels::new(), &Aggregations::new(), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.executed().is_empty());
    }

    #[tokio::test]
    async fn test_aggregation_converted_before_render() {
        let store = RecordingStore::new();
        let ts = client(store.clone());

        let aggs = Aggregations::new().with("avg", "2hours");
        ts.range("k", 0, 10, &Labels::new(), &aggs, false)
            .await
            .unwrap();
        assert_eq!(
            store.executed(),
            vec!["TS.RANGE k 0 10 ALIGN START AGGREGATION avg 7200000"]
        );
    }

    #[tokio::test]
    async fn test_execute_raw_passthrough() {
        let store = RecordingStore::new();
        let ts = client(store.clone());

        ts.execute_raw("TS.DEL some:key - +").await.unwrap();
        assert_eq!(store.executed(), vec!["TS.DEL some:key - +"]);
    }
}
