//! Writes into the search index.
//!
//! `IndexSink` is the narrow seam the pipeline writes through; the loader
//! functions here own the document preparation (empty-date stripping,
//! deterministic ids, chunking) so every backend gets identical input.

mod opensearch;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone};
use log::{info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{EtlError, Result};
use crate::transform::{ChangeDocument, TIMESTAMP_FIELD};

pub use self::opensearch::OpenSearchSink;

/// Namespace for change document ids.
const DOCUMENT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93d0_4b8a_9c57_0e3f_d2a1_b640);

/// A document paired with the id it is created under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentifiedDocument {
    pub id: String,
    pub source: ChangeDocument,
}

/// One bulk operation the index rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkFailure {
    pub id: String,
    pub status: u16,
    pub reason: String,
}

/// Outcome of a create-only batch write.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkSummary {
    pub succeeded: usize,
    pub failed: Vec<BulkFailure>,
}

impl BulkSummary {
    pub fn merge(&mut self, other: BulkSummary) {
        self.succeeded += other.succeeded;
        self.failed.extend(other.failed);
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed.len()
    }
}

/// Write primitives of the backing search index.
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Create every document in one bulk request without overwriting.
    ///
    /// Per-document rejections are reported in the summary; only a failure
    /// of the request as a whole is an `Err`.
    async fn bulk_create(&self, index: &str, documents: &[IdentifiedDocument])
        -> Result<BulkSummary>;

    /// Write a single document under a generated id.
    async fn index_document(&self, index: &str, document: &Value) -> Result<()>;
}

/// Id a change document is created under.
///
/// The same change captured by the same run always maps to the same id, so
/// replaying a batch collides instead of duplicating.
pub fn document_id(document: &ChangeDocument) -> String {
    let key = match (document.get_str("change_id"), document.get(TIMESTAMP_FIELD)) {
        (Some(change_id), Some(timestamp)) => format!("{change_id}|{timestamp}"),
        _ => serde_json::to_string(document).unwrap_or_default(),
    };
    Uuid::new_v5(&DOCUMENT_NAMESPACE, key.as_bytes()).to_string()
}

/// Drop fields the index cannot store.
///
/// An empty `start_date` is rejected by the date mapping, so it is removed.
pub fn prepare_document(mut document: ChangeDocument) -> ChangeDocument {
    if document.get_str("start_date") == Some("") {
        document.remove("start_date");
    }
    document
}

/// What a chunked load wrote before it finished or stopped.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub summary: BulkSummary,
    /// Whole-request failure that stopped the load, if any.
    pub error: Option<EtlError>,
}

fn log_rejections(failures: &[BulkFailure]) {
    for failure in failures {
        warn!(
            "Document {} rejected with status {}: {}",
            failure.id, failure.status, failure.reason
        );
    }
}

/// Create-only bulk load of change documents, `chunk_size` per request.
///
/// Rejections are logged as each chunk returns. The first whole-request
/// failure stops the load; the summary still counts every chunk written
/// before it.
pub async fn load_batch<K>(
    sink: &K,
    index: &str,
    documents: Vec<ChangeDocument>,
    chunk_size: usize,
) -> LoadOutcome
where
    K: IndexSink + ?Sized,
{
    let prepared: Vec<IdentifiedDocument> = documents
        .into_iter()
        .map(prepare_document)
        .map(|source| IdentifiedDocument {
            id: document_id(&source),
            source,
        })
        .collect();

    let mut outcome = LoadOutcome::default();
    for chunk in prepared.chunks(chunk_size.max(1)) {
        match sink.bulk_create(index, chunk).await {
            Ok(chunk_summary) => {
                log_rejections(&chunk_summary.failed);
                outcome.summary.merge(chunk_summary);
            }
            Err(e) => {
                warn!(
                    "Bulk load into {index} stopped after {} documents: {e}",
                    outcome.summary.total()
                );
                outcome.error = Some(e);
                break;
            }
        }
    }

    info!(
        "Bulk load into {index}: {} succeeded, {} failed",
        outcome.summary.succeeded,
        outcome.summary.failed.len()
    );

    outcome
}

/// Run-level metrics document.
pub fn metrics_document<Z>(run_timestamp: &DateTime<Z>, execution_secs: f64) -> Value
where
    Z: TimeZone,
    Z::Offset: std::fmt::Display,
{
    let timestamp = run_timestamp.to_rfc3339();
    json!({
        TIMESTAMP_FIELD: timestamp,
        "execution_time_for_change_in_secs": execution_secs,
        "last run": timestamp,
    })
}

/// Operational notification document.
pub fn notification_document<Z>(timestamp: &DateTime<Z>, api: &str, message: &str) -> Value
where
    Z: TimeZone,
    Z::Offset: std::fmt::Display,
{
    json!({
        TIMESTAMP_FIELD: timestamp.to_rfc3339(),
        "api": api,
        "message": message,
    })
}


#[cfg(test)]
mod tests {
    use super::memory::MemorySink;
    use super::*;
    use chrono::FixedOffset;

    fn doc(change_id: &str, start_date: &str) -> ChangeDocument {
        serde_json::from_value(json!({
            "change_id": change_id,
            "start_date": start_date,
            "@timestamp": "2024-02-26T10:35:32+01:00"
        }))
        .unwrap()
    }

    #[test]
    fn test_empty_start_date_stripped() {
        let prepared = prepare_document(doc("CHG1", ""));
        assert!(!prepared.contains_key("start_date"));

        let prepared = prepare_document(doc("CHG2", "2024-01-01"));
        assert_eq!(prepared.get_str("start_date"), Some("2024-01-01"));
    }

    #[test]
    fn test_document_id_is_deterministic() {
        assert_eq!(document_id(&doc("CHG1", "")), document_id(&doc("CHG1", "x")));
        assert_ne!(document_id(&doc("CHG1", "")), document_id(&doc("CHG2", "")));
    }

    #[test]
    fn test_document_id_without_change_id() {
        let a: ChangeDocument = serde_json::from_value(json!({"short_description": "a"})).unwrap();
        let b: ChangeDocument = serde_json::from_value(json!({"short_description": "b"})).unwrap();
        assert_ne!(document_id(&a), document_id(&b));
        assert_eq!(document_id(&a), document_id(&a.clone()));
    }

    #[tokio::test]
    async fn test_load_batch_strips_and_creates() {
        let sink = MemorySink::default();
        let summary = load_batch(
            &sink,
            "changes",
            vec![doc("CHG1", ""), doc("CHG2", "2024-01-01")],
            500,
        )
        .await
        .summary;

        assert_eq!(summary.succeeded, 2);
        assert!(summary.failed.is_empty());

        let stored = sink.stored("changes");
        let stripped = stored.iter().find(|d| d["change_id"] == "CHG1").unwrap();
        assert!(stripped.get("start_date").is_none());
        let kept = stored.iter().find(|d| d["change_id"] == "CHG2").unwrap();
        assert_eq!(kept["start_date"], "2024-01-01");
    }

    #[tokio::test]
    async fn test_retry_reports_conflicts_not_duplicates() {
        let sink = MemorySink::default();
        let batch = vec![doc("CHG1", "2024-01-01"), doc("CHG2", "2024-01-02")];

        let first = load_batch(&sink, "changes", batch.clone(), 500).await.summary;
        let second = load_batch(&sink, "changes", batch, 500).await.summary;

        assert_eq!(first.succeeded, 2);
        assert_eq!(second.succeeded, 0);
        assert_eq!(second.failed.len(), 2);
        assert!(second.failed.iter().all(|f| f.status == 409));
        assert_eq!(sink.document_count("changes"), 2);
    }

    #[tokio::test]
    async fn test_load_batch_chunks_requests() {
        let sink = MemorySink::default();
        let batch: Vec<_> = (0..5).map(|i| doc(&format!("CHG{i}"), "")).collect();

        let outcome = load_batch(&sink, "changes", batch, 2).await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.summary.total(), 5);
        assert_eq!(*sink.bulk_calls.lock().unwrap(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_earlier_results() {
        let sink = MemorySink {
            fail_bulk_call: Some(3),
            ..MemorySink::default()
        };
        load_batch(&sink, "changes", vec![doc("CHG1", "")], 2).await;

        let batch = vec![doc("CHG1", ""), doc("CHG2", ""), doc("CHG3", "")];
        let outcome = load_batch(&sink, "changes", batch, 2).await;

        assert!(matches!(outcome.error, Some(EtlError::Load(_))));
        assert_eq!(outcome.summary.succeeded, 1);
        assert_eq!(outcome.summary.failed.len(), 1);
        assert_eq!(outcome.summary.failed[0].status, 409);
        assert_eq!(sink.document_count("changes"), 2);
        assert_eq!(*sink.bulk_calls.lock().unwrap(), vec![1, 2, 1]);
    }

    #[test]
    fn test_metrics_document_shape() {
        let ts = DateTime::<FixedOffset>::parse_from_rfc3339("2024-02-26T10:35:32+01:00").unwrap();
        let metrics = metrics_document(&ts, 12.5);

        assert_eq!(
            metrics,
            json!({
                "@timestamp": "2024-02-26T10:35:32+01:00",
                "execution_time_for_change_in_secs": 12.5,
                "last run": "2024-02-26T10:35:32+01:00"
            })
        );
    }
}
