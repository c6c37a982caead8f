use chrono::{DateTime, TimeZone};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EtlError, Result};
use crate::providers::servicenow::RawChangeRecord;

/// Constant tags stamped on every change document.
pub const TAGS: [(&str, &str); 4] = [
    ("Application Name", "SNOW"),
    ("Monitoring Type", "change_management_data"),
    ("Environment Type", "Prod"),
    ("monitoring_kpi", "snow-change"),
];

/// Upstream field name -> indexed field name.
const RENAMES: [(&str, &str); 4] = [
    ("business_service.parent.parent", "business_service_parent_parent"),
    ("business_service.parent", "business_service_parent"),
    ("number", "change_id"),
    ("business_service", "Service"),
];

/// Fields a record cannot be indexed without.
const REQUIRED_FIELDS: [&str; 2] = ["number", "business_service"];

pub const TIMESTAMP_FIELD: &str = "@timestamp";

/// What to do with the rest of a batch when one record is malformed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformPolicy {
    /// Stop at the first malformed record and fail the batch.
    #[default]
    Abort,
    /// Log the malformed record and carry on with the next one.
    Skip,
}

/// A flat, index-ready change document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeDocument(pub Map<String, Value>);

impl ChangeDocument {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }
}

/// Result of transforming one fetched batch.
#[derive(Debug, Default)]
pub struct TransformOutcome {
    pub documents: Vec<ChangeDocument>,
    /// Positions of records dropped under `TransformPolicy::Skip`
    pub skipped: Vec<usize>,
}

fn output_key(field: &str) -> String {
    RENAMES
        .iter()
        .find(|(from, _)| *from == field)
        .map_or_else(|| field.replace('.', "_"), |(_, to)| (*to).to_string())
}

/// Flatten one raw record into a change document.
///
/// Reference fields collapse to their display value, upstream names are
/// mapped to indexed names, and the run timestamp plus the constant tags
/// are added. No key of the result contains a dot.
///
/// # Errors
///
/// Returns `EtlError::Transform` if `number` or `business_service` is
/// missing.
pub fn transform_record<Z>(
    record: RawChangeRecord,
    position: usize,
    run_timestamp: &DateTime<Z>,
) -> Result<ChangeDocument>
where
    Z: TimeZone,
    Z::Offset: std::fmt::Display,
{
    if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| record.get(f).is_none()) {
        return Err(EtlError::Transform {
            position,
            message: format!("missing field '{missing}'"),
        });
    }

    let mut document = ChangeDocument::default();
    for (field, value) in record.0 {
        document.insert(output_key(&field), value.flatten());
    }

    document.insert(TIMESTAMP_FIELD, run_timestamp.to_rfc3339());
    for (tag, value) in TAGS {
        document.insert(tag, value);
    }

    Ok(document)
}

/// Transform a whole batch under the given policy.
///
/// With no malformed records the output has exactly one document per
/// input record, in input order.
pub fn transform_batch<Z>(
    records: Vec<RawChangeRecord>,
    run_timestamp: &DateTime<Z>,
    policy: TransformPolicy,
) -> Result<TransformOutcome>
where
    Z: TimeZone,
    Z::Offset: std::fmt::Display,
{
    let mut outcome = TransformOutcome {
        documents: Vec::with_capacity(records.len()),
        skipped: Vec::new(),
    };

    for (position, record) in records.into_iter().enumerate() {
        match transform_record(record, position, run_timestamp) {
            Ok(document) => outcome.documents.push(document),
            Err(e) if policy == TransformPolicy::Skip => {
                warn!("Skipping record: {e}");
                outcome.skipped.push(position);
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        "Transformed {} records ({} skipped)",
        outcome.documents.len(),
        outcome.skipped.len()
    );

    Ok(outcome)
}
