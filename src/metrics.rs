// Copyright (c) 2025-2026 the preservation-engine authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics helpers for the preservation engine.
//!
//! Thin wrappers over the `metrics` facade so that call sites stay
//! one-liners and metric names live in exactly one place. All metrics are
//! prefixed `preservation_` and carry the collection as a label where one
//! applies. The embedding application installs the recorder; without one
//! these calls are no-ops.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a record packed into a container.
pub fn record_pack(collection_id: &str, payload_bytes: u64) {
    counter!("preservation_records_packed_total", "collection" => collection_id.to_string())
        .increment(1);
    counter!("preservation_packed_bytes_total", "collection" => collection_id.to_string())
        .increment(payload_bytes);
}

/// Record a container sealed for upload.
pub fn record_container_sealed(collection_id: &str, container_bytes: u64) {
    counter!("preservation_containers_sealed_total", "collection" => collection_id.to_string())
        .increment(1);
    histogram!("preservation_container_bytes", "collection" => collection_id.to_string())
        .record(container_bytes as f64);
}

/// Record the outcome and duration of one container upload.
pub fn record_upload(collection_id: &str, success: bool, elapsed: Duration) {
    counter!(
        "preservation_uploads_total",
        "collection" => collection_id.to_string(),
        "outcome" => outcome_label(success),
    )
    .increment(1);
    histogram!("preservation_upload_duration_seconds", "collection" => collection_id.to_string())
        .record(elapsed.as_secs_f64());
}

/// Record the outcome and duration of one fixity check.
pub fn record_fixity_check(collection_id: &str, success: bool, elapsed: Duration) {
    counter!(
        "preservation_fixity_checks_total",
        "collection" => collection_id.to_string(),
        "outcome" => outcome_label(success),
    )
    .increment(1);
    histogram!("preservation_fixity_duration_seconds", "collection" => collection_id.to_string())
        .record(elapsed.as_secs_f64());
}

/// Record the outcome and duration of one object retrieval.
pub fn record_retrieval(collection_id: &str, success: bool, elapsed: Duration) {
    counter!(
        "preservation_retrievals_total",
        "collection" => collection_id.to_string(),
        "outcome" => outcome_label(success),
    )
    .increment(1);
    histogram!(
        "preservation_retrieval_duration_seconds",
        "collection" => collection_id.to_string()
    )
    .record(elapsed.as_secs_f64());
}

/// Record one pillar's response to an in-flight operation.
pub fn record_pillar_event(pillar_id: &str, success: bool) {
    counter!(
        "preservation_pillar_events_total",
        "pillar" => pillar_id.to_string(),
        "outcome" => outcome_label(success),
    )
    .increment(1);
}

/// Track how many containers are currently open across all collections.
pub fn set_active_containers(count: usize) {
    gauge!("preservation_active_containers").set(count as f64);
}

/// Record an error surfaced to a caller, by category label.
pub fn record_error(kind: &'static str) {
    counter!("preservation_errors_total", "kind" => kind).increment(1);
}

fn outcome_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder these must all be silent no-ops.
    #[test]
    fn test_helpers_do_not_panic_without_recorder() {
        record_pack("books", 1024);
        record_container_sealed("books", 100 * 1024 * 1024);
        record_upload("books", true, Duration::from_millis(250));
        record_upload("books", false, Duration::from_millis(250));
        record_fixity_check("books", true, Duration::from_millis(5));
        record_retrieval("books", false, Duration::from_secs(1));
        record_pillar_event("p1", true);
        record_pillar_event("p2", false);
        set_active_containers(3);
        record_error("integrity");
    }
}
