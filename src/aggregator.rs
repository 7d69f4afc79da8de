// Copyright (c) 2025-2026 the preservation-engine authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-operation fan-in of asynchronous pillar outcomes.
//!
//! Each fan-out operation (upload, fixity check, listing, delivery) gets its
//! own [`PillarEventAggregator`]: pillar responses arrive as [`PillarEvent`]s
//! on a completion channel, the aggregator accumulates them, and the calling
//! task blocks on [`PillarEventAggregator::resolve`] until a terminal
//! [`OperationVerdict`] is reached.
//!
//! # State Machine
//!
//! ```text
//!              event               all expected reported,
//! Pending ──────────────► Pending ─── failures <= tolerance ──► Complete
//!    │                       │
//!    │                       │ failures > tolerance
//!    │                       ▼ (early exit)
//!    └── deadline ────────► Failed
//! ```
//!
//! The verdict is commutative over the multiset of events: within one
//! operation, arrival order never changes the outcome. `has_failed()` is
//! conservatively `true` before any event has arrived; success is only ever
//! concluded from evidence.

use crate::digest::DigestAlgorithm;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A normalized checksum extracted from one pillar's response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChecksumReport {
    /// Identifier of the checked file/object.
    pub file_id: String,
    /// Algorithm the pillar used.
    pub algorithm: DigestAlgorithm,
    /// Lowercase hex checksum value.
    pub value: String,
}

/// One pillar's outcome for one in-flight operation. Never persisted;
/// consumed immediately by the aggregator.
#[derive(Debug, Clone)]
pub enum PillarEvent {
    /// The pillar completed its part of the operation.
    Success {
        pillar_id: String,
        /// Checksum reported by the pillar, for fixity operations.
        report: Option<ChecksumReport>,
        /// Object ids matched by the pillar, for listing operations.
        object_ids: Vec<String>,
    },
    /// The pillar could not complete its part of the operation.
    Failure { pillar_id: String, reason: String },
}

impl PillarEvent {
    /// Plain success with no payload (upload acknowledgments).
    pub fn success(pillar_id: &str) -> Self {
        Self::Success {
            pillar_id: pillar_id.to_string(),
            report: None,
            object_ids: Vec::new(),
        }
    }

    /// Success carrying a checksum report (fixity responses).
    pub fn checksum(pillar_id: &str, report: ChecksumReport) -> Self {
        Self::Success {
            pillar_id: pillar_id.to_string(),
            report: Some(report),
            object_ids: Vec::new(),
        }
    }

    /// Success carrying a page of matched object ids (listing responses).
    pub fn listing(pillar_id: &str, object_ids: Vec<String>) -> Self {
        Self::Success {
            pillar_id: pillar_id.to_string(),
            report: None,
            object_ids,
        }
    }

    /// Failure with a reason.
    pub fn failure(pillar_id: &str, reason: &str) -> Self {
        Self::Failure {
            pillar_id: pillar_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Resolved result of fanning an operation out to a replica collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationVerdict {
    /// All expected pillars reported and failures stayed within tolerance.
    Complete,
    /// Failures exceeded tolerance, or the wait deadline passed.
    Failed,
}

/// Accumulates [`PillarEvent`]s for one in-flight operation and resolves a
/// verdict against a configured failure tolerance.
///
/// Per-operation state: an aggregator is never shared between operations.
#[derive(Debug)]
pub struct PillarEventAggregator {
    expected: usize,
    max_failing: usize,
    successes: usize,
    failures: Vec<(String, String)>,
    reports: Vec<ChecksumReport>,
    found_object_ids: BTreeSet<String>,
}

impl PillarEventAggregator {
    /// Create an aggregator expecting `expected` pillar responses and
    /// tolerating at most `max_failing` failures.
    pub fn new(expected: usize, max_failing: usize) -> Self {
        Self {
            expected,
            max_failing,
            successes: 0,
            failures: Vec::new(),
            reports: Vec::new(),
            found_object_ids: BTreeSet::new(),
        }
    }

    /// Accumulate one pillar event.
    pub fn collect(&mut self, event: PillarEvent) {
        match event {
            PillarEvent::Success {
                pillar_id,
                report,
                object_ids,
            } => {
                debug!(pillar_id = %pillar_id, "Pillar reported success");
                crate::metrics::record_pillar_event(&pillar_id, true);
                self.successes += 1;
                if let Some(report) = report {
                    self.reports.push(report);
                }
                self.found_object_ids.extend(object_ids);
            }
            PillarEvent::Failure { pillar_id, reason } => {
                warn!(pillar_id = %pillar_id, reason = %reason, "Pillar reported failure");
                crate::metrics::record_pillar_event(&pillar_id, false);
                self.failures.push((pillar_id, reason));
            }
        }
    }

    /// Number of pillars that have reported so far.
    pub fn reported(&self) -> usize {
        self.successes + self.failures.len()
    }

    /// Whether every expected pillar has reported.
    pub fn all_reported(&self) -> bool {
        self.reported() >= self.expected
    }

    /// Whether the operation has failed, judged conservatively.
    ///
    /// Before any event has arrived this is `true`: an operation is never
    /// assumed successful. Once evidence exists, it is `true` exactly when
    /// failures exceed the tolerance or not enough successes remain possible.
    pub fn has_failed(&self) -> bool {
        if self.reported() == 0 {
            return true;
        }
        self.failures.len() > self.max_failing
    }

    /// Terminal verdict if one is already determined.
    ///
    /// Returns early `Failed` as soon as failures exceed tolerance, without
    /// waiting for the remaining pillars.
    pub fn verdict(&self) -> Option<OperationVerdict> {
        if self.failures.len() > self.max_failing {
            return Some(OperationVerdict::Failed);
        }
        if self.all_reported() {
            return Some(OperationVerdict::Complete);
        }
        None
    }

    /// Checksum reports accumulated from successful pillars.
    pub fn reports(&self) -> &[ChecksumReport] {
        &self.reports
    }

    /// Object ids found across listing pages, deduplicated.
    pub fn found_object_ids(&self) -> &BTreeSet<String> {
        &self.found_object_ids
    }

    /// Failures accumulated so far, as `(pillar_id, reason)` pairs.
    pub fn failures(&self) -> &[(String, String)] {
        &self.failures
    }

    /// Human-readable summary of accumulated failures.
    pub fn failure_summary(&self) -> String {
        if self.failures.is_empty() {
            return format!("{} of {} pillars reported", self.reported(), self.expected);
        }
        let reasons: Vec<String> = self
            .failures
            .iter()
            .map(|(pillar, reason)| format!("{pillar}: {reason}"))
            .collect();
        format!(
            "{} of {} pillars failed ({})",
            self.failures.len(),
            self.expected,
            reasons.join("; ")
        )
    }

    /// Drain the completion channel until a terminal verdict or `deadline`.
    ///
    /// This is the synchronous façade over the asynchronous fan-in: the
    /// calling task blocks here (cancellably, on the channel) while pillar
    /// responses arrive on transport-dispatch tasks. A deadline expiry or a
    /// closed channel with pillars still outstanding resolves `Failed`.
    pub async fn resolve(
        &mut self,
        mut events: mpsc::Receiver<PillarEvent>,
        deadline: Duration,
    ) -> OperationVerdict {
        if self.expected == 0 {
            return OperationVerdict::Failed;
        }

        let wait = tokio::time::sleep(deadline);
        tokio::pin!(wait);

        loop {
            if let Some(verdict) = self.verdict() {
                return verdict;
            }

            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.collect(event),
                        None => {
                            // Transport dropped its senders with pillars
                            // still outstanding.
                            warn!(
                                reported = self.reported(),
                                expected = self.expected,
                                "Completion channel closed before all pillars reported"
                            );
                            return self.verdict().unwrap_or(OperationVerdict::Failed);
                        }
                    }
                }
                _ = &mut wait => {
                    warn!(
                        reported = self.reported(),
                        expected = self.expected,
                        "Operation deadline passed"
                    );
                    return OperationVerdict::Failed;
                }
            }
        }
    }
}
