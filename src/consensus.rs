//! Checksum consensus across replica pillars.
//!
//! A fixity check fans a checksum request out to every pillar holding an
//! object and must decide whether the replicas still agree. The rule here is
//! **zero tolerance**: every non-failed pillar response must agree on the
//! `(file_id, algorithm, value)` triple. Any disagreement, any pillar
//! failure during the check, or an empty response set is a hard failure.
//!
//! This is deliberately stricter than upload tolerance. A missing write
//! acknowledgment is an availability concern the collection is configured to
//! absorb; a checksum mismatch signals corruption and must never be papered
//! over by majority vote.

use crate::aggregator::ChecksumReport;
use crate::error::{PreservationError, Result};

/// Evaluate the checksum reports from one fixity operation.
///
/// `failure_count` is the number of pillars that reported failure during
/// the operation; any nonzero count fails the check even if the remaining
/// reports agree. Returns the single agreed checksum value.
pub fn agree(reports: &[ChecksumReport], failure_count: usize) -> Result<String> {
    if failure_count > 0 {
        return Err(PreservationError::Integrity(format!(
            "{failure_count} pillar(s) failed during the checksum operation"
        )));
    }

    if reports.is_empty() {
        return Err(PreservationError::Integrity(
            "no results: no pillar returned a checksum".to_string(),
        ));
    }

    let first = &reports[0];
    for report in &reports[1..] {
        if report != first {
            return Err(PreservationError::Integrity(format!(
                "checksum disagreement for '{}': {}:{} vs {}:{}",
                first.file_id, first.algorithm, first.value, report.algorithm, report.value
            )));
        }
    }

    Ok(first.value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestAlgorithm;

    fn report(file_id: &str, algorithm: DigestAlgorithm, value: &str) -> ChecksumReport {
        ChecksumReport {
            file_id: file_id.to_string(),
            algorithm,
            value: value.to_string(),
        }
    }

    #[test]
    fn test_single_report_agrees() {
        let reports = [report("f1", DigestAlgorithm::Sha1, "abc123")];
        assert_eq!(agree(&reports, 0).unwrap(), "abc123");
    }

    #[test]
    fn test_identical_reports_agree() {
        let reports = [
            report("f1", DigestAlgorithm::Sha1, "abc123"),
            report("f1", DigestAlgorithm::Sha1, "abc123"),
            report("f1", DigestAlgorithm::Sha1, "abc123"),
        ];
        assert_eq!(agree(&reports, 0).unwrap(), "abc123");
    }

    #[test]
    fn test_value_disagreement_fails() {
        let reports = [
            report("f1", DigestAlgorithm::Sha1, "abc123"),
            report("f1", DigestAlgorithm::Sha1, "def456"),
        ];
        let err = agree(&reports, 0).unwrap_err();
        assert_eq!(err.kind(), "integrity");
        assert!(err.to_string().contains("disagreement"));
    }

    #[test]
    fn test_algorithm_disagreement_fails() {
        // Same hex value under different algorithms is still disagreement.
        let reports = [
            report("f1", DigestAlgorithm::Sha1, "abc123"),
            report("f1", DigestAlgorithm::Sha256, "abc123"),
        ];
        assert!(agree(&reports, 0).is_err());
    }

    #[test]
    fn test_file_id_disagreement_fails() {
        let reports = [
            report("f1", DigestAlgorithm::Sha1, "abc123"),
            report("f2", DigestAlgorithm::Sha1, "abc123"),
        ];
        assert!(agree(&reports, 0).is_err());
    }

    #[test]
    fn test_majority_never_wins() {
        // Ten agreeing pillars and one dissenter: still a hard failure.
        let mut reports = vec![report("f1", DigestAlgorithm::Sha1, "abc123"); 10];
        reports.push(report("f1", DigestAlgorithm::Sha1, "badbad"));
        assert!(agree(&reports, 0).is_err());
    }

    #[test]
    fn test_empty_reports_fail() {
        let err = agree(&[], 0).unwrap_err();
        assert_eq!(err.kind(), "integrity");
        assert!(err.to_string().contains("no results"));
    }

    #[test]
    fn test_any_pillar_failure_fails() {
        // Agreement among responders does not excuse a failed pillar.
        let reports = [
            report("f1", DigestAlgorithm::Sha1, "abc123"),
            report("f1", DigestAlgorithm::Sha1, "abc123"),
        ];
        let err = agree(&reports, 1).unwrap_err();
        assert_eq!(err.kind(), "integrity");
        assert!(err.to_string().contains("1 pillar(s) failed"));
    }
}
