// Copyright (c) 2025-2026 the preservation-engine authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication client interface and the two archive implementations.
//!
//! The batcher and other callers only see [`ReplicationClient`]; the
//! concrete archive is selected once at startup from
//! [`ArchiveMode`](crate::config::ArchiveMode) and never switched at
//! runtime. [`DistributedArchive`] fans operations out across a
//! collection's pillars; [`LocalArchive`] is the single-directory fallback
//! for test and non-distributed deployments.

pub mod distributed;
pub mod local;
pub mod transport;

use crate::config::{ArchiveConfig, ArchiveMode};
use crate::error::Result;
use distributed::DistributedArchive;
use local::LocalArchive;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;
use transport::PillarTransport;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Archive operations the packaging layer depends on.
///
/// Upload follows at-least-once-then-delete semantics: the source file is
/// removed only after the archive has accepted it, so a crash before the
/// verdict leaves the file in place for a later retry by the caller.
pub trait ReplicationClient: Send + Sync + 'static {
    /// Upload `file` into `collection_id`, deleting the source on success.
    ///
    /// Returns `Ok(true)` when the archive accepted the file, `Ok(false)`
    /// when the collection cannot accept uploads right now (too many pillar
    /// failures, or no pillars configured). Hard errors are reserved for
    /// misconfiguration and local I/O problems.
    fn upload_file(&self, file: PathBuf, collection_id: String) -> BoxFuture<'_, bool>;

    /// Fetch the object named `file_id` from the collection into a local
    /// file and return its path. The caller owns the returned file.
    fn retrieve_file(&self, file_id: String, collection_id: String) -> BoxFuture<'_, PathBuf>;

    /// Run a fixity check on `file_id` and return the agreed checksum.
    ///
    /// Zero tolerance: every pillar must answer and all answers must agree,
    /// regardless of the collection's upload tolerance.
    fn agreed_checksum(&self, file_id: String, collection_id: String) -> BoxFuture<'_, String>;

    /// Whether the collection holds an object named `file_id`.
    fn exists_in_collection(
        &self,
        file_id: String,
        collection_id: String,
    ) -> BoxFuture<'_, bool>;

    /// Release the archive's resources. In-flight operations may still
    /// finish; new operations fail with a shutdown error.
    fn shutdown(&self);
}

/// Build the archive selected by `config.mode`.
///
/// `transport` is only consulted in distributed mode; the local archive
/// never touches it.
pub fn build_archive(
    config: &ArchiveConfig,
    transport: Arc<dyn PillarTransport>,
) -> Arc<dyn ReplicationClient> {
    match config.mode {
        ArchiveMode::Local => {
            info!(
                base_dir = %config.packaging.local_archive_dir.display(),
                "Using local fallback archive"
            );
            Arc::new(LocalArchive::new(
                config.packaging.local_archive_dir.clone(),
                config.packaging.digest_algorithm,
            ))
        }
        ArchiveMode::Distributed => {
            info!(
                component_id = %config.component_id,
                collection_count = config.collections.len(),
                "Using distributed archive"
            );
            Arc::new(DistributedArchive::new(config.clone(), transport))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionConfig;
    use transport::ScriptedTransport;

    #[tokio::test]
    async fn test_build_archive_local_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ArchiveConfig::for_testing(dir.path().join("staging"));
        config.packaging.local_archive_dir = dir.path().join("archive");

        let archive = build_archive(&config, Arc::new(ScriptedTransport::new()));

        // Local archive reports existence straight off the filesystem.
        let exists = archive
            .exists_in_collection("missing".to_string(), "books".to_string())
            .await
            .unwrap();
        assert!(!exists);
    }

    #[tokio::test]
    async fn test_build_archive_distributed_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ArchiveConfig::for_testing(dir.path().join("staging"));
        config.mode = ArchiveMode::Distributed;
        config
            .collections
            .push(CollectionConfig::for_testing("books", &[], 0));

        let archive = build_archive(&config, Arc::new(ScriptedTransport::new()));

        // Distributed archive validates the collection before fanning out.
        let err = archive
            .exists_in_collection("obj".to_string(), "unknown".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }
}
