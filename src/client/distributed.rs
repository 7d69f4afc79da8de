// Copyright (c) 2025-2026 the preservation-engine authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Quorum-tolerant archive fanning out across a collection's pillars.
//!
//! Every operation runs against the full pillar set of one collection:
//! a request goes out on the transport, responses stream back as
//! [`PillarEvent`]s, and a [`PillarEventAggregator`] turns them into a
//! verdict under the collection's failure tolerance. Uploads absorb up to
//! `max_failing_pillars` failures; fixity checks always run with zero
//! tolerance and hand their reports to [`consensus::agree`].
//!
//! Upload staging: the source file is copied under a unique name into the
//! staging directory the pillars fetch from, and that copy is removed
//! whatever the verdict. The source itself is deleted only on success.

use crate::aggregator::{ChecksumReport, OperationVerdict, PillarEventAggregator};
use crate::client::local::file_id_of;
use crate::client::transport::{
    ChecksumRequest, DeliveryRequest, ListingRequest, PillarTransport, PutRequest,
};
use crate::client::{BoxFuture, ReplicationClient};
use crate::config::{ArchiveConfig, CollectionConfig};
use crate::consensus;
use crate::error::{PreservationError, Result};
use crate::metrics;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct DistributedArchive {
    config: ArchiveConfig,
    transport: Arc<dyn PillarTransport>,
    closed: AtomicBool,
}

impl DistributedArchive {
    pub fn new(config: ArchiveConfig, transport: Arc<dyn PillarTransport>) -> Self {
        Self {
            config,
            transport,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PreservationError::Shutdown);
        }
        Ok(())
    }

    /// Look up a collection; asking for an unconfigured one is a
    /// deployment bug, not a transient condition.
    fn collection(&self, collection_id: &str) -> Result<&CollectionConfig> {
        self.config.collection(collection_id).ok_or_else(|| {
            PreservationError::Configuration(format!(
                "collection '{collection_id}' is not configured"
            ))
        })
    }

    /// Channel sized for one event per pillar.
    fn event_channel(
        pillar_count: usize,
    ) -> (
        mpsc::Sender<crate::aggregator::PillarEvent>,
        mpsc::Receiver<crate::aggregator::PillarEvent>,
    ) {
        mpsc::channel(pillar_count.max(1))
    }

    async fn stage_copy(&self, file: &Path, file_id: &str) -> Result<PathBuf> {
        let staging_dir = &self.config.packaging.staging_dir;
        tokio::fs::create_dir_all(staging_dir)
            .await
            .map_err(|e| PreservationError::write(staging_dir, e))?;
        let staged = staging_dir.join(format!("{}-{}", Uuid::new_v4(), file_id));
        tokio::fs::copy(file, &staged)
            .await
            .map_err(|e| PreservationError::write(&staged, e))?;
        Ok(staged)
    }

    async fn broadcast_upload(
        &self,
        collection: &CollectionConfig,
        file_id: &str,
        staged: &Path,
    ) -> Result<(OperationVerdict, String)> {
        let validation = ChecksumReport {
            file_id: file_id.to_string(),
            algorithm: self.config.packaging.digest_algorithm,
            value: self.config.packaging.digest_algorithm.digest_file(staged)?,
        };

        let request = PutRequest {
            operation_id: Uuid::new_v4(),
            collection_id: collection.collection_id.clone(),
            pillar_ids: collection.pillar_ids.clone(),
            file_id: file_id.to_string(),
            staged_path: staged.to_path_buf(),
            validation,
            component_id: self.config.component_id.clone(),
        };
        debug!(
            operation_id = %request.operation_id,
            collection_id = %collection.collection_id,
            file_id = %file_id,
            "Broadcasting upload"
        );

        let (tx, rx) = Self::event_channel(collection.pillar_ids.len());
        self.transport.broadcast_put(request, tx)?;

        let mut aggregator = PillarEventAggregator::new(
            collection.pillar_ids.len(),
            collection.max_failing_pillars,
        );
        let verdict = aggregator.resolve(rx, self.config.timeouts.total()).await;
        Ok((verdict, aggregator.failure_summary()))
    }
}

impl ReplicationClient for DistributedArchive {
    fn upload_file(&self, file: PathBuf, collection_id: String) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.ensure_open()?;
            let collection = self.collection(&collection_id)?;
            if collection.pillar_ids.is_empty() {
                warn!(collection_id = %collection_id, "Collection has no pillars, refusing upload");
                return Ok(false);
            }

            let file_id = file_id_of(&file)?;
            let start = Instant::now();
            let staged = self.stage_copy(&file, &file_id).await?;

            let outcome = self.broadcast_upload(collection, &file_id, &staged).await;

            // The staged copy is ours whatever happened.
            if let Err(e) = tokio::fs::remove_file(&staged).await {
                warn!(staged = %staged.display(), error = %e, "Failed to remove staged copy");
            }

            let (verdict, summary) = outcome?;
            match verdict {
                OperationVerdict::Complete => {
                    // Replicas are durable; the source is now redundant.
                    tokio::fs::remove_file(&file)
                        .await
                        .map_err(|e| PreservationError::write(&file, e))?;
                    info!(
                        file_id = %file_id,
                        collection_id = %collection_id,
                        "Upload complete within tolerance"
                    );
                    metrics::record_upload(&collection_id, true, start.elapsed());
                    Ok(true)
                }
                OperationVerdict::Failed => {
                    warn!(
                        file_id = %file_id,
                        collection_id = %collection_id,
                        summary = %summary,
                        "Upload failed, source file kept"
                    );
                    metrics::record_upload(&collection_id, false, start.elapsed());
                    Ok(false)
                }
            }
        })
    }

    fn retrieve_file(&self, file_id: String, collection_id: String) -> BoxFuture<'_, PathBuf> {
        Box::pin(async move {
            self.ensure_open()?;
            let collection = self.collection(&collection_id)?;
            let start = Instant::now();

            let staging_dir = &self.config.packaging.staging_dir;
            tokio::fs::create_dir_all(staging_dir)
                .await
                .map_err(|e| PreservationError::write(staging_dir, e))?;
            let delivery_path = staging_dir.join(format!("delivery-{}-{}", Uuid::new_v4(), file_id));

            let request = DeliveryRequest {
                operation_id: Uuid::new_v4(),
                collection_id: collection_id.clone(),
                pillar_ids: collection.pillar_ids.clone(),
                file_id: file_id.clone(),
                delivery_path: delivery_path.clone(),
                component_id: self.config.component_id.clone(),
            };

            let (tx, rx) = Self::event_channel(1);
            self.transport.request_delivery(request, tx)?;

            // One answer resolves the request; any failure is fatal.
            let mut aggregator = PillarEventAggregator::new(1, 0);
            let verdict = aggregator.resolve(rx, self.config.timeouts.total()).await;

            if verdict != OperationVerdict::Complete {
                metrics::record_retrieval(&collection_id, false, start.elapsed());
                return Err(PreservationError::replication(
                    "retrieve",
                    format!("'{}': {}", file_id, aggregator.failure_summary()),
                ));
            }
            if !tokio::fs::try_exists(&delivery_path)
                .await
                .map_err(|e| PreservationError::write(&delivery_path, e))?
            {
                metrics::record_retrieval(&collection_id, false, start.elapsed());
                return Err(PreservationError::replication(
                    "retrieve",
                    format!("pillar reported delivery of '{file_id}' but no file arrived"),
                ));
            }
            metrics::record_retrieval(&collection_id, true, start.elapsed());
            Ok(delivery_path)
        })
    }

    fn agreed_checksum(&self, file_id: String, collection_id: String) -> BoxFuture<'_, String> {
        Box::pin(async move {
            self.ensure_open()?;
            let collection = self.collection(&collection_id)?;
            let start = Instant::now();

            let request = ChecksumRequest {
                operation_id: Uuid::new_v4(),
                collection_id: collection_id.clone(),
                pillar_ids: collection.pillar_ids.clone(),
                file_id: file_id.clone(),
                algorithm: self.config.packaging.digest_algorithm,
                component_id: self.config.component_id.clone(),
            };

            let (tx, rx) = Self::event_channel(collection.pillar_ids.len());
            self.transport.broadcast_checksum(request, tx)?;

            // Fixity never borrows the collection's upload tolerance.
            let mut aggregator = PillarEventAggregator::new(collection.pillar_ids.len(), 0);
            aggregator.resolve(rx, self.config.timeouts.total()).await;

            if !aggregator.all_reported() {
                metrics::record_fixity_check(&collection_id, false, start.elapsed());
                return Err(PreservationError::Integrity(format!(
                    "checksum of '{}' unresolved: {}",
                    file_id,
                    aggregator.failure_summary()
                )));
            }

            let agreed = consensus::agree(aggregator.reports(), aggregator.failures().len());
            metrics::record_fixity_check(&collection_id, agreed.is_ok(), start.elapsed());
            agreed
        })
    }

    fn exists_in_collection(
        &self,
        file_id: String,
        collection_id: String,
    ) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.ensure_open()?;
            let collection = self.collection(&collection_id)?;
            if collection.pillar_ids.is_empty() {
                return Ok(false);
            }

            let request = ListingRequest {
                operation_id: Uuid::new_v4(),
                collection_id: collection_id.clone(),
                pillar_ids: collection.pillar_ids.clone(),
                object_id: file_id.clone(),
                component_id: self.config.component_id.clone(),
            };

            let (tx, rx) = Self::event_channel(collection.pillar_ids.len());
            self.transport.broadcast_listing(request, tx)?;

            let mut aggregator = PillarEventAggregator::new(
                collection.pillar_ids.len(),
                collection.max_failing_pillars,
            );
            let verdict = aggregator.resolve(rx, self.config.timeouts.total()).await;

            if verdict != OperationVerdict::Complete {
                return Err(PreservationError::replication(
                    "exists",
                    format!("listing of '{}': {}", file_id, aggregator.failure_summary()),
                ));
            }
            Ok(aggregator.found_object_ids().contains(&file_id))
        })
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.transport.close();
        info!("Distributed archive shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::{PillarScript, ScriptedTransport};
    use crate::config::CollectionConfig;
    use tempfile::tempdir;

    fn config_with(dir: &Path, collections: Vec<CollectionConfig>) -> ArchiveConfig {
        let mut config = ArchiveConfig::for_testing(dir.join("staging"));
        config.collections = collections;
        config
    }

    fn archive(config: ArchiveConfig, transport: ScriptedTransport) -> DistributedArchive {
        DistributedArchive::new(config, Arc::new(transport))
    }

    async fn source_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_upload_within_tolerance_deletes_source() {
        let dir = tempdir().unwrap();
        let config = config_with(
            dir.path(),
            vec![CollectionConfig::for_testing("books", &["p1", "p2", "p3"], 1)],
        );
        let transport = ScriptedTransport::new()
            .pillar("p1", PillarScript::healthy("x"))
            .pillar("p2", PillarScript::failing("disk full"))
            .pillar("p3", PillarScript::healthy("x"));
        let archive = archive(config, transport);

        let source = source_file(dir.path(), "item.bin", b"payload").await;
        let accepted = archive
            .upload_file(source.clone(), "books".to_string())
            .await
            .unwrap();

        assert!(accepted);
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn test_upload_beyond_tolerance_keeps_source() {
        let dir = tempdir().unwrap();
        let config = config_with(
            dir.path(),
            vec![CollectionConfig::for_testing("books", &["p1", "p2", "p3"], 1)],
        );
        let transport = ScriptedTransport::new()
            .pillar("p1", PillarScript::healthy("x"))
            .pillar("p2", PillarScript::failing("disk full"))
            .pillar("p3", PillarScript::failing("offline"));
        let archive = archive(config, transport);

        let source = source_file(dir.path(), "item.bin", b"payload").await;
        let accepted = archive
            .upload_file(source.clone(), "books".to_string())
            .await
            .unwrap();

        assert!(!accepted);
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_upload_cleans_staging_either_way() {
        let dir = tempdir().unwrap();
        let config = config_with(
            dir.path(),
            vec![CollectionConfig::for_testing("books", &["p1"], 0)],
        );
        let transport = ScriptedTransport::new().pillar("p1", PillarScript::failing("offline"));
        let archive = archive(config, transport);

        let source = source_file(dir.path(), "item.bin", b"payload").await;
        archive.upload_file(source, "books".to_string()).await.unwrap();

        let staged: Vec<_> = std::fs::read_dir(dir.path().join("staging"))
            .unwrap()
            .collect();
        assert!(staged.is_empty(), "staging directory should be emptied");
    }

    #[tokio::test]
    async fn test_upload_unknown_collection_is_configuration_error() {
        let dir = tempdir().unwrap();
        let config = config_with(dir.path(), vec![]);
        let archive = archive(config, ScriptedTransport::new());

        let source = source_file(dir.path(), "item.bin", b"payload").await;
        let err = archive
            .upload_file(source, "unknown".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[tokio::test]
    async fn test_upload_zero_pillars_is_declined_not_an_error() {
        let dir = tempdir().unwrap();
        let config = config_with(
            dir.path(),
            vec![CollectionConfig::for_testing("books", &[], 0)],
        );
        let archive = archive(config, ScriptedTransport::new());

        let source = source_file(dir.path(), "item.bin", b"payload").await;
        let accepted = archive
            .upload_file(source.clone(), "books".to_string())
            .await
            .unwrap();
        assert!(!accepted);
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_agreed_checksum_on_agreement() {
        let dir = tempdir().unwrap();
        let config = config_with(
            dir.path(),
            vec![CollectionConfig::for_testing("books", &["p1", "p2"], 1)],
        );
        let transport = ScriptedTransport::new()
            .pillar("p1", PillarScript::healthy("abc123"))
            .pillar("p2", PillarScript::healthy("abc123"));
        let archive = archive(config, transport);

        let value = archive
            .agreed_checksum("item.bin".to_string(), "books".to_string())
            .await
            .unwrap();
        assert_eq!(value, "abc123");
    }

    #[tokio::test]
    async fn test_agreed_checksum_disagreement_is_integrity_error() {
        let dir = tempdir().unwrap();
        let config = config_with(
            dir.path(),
            vec![CollectionConfig::for_testing("books", &["p1", "p2", "p3"], 2)],
        );
        // Two pillars agree, one dissents. Upload tolerance would absorb
        // two failures here; fixity must not.
        let transport = ScriptedTransport::new()
            .pillar("p1", PillarScript::healthy("abc123"))
            .pillar("p2", PillarScript::healthy("abc123"))
            .pillar("p3", PillarScript::healthy("badbad"));
        let archive = archive(config, transport);

        let err = archive
            .agreed_checksum("item.bin".to_string(), "books".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "integrity");
    }

    #[tokio::test]
    async fn test_agreed_checksum_silent_pillar_is_integrity_error() {
        let dir = tempdir().unwrap();
        let config = config_with(
            dir.path(),
            vec![CollectionConfig::for_testing("books", &["p1", "p2"], 1)],
        );
        let transport = ScriptedTransport::new()
            .pillar("p1", PillarScript::healthy("abc123"))
            .pillar("p2", PillarScript::silent());
        let archive = archive(config, transport);

        let err = archive
            .agreed_checksum("item.bin".to_string(), "books".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "integrity");
        assert!(err.to_string().contains("unresolved"));
    }

    #[tokio::test]
    async fn test_retrieve_delivers_into_staging() {
        let dir = tempdir().unwrap();
        let config = config_with(
            dir.path(),
            vec![CollectionConfig::for_testing("books", &["p1"], 0)],
        );
        let transport = ScriptedTransport::new()
            .pillar("p1", PillarScript::healthy("x").delivering(b"container bytes"));
        let archive = archive(config, transport);

        let path = archive
            .retrieve_file("item.bin".to_string(), "books".to_string())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"container bytes");
    }

    #[tokio::test]
    async fn test_retrieve_failure_is_replication_error() {
        let dir = tempdir().unwrap();
        let config = config_with(
            dir.path(),
            vec![CollectionConfig::for_testing("books", &["p1"], 0)],
        );
        let transport = ScriptedTransport::new().pillar("p1", PillarScript::failing("offline"));
        let archive = archive(config, transport);

        let err = archive
            .retrieve_file("item.bin".to_string(), "books".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "replication");
    }

    #[tokio::test]
    async fn test_exists_found_on_any_pillar() {
        let dir = tempdir().unwrap();
        let config = config_with(
            dir.path(),
            vec![CollectionConfig::for_testing("books", &["p1", "p2"], 0)],
        );
        let transport = ScriptedTransport::new()
            .pillar("p1", PillarScript::healthy("x").holding(&["item.bin"]))
            .pillar("p2", PillarScript::healthy("x"));
        let archive = archive(config, transport);

        assert!(archive
            .exists_in_collection("item.bin".to_string(), "books".to_string())
            .await
            .unwrap());
        assert!(!archive
            .exists_in_collection("other.bin".to_string(), "books".to_string())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_exists_beyond_tolerance_is_replication_error() {
        let dir = tempdir().unwrap();
        let config = config_with(
            dir.path(),
            vec![CollectionConfig::for_testing("books", &["p1", "p2"], 0)],
        );
        let transport = ScriptedTransport::new()
            .pillar("p1", PillarScript::healthy("x").holding(&["item.bin"]))
            .pillar("p2", PillarScript::failing("offline"));
        let archive = archive(config, transport);

        let err = archive
            .exists_in_collection("item.bin".to_string(), "books".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "replication");
    }

    #[tokio::test]
    async fn test_shutdown_closes_transport() {
        let dir = tempdir().unwrap();
        let config = config_with(
            dir.path(),
            vec![CollectionConfig::for_testing("books", &["p1"], 0)],
        );
        let archive = archive(config, ScriptedTransport::new());

        archive.shutdown();

        let err = archive
            .exists_in_collection("item.bin".to_string(), "books".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "shutdown");
    }
}
