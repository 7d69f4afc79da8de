// Copyright (c) 2025-2026 the preservation-engine authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single-directory fallback archive.
//!
//! Used in test and non-distributed deployments. Every collection maps to a
//! subdirectory under one base directory and "upload" is an atomic rename,
//! so an operation either fully happens or leaves the source untouched.
//! There is no fan-out, no tolerance arithmetic, and no transport.

use crate::client::{BoxFuture, ReplicationClient};
use crate::digest::DigestAlgorithm;
use crate::error::{PreservationError, Result};
use crate::metrics;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info};

pub struct LocalArchive {
    base_dir: PathBuf,
    algorithm: DigestAlgorithm,
    closed: AtomicBool,
}

impl LocalArchive {
    pub fn new(base_dir: PathBuf, algorithm: DigestAlgorithm) -> Self {
        Self {
            base_dir,
            algorithm,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PreservationError::Shutdown);
        }
        Ok(())
    }

    /// Where `file_id` lives inside `collection_id`.
    fn archived_path(&self, collection_id: &str, file_id: &str) -> PathBuf {
        self.base_dir.join(collection_id).join(file_id)
    }

    async fn archive(&self, file: &Path, collection_id: &str) -> Result<PathBuf> {
        let meta = tokio::fs::metadata(file)
            .await
            .map_err(|e| PreservationError::write(file, e))?;
        if !meta.is_file() {
            return Err(PreservationError::LocalFallback(format!(
                "source '{}' is not a regular file",
                file.display()
            )));
        }

        let file_id = file_id_of(file)?;
        let destination = self.archived_path(collection_id, &file_id);

        let collection_dir = self.base_dir.join(collection_id);
        tokio::fs::create_dir_all(&collection_dir)
            .await
            .map_err(|e| PreservationError::write(&collection_dir, e))?;

        // A rename would silently replace an archived object; refuse instead.
        if tokio::fs::try_exists(&destination)
            .await
            .map_err(|e| PreservationError::write(&destination, e))?
        {
            return Err(PreservationError::LocalFallback(format!(
                "'{}' already archived in collection '{}'",
                file_id, collection_id
            )));
        }

        tokio::fs::rename(file, &destination)
            .await
            .map_err(|e| PreservationError::write(&destination, e))?;

        Ok(destination)
    }
}

impl ReplicationClient for LocalArchive {
    fn upload_file(&self, file: PathBuf, collection_id: String) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.ensure_open()?;
            let start = Instant::now();
            let destination = self.archive(&file, &collection_id).await?;
            info!(
                file = %file.display(),
                destination = %destination.display(),
                collection_id = %collection_id,
                "Archived file locally"
            );
            metrics::record_upload(&collection_id, true, start.elapsed());
            Ok(true)
        })
    }

    fn retrieve_file(&self, file_id: String, collection_id: String) -> BoxFuture<'_, PathBuf> {
        Box::pin(async move {
            self.ensure_open()?;
            let path = self.archived_path(&collection_id, &file_id);
            if !tokio::fs::try_exists(&path)
                .await
                .map_err(|e| PreservationError::write(&path, e))?
            {
                return Err(PreservationError::replication(
                    "retrieve",
                    format!("'{file_id}' not archived in collection '{collection_id}'"),
                ));
            }
            debug!(file_id = %file_id, path = %path.display(), "Retrieved archived file");
            Ok(path)
        })
    }

    fn agreed_checksum(&self, file_id: String, collection_id: String) -> BoxFuture<'_, String> {
        Box::pin(async move {
            self.ensure_open()?;
            let path = self.archived_path(&collection_id, &file_id);
            if !tokio::fs::try_exists(&path)
                .await
                .map_err(|e| PreservationError::write(&path, e))?
            {
                return Err(PreservationError::Integrity(format!(
                    "no results: '{file_id}' not archived in collection '{collection_id}'"
                )));
            }
            let start = Instant::now();
            let value = self.algorithm.digest_file(&path)?;
            metrics::record_fixity_check(&collection_id, true, start.elapsed());
            Ok(value)
        })
    }

    fn exists_in_collection(
        &self,
        file_id: String,
        collection_id: String,
    ) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.ensure_open()?;
            let path = self.archived_path(&collection_id, &file_id);
            tokio::fs::try_exists(&path)
                .await
                .map_err(|e| PreservationError::write(&path, e))
        })
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        info!("Local archive shut down");
    }
}

/// Extract the object id (file name) of a source path.
pub(crate) fn file_id_of(file: &Path) -> Result<String> {
    file.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            PreservationError::write_msg(file, "source path has no file name component")
        })
}
