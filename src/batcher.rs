// Copyright (c) 2025-2026 the preservation-engine authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-collection batching of records into containers.
//!
//! The batcher keeps at most one active container per collection. Packing a
//! record appends its resource and metadata to the collection's container;
//! once the container grows past the configured size limit it is sealed,
//! handed to the replication client, and a fresh container starts on the
//! next pack. Shipping is all-or-nothing per container: every member record
//! gets the same outcome, and a failed container is never retried here (the
//! catalog re-drives failed records through a new pack).

use crate::client::ReplicationClient;
use crate::config::ArchiveConfig;
use crate::container::ContainerWriter;
use crate::error::{PreservationError, Result};
use crate::metrics;
use crate::record::PreservationRecord;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// One record's membership in a container.
struct Member {
    record: Arc<dyn PreservationRecord>,
    /// Whether the member's resource (not just metadata) is in this container.
    packed_resource: bool,
}

/// A container currently accepting records for one collection.
struct ActiveContainer {
    /// Container name, which is also the object id it is uploaded under.
    name: String,
    writer: ContainerWriter,
    members: Vec<Member>,
}

pub struct CollectionBatcher {
    config: ArchiveConfig,
    client: Arc<dyn ReplicationClient>,
    // Guards the collection -> container map. Never held across an await;
    // containers due for upload are moved out first.
    active: Mutex<HashMap<String, ActiveContainer>>,
}

impl CollectionBatcher {
    pub fn new(config: ArchiveConfig, client: Arc<dyn ReplicationClient>) -> Self {
        Self {
            config,
            client,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Pack a record's resource and metadata into its collection's
    /// container, uploading the container first if it is over the limit.
    pub async fn pack(
        &self,
        record: Arc<dyn PreservationRecord>,
        metadata_file: &Path,
    ) -> Result<()> {
        let source = record.file();
        let content_type = record
            .field_value("mime_type")
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let metadata_type = record
            .field_value("metadata_mime_type")
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        self.append(record, |container| {
            let resource_ref = append_resource(container, &source, &content_type)?;
            append_metadata(container, metadata_file, &metadata_type, Some(&resource_ref))?;
            Ok(true)
        })
        .await
    }

    /// Pack an updated metadata document for an already-preserved record.
    ///
    /// Written as an `update` record; the earlier resource lives in a
    /// previously shipped container, so there is no in-container reference.
    pub async fn pack_metadata(
        &self,
        record: Arc<dyn PreservationRecord>,
        metadata_file: &Path,
    ) -> Result<()> {
        let metadata_type = record
            .field_value("metadata_mime_type")
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        self.append(record, |container| {
            append_update(container, metadata_file, &metadata_type)?;
            Ok(false)
        })
        .await
    }

    /// Seal and upload every active container currently over the size
    /// limit. Containers under the limit keep accepting records.
    pub async fn check_conditions(&self) -> Result<()> {
        let due: Vec<(String, ActiveContainer)> = {
            let mut active = self.active.lock().unwrap();
            let over: Vec<String> = active
                .iter()
                .filter(|(_, c)| c.writer.size() > self.config.packaging.container_size_limit)
                .map(|(id, _)| id.clone())
                .collect();
            let due = over
                .into_iter()
                .filter_map(|id| active.remove(&id).map(|c| (id, c)))
                .collect();
            metrics::set_active_containers(active.len());
            due
        };
        self.ship_all(due).await
    }

    /// Seal and upload every active container.
    pub async fn flush_all(&self) -> Result<()> {
        let drained: Vec<(String, ActiveContainer)> = {
            let mut active = self.active.lock().unwrap();
            let drained = active.drain().collect();
            metrics::set_active_containers(0);
            drained
        };
        self.ship_all(drained).await
    }

    /// Number of collections with an open container.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Append records via `write`, then run the seal/upload condition
    /// check. `write` returns whether the member's resource went into this
    /// container.
    async fn append<F>(&self, record: Arc<dyn PreservationRecord>, write: F) -> Result<()>
    where
        F: FnOnce(&mut ActiveContainer) -> Result<bool>,
    {
        let collection_id = record.collection_id();

        // Synchronous write phase under the map lock.
        {
            let mut active = self.active.lock().unwrap();
            let container = match active.entry(collection_id.clone()) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(e) => {
                    e.insert(self.open_container(&collection_id)?)
                }
            };

            let size_before = container.writer.size();
            let packed_resource = write(container)?;
            container.members.push(Member {
                record,
                packed_resource,
            });
            metrics::record_pack(&collection_id, container.writer.size() - size_before);
            metrics::set_active_containers(active.len());
        }

        self.check_conditions().await
    }

    async fn ship_all(&self, containers: Vec<(String, ActiveContainer)>) -> Result<()> {
        let mut first_error = None;
        for (collection_id, container) in containers {
            if let Err(e) = self.ship(&collection_id, container).await {
                warn!(collection_id = %collection_id, error = %e, "Container upload failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn open_container(&self, collection_id: &str) -> Result<ActiveContainer> {
        let dir = self.config.packaging.staging_dir.join(collection_id);
        std::fs::create_dir_all(&dir).map_err(|e| PreservationError::write(&dir, e))?;

        let name = format!("container-{}.warc", Uuid::new_v4());
        let writer = ContainerWriter::open(&dir.join(&name), self.config.packaging.digest_algorithm)?;
        debug!(collection_id = %collection_id, container = %name, "Opened container");
        Ok(ActiveContainer {
            name,
            writer,
            members: Vec::new(),
        })
    }

    /// Seal a container, upload it, and report the verdict to every member.
    async fn ship(&self, collection_id: &str, mut container: ActiveContainer) -> Result<()> {
        container.writer.seal_and_close()?;
        metrics::record_container_sealed(collection_id, container.writer.size());
        info!(
            collection_id = %collection_id,
            container = %container.name,
            bytes = container.writer.size(),
            member_count = container.members.len(),
            "Sealed container for upload"
        );

        let path = container.writer.path().to_path_buf();
        match self
            .client
            .upload_file(path, collection_id.to_string())
            .await
        {
            Ok(true) => {
                for member in &container.members {
                    if member.packed_resource {
                        member.record.set_resource_package(&container.name);
                    }
                    member.record.set_metadata_package(&container.name);
                    member.record.set_finished();
                }
                Ok(())
            }
            Ok(false) => {
                let reason = format!(
                    "upload of container '{}' to collection '{}' was not accepted",
                    container.name, collection_id
                );
                for member in &container.members {
                    member.record.set_failed(&reason);
                }
                Ok(())
            }
            Err(e) => {
                metrics::record_error(e.kind());
                let reason = e.to_string();
                for member in &container.members {
                    member.record.set_failed(&reason);
                }
                Err(e)
            }
        }
    }
}

/// Open a file for packing, returning its content and declared length.
fn open_content(file: &Path) -> Result<(File, u64)> {
    let len = std::fs::metadata(file)
        .map_err(|e| PreservationError::write(file, e))?
        .len();
    let content = File::open(file).map_err(|e| PreservationError::write(file, e))?;
    Ok((content, len))
}

fn append_resource(
    container: &mut ActiveContainer,
    file: &Path,
    content_type: &str,
) -> Result<crate::container::ResourceRef> {
    let (mut content, len) = open_content(file)?;
    container
        .writer
        .write_resource(&mut content, len, content_type, Uuid::new_v4())
}

fn append_metadata(
    container: &mut ActiveContainer,
    file: &Path,
    content_type: &str,
    refers_to: Option<&crate::container::ResourceRef>,
) -> Result<()> {
    let (mut content, len) = open_content(file)?;
    container
        .writer
        .write_metadata(&mut content, len, content_type, refers_to, Uuid::new_v4())
}

fn append_update(container: &mut ActiveContainer, file: &Path, content_type: &str) -> Result<()> {
    let (mut content, len) = open_content(file)?;
    container
        .writer
        .write_update(&mut content, len, content_type, None, Uuid::new_v4())
}
