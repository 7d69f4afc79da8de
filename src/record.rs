// Copyright (c) 2025-2026 the preservation-engine authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collaborator-facing record interface.
//!
//! The upstream catalog owns the records being preserved; this crate only
//! reads a record's content file and collection, and writes back the
//! packaging outcome once, at container-upload time. The trait keeps the
//! engine decoupled from the catalog's own record type and lets tests run
//! against [`MemoryRecord`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// What the engine needs from a record being preserved.
///
/// Outcome setters are called exactly once per record, after the container
/// holding it reaches an upload verdict. Implementations must be safe to
/// share across the batcher's tasks.
pub trait PreservationRecord: Send + Sync {
    /// Path to the record's source content file.
    fn file(&self) -> PathBuf;

    /// The collection this record is preserved into.
    fn collection_id(&self) -> String;

    /// Read a descriptive field (e.g. `"mime_type"`), if present.
    fn field_value(&self, key: &str) -> Option<String>;

    /// Record which container holds this record's resource.
    fn set_resource_package(&self, container_id: &str);

    /// Record which container holds this record's metadata.
    fn set_metadata_package(&self, container_id: &str);

    /// Mark preservation of this record finished.
    fn set_finished(&self);

    /// Mark preservation of this record failed, with a human-readable reason.
    fn set_failed(&self, reason: &str);
}

/// Preservation outcome of a [`MemoryRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RecordStatus {
    /// Not yet packaged, or packaged but awaiting an upload verdict.
    #[default]
    Pending,
    /// Container upload completed within tolerance.
    Finished,
    /// Container upload failed; carries the surfaced reason.
    Failed(String),
}

/// In-memory record implementation for tests and standalone use.
#[derive(Debug)]
pub struct MemoryRecord {
    file: PathBuf,
    collection_id: String,
    fields: HashMap<String, String>,
    state: Mutex<RecordOutcome>,
}

#[derive(Debug, Default)]
struct RecordOutcome {
    status: RecordStatus,
    resource_package: Option<String>,
    metadata_package: Option<String>,
}

impl MemoryRecord {
    /// Create a record pointing at `file`, preserved into `collection_id`.
    pub fn new(file: impl Into<PathBuf>, collection_id: &str) -> Self {
        Self {
            file: file.into(),
            collection_id: collection_id.to_string(),
            fields: HashMap::new(),
            state: Mutex::new(RecordOutcome::default()),
        }
    }

    /// Add a descriptive field.
    pub fn with_field(mut self, key: &str, value: &str) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }

    /// Current preservation status.
    pub fn status(&self) -> RecordStatus {
        self.state.lock().unwrap().status.clone()
    }

    /// Container id recorded for the resource, if any.
    pub fn resource_package(&self) -> Option<String> {
        self.state.lock().unwrap().resource_package.clone()
    }

    /// Container id recorded for the metadata, if any.
    pub fn metadata_package(&self) -> Option<String> {
        self.state.lock().unwrap().metadata_package.clone()
    }
}

impl PreservationRecord for MemoryRecord {
    fn file(&self) -> PathBuf {
        self.file.clone()
    }

    fn collection_id(&self) -> String {
        self.collection_id.clone()
    }

    fn field_value(&self, key: &str) -> Option<String> {
        self.fields.get(key).cloned()
    }

    fn set_resource_package(&self, container_id: &str) {
        self.state.lock().unwrap().resource_package = Some(container_id.to_string());
    }

    fn set_metadata_package(&self, container_id: &str) {
        self.state.lock().unwrap().metadata_package = Some(container_id.to_string());
    }

    fn set_finished(&self) {
        self.state.lock().unwrap().status = RecordStatus::Finished;
    }

    fn set_failed(&self, reason: &str) {
        self.state.lock().unwrap().status = RecordStatus::Failed(reason.to_string());
    }
}
