// Copyright (c) 2025-2026 the preservation-engine authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Append-only binary containers of archival records (ISO 28500 style).
//!
//! A container is one file holding a sequence of self-delimited records:
//! one `warcinfo` record written at creation, then `resource`/`metadata`
//! pairs (and optionally `update` records for metadata-only packaging).
//! Each record carries a URN identifier, a timestamp, a content type, a
//! content length, and a block digest over its payload; `metadata` and
//! `update` records link back to the resource they describe via
//! `WARC-Refers-To` and to the container's provenance record via
//! `WARC-Warcinfo-ID`.
//!
//! # Record Layout
//!
//! ```text
//! WARC/1.0
//! WARC-Type: resource
//! WARC-Record-ID: <urn:uuid:...>
//! WARC-Date: 2026-08-23T12:00:00Z
//! WARC-Warcinfo-ID: <urn:uuid:...>
//! Content-Type: image/tiff
//! Content-Length: 1024
//! WARC-Block-Digest: sha1:2ef7bde6...
//! <blank line>
//! <payload bytes>
//! <blank line>
//! ```
//!
//! # Invariants
//!
//! - The block digest precedes the payload on the wire, so payloads are
//!   buffered in memory before the header is written. Container rotation
//!   bounds how large a payload can get.
//! - Record identifiers are unique within a container; duplicates are
//!   rejected at append time, including ids written before a reopen.
//! - Once sealed, a container is immutable and is never reopened for
//!   writing.
//! - Exactly one append may be in flight against an open container; the
//!   `&mut self` write methods push that responsibility to the owner (the
//!   batcher writes under its map-wide lock).

use crate::digest::DigestAlgorithm;
use crate::error::{PreservationError, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Environment variables snapshotted into the `warcinfo` provenance block.
/// Fixed allow-list; nothing else from the process environment is captured.
const WARCINFO_ENV_ALLOWLIST: &[&str] = &["LANG", "TZ", "USER"];

/// Reference to a previously written `resource` record, used to link the
/// metadata record that describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    urn: String,
}

impl ResourceRef {
    /// The resource record's URN, e.g. `urn:uuid:1c7e0ca6-...`.
    pub fn urn(&self) -> &str {
        &self.urn
    }
}

/// Writer appending records to one container file.
#[derive(Debug)]
pub struct ContainerWriter {
    path: PathBuf,
    file: Option<File>,
    container_id: Uuid,
    warcinfo_urn: String,
    digest: DigestAlgorithm,
    bytes_written: u64,
    record_ids: HashSet<Uuid>,
    sealed: bool,
}

impl ContainerWriter {
    /// Create or append to the container at `path`.
    ///
    /// On first creation the single `warcinfo` record is written
    /// immediately: a fixed provenance block (description, conformance
    /// statement, generator version) plus a snapshot of an allow-list of
    /// process/environment properties. When appending to an existing
    /// container, the original `warcinfo` identifier is recovered from the
    /// file so new records can keep their back-reference.
    pub fn open(path: &Path, digest: DigestAlgorithm) -> Result<Self> {
        if path.exists() && !path.is_file() {
            return Err(PreservationError::write_msg(
                path,
                "path exists and is not a regular file",
            ));
        }

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| PreservationError::write(path, e))?;
        let existing_len = file
            .metadata()
            .map_err(|e| PreservationError::write(path, e))?
            .len();

        let mut writer = Self {
            path: path.to_path_buf(),
            file: Some(file),
            container_id: Uuid::new_v4(),
            warcinfo_urn: String::new(),
            digest,
            bytes_written: existing_len,
            record_ids: HashSet::new(),
            sealed: false,
        };

        if existing_len == 0 {
            let warcinfo_urn = urn(Uuid::new_v4());
            writer.warcinfo_urn = warcinfo_urn.clone();
            let provenance = warcinfo_payload();
            writer.append_record(
                "warcinfo",
                &warcinfo_urn,
                "application/warc-fields",
                None,
                provenance.as_bytes(),
            )?;
        } else {
            let (warcinfo_urn, existing_ids) = scan_existing(path)?;
            writer.warcinfo_urn = warcinfo_urn;
            writer.record_ids = existing_ids;
        }

        Ok(writer)
    }

    /// This container's generated identifier.
    pub fn container_id(&self) -> Uuid {
        self.container_id
    }

    /// URN of this container's `warcinfo` record.
    pub fn warcinfo_urn(&self) -> &str {
        &self.warcinfo_urn
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the container in bytes.
    pub fn size(&self) -> u64 {
        self.bytes_written
    }

    /// Whether the container has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Append one `resource` record.
    ///
    /// Reads `content` to the end, verifies that exactly `declared_len`
    /// bytes were read, computes the block digest, and writes the record
    /// under `urn:uuid:<record_id>`.
    pub fn write_resource(
        &mut self,
        content: &mut dyn Read,
        declared_len: u64,
        content_type: &str,
        record_id: Uuid,
    ) -> Result<ResourceRef> {
        let payload = self.read_payload(content, declared_len)?;
        let record_urn = self.claim_record_id(record_id)?;
        self.append_record("resource", &record_urn, content_type, None, &payload)?;
        Ok(ResourceRef { urn: record_urn })
    }

    /// Append one `metadata` record.
    ///
    /// `refers_to = Some(..)` links the metadata to the resource record it
    /// describes; `None` records representation-level metadata with no
    /// associated resource.
    pub fn write_metadata(
        &mut self,
        content: &mut dyn Read,
        declared_len: u64,
        content_type: &str,
        refers_to: Option<&ResourceRef>,
        record_id: Uuid,
    ) -> Result<()> {
        let payload = self.read_payload(content, declared_len)?;
        let record_urn = self.claim_record_id(record_id)?;
        self.append_record(
            "metadata",
            &record_urn,
            content_type,
            refers_to.map(|r| r.urn()),
            &payload,
        )
    }

    /// Append one `update` record (metadata-only packaging of an object
    /// whose resource lives in an earlier container).
    pub fn write_update(
        &mut self,
        content: &mut dyn Read,
        declared_len: u64,
        content_type: &str,
        refers_to: Option<&ResourceRef>,
        record_id: Uuid,
    ) -> Result<()> {
        let payload = self.read_payload(content, declared_len)?;
        let record_urn = self.claim_record_id(record_id)?;
        self.append_record(
            "update",
            &record_urn,
            content_type,
            refers_to.map(|r| r.urn()),
            &payload,
        )
    }

    /// Flush and close the container. Further writes fail.
    pub fn seal_and_close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()
                .map_err(|e| PreservationError::write(&self.path, e))?;
        }
        self.sealed = true;
        Ok(())
    }

    fn read_payload(&self, content: &mut dyn Read, declared_len: u64) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(declared_len as usize);
        content
            .read_to_end(&mut payload)
            .map_err(|e| PreservationError::write(&self.path, e))?;
        if payload.len() as u64 != declared_len {
            return Err(PreservationError::write_msg(
                &self.path,
                format!(
                    "content-length mismatch: declared {declared_len}, read {}",
                    payload.len()
                ),
            ));
        }
        Ok(payload)
    }

    fn claim_record_id(&mut self, record_id: Uuid) -> Result<String> {
        if !self.record_ids.insert(record_id) {
            return Err(PreservationError::write_msg(
                &self.path,
                format!("duplicate record id {record_id} within container"),
            ));
        }
        Ok(urn(record_id))
    }

    fn append_record(
        &mut self,
        record_type: &str,
        record_urn: &str,
        content_type: &str,
        refers_to: Option<&str>,
        payload: &[u8],
    ) -> Result<()> {
        let file = self.file.as_mut().ok_or_else(|| {
            PreservationError::write_msg(&self.path, "container is sealed")
        })?;

        let mut header = String::with_capacity(256);
        header.push_str("WARC/1.0\r\n");
        header.push_str(&format!("WARC-Type: {record_type}\r\n"));
        header.push_str(&format!("WARC-Record-ID: <{record_urn}>\r\n"));
        header.push_str(&format!(
            "WARC-Date: {}\r\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
        ));
        if record_type != "warcinfo" {
            header.push_str(&format!("WARC-Warcinfo-ID: <{}>\r\n", self.warcinfo_urn));
        }
        if let Some(refers) = refers_to {
            header.push_str(&format!("WARC-Refers-To: <{refers}>\r\n"));
        }
        header.push_str(&format!("Content-Type: {content_type}\r\n"));
        header.push_str(&format!("Content-Length: {}\r\n", payload.len()));
        header.push_str(&format!(
            "WARC-Block-Digest: {}\r\n",
            self.digest.labelled(payload)
        ));
        header.push_str("\r\n");

        file.write_all(header.as_bytes())
            .and_then(|_| file.write_all(payload))
            .and_then(|_| file.write_all(b"\r\n\r\n"))
            .map_err(|e| PreservationError::write(&self.path, e))?;

        self.bytes_written += header.len() as u64 + payload.len() as u64 + 4;
        Ok(())
    }
}

/// Build the URN form of a record identifier.
fn urn(id: Uuid) -> String {
    format!("urn:uuid:{id}")
}

/// Build the fixed `warcinfo` provenance payload.
fn warcinfo_payload() -> String {
    let mut fields = String::new();
    fields.push_str(
        "description: Container of archival resource/metadata records packaged for long-term preservation\r\n",
    );
    fields.push_str(&format!(
        "version: 1.0 ({} {})\r\n",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    ));
    fields.push_str("conformsTo: ISO 28500\r\n");

    let host = gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "unknown-host".to_string());
    fields.push_str(&format!("hostname: {host}\r\n"));
    fields.push_str(&format!("os: {}\r\n", std::env::consts::OS));
    fields.push_str(&format!("arch: {}\r\n", std::env::consts::ARCH));
    fields.push_str(&format!("pid: {}\r\n", std::process::id()));

    for key in WARCINFO_ENV_ALLOWLIST {
        if let Ok(value) = std::env::var(key) {
            fields.push_str(&format!("env.{key}: {value}\r\n"));
        }
    }

    fields
}

/// One parsed record from a container file.
#[derive(Debug)]
struct ParsedRecord {
    record_type: String,
    record_urn: String,
    block_digest: Option<String>,
    payload_start: usize,
    payload_len: usize,
}

/// Extract the payload of the record identified by `record_id`.
///
/// The stored block digest is re-verified against the extracted payload;
/// a mismatch means the container bytes no longer match what was written
/// and fails with an `Integrity` error.
pub fn read_record(path: &Path, record_id: Uuid) -> Result<Vec<u8>> {
    let data = std::fs::read(path).map_err(|e| PreservationError::write(path, e))?;
    let wanted = urn(record_id);

    for record in parse_records(path, &data)? {
        if record.record_urn == wanted {
            let payload =
                data[record.payload_start..record.payload_start + record.payload_len].to_vec();
            if let Some(stored) = &record.block_digest {
                verify_block_digest(stored, &payload)?;
            }
            return Ok(payload);
        }
    }

    Err(PreservationError::write_msg(
        path,
        format!("record {wanted} not found in container"),
    ))
}

/// Recover the `warcinfo` URN and all record identifiers from an existing
/// container, so that appends keep their back-reference and identifier
/// uniqueness holds across a reopen.
fn scan_existing(path: &Path) -> Result<(String, HashSet<Uuid>)> {
    let data = std::fs::read(path).map_err(|e| PreservationError::write(path, e))?;
    let mut warcinfo_urn = None;
    let mut record_ids = HashSet::new();

    for record in parse_records(path, &data)? {
        if let Some(id) = record.record_urn.strip_prefix("urn:uuid:") {
            if let Ok(id) = Uuid::parse_str(id) {
                record_ids.insert(id);
            }
        }
        if record.record_type == "warcinfo" {
            warcinfo_urn = Some(record.record_urn);
        }
    }

    let warcinfo_urn = warcinfo_urn.ok_or_else(|| {
        PreservationError::write_msg(path, "existing container has no warcinfo record")
    })?;
    Ok((warcinfo_urn, record_ids))
}

fn verify_block_digest(stored: &str, payload: &[u8]) -> Result<()> {
    let Some((alg, value)) = stored.split_once(':') else {
        return Err(PreservationError::Integrity(format!(
            "malformed block digest '{stored}'"
        )));
    };
    let algorithm: DigestAlgorithm = alg.parse().map_err(|_| {
        PreservationError::Integrity(format!("unknown block digest algorithm '{alg}'"))
    })?;
    if algorithm.digest(payload) != value {
        return Err(PreservationError::Integrity(
            "block digest mismatch on extraction".to_string(),
        ));
    }
    Ok(())
}

/// Parse the self-delimited record sequence of a container file.
fn parse_records(path: &Path, data: &[u8]) -> Result<Vec<ParsedRecord>> {
    let mut records = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let header_end = find(data, pos, b"\r\n\r\n").ok_or_else(|| {
            PreservationError::write_msg(path, "truncated record header")
        })?;
        let header = std::str::from_utf8(&data[pos..header_end]).map_err(|_| {
            PreservationError::write_msg(path, "record header is not valid UTF-8")
        })?;

        let mut lines = header.split("\r\n");
        let version = lines.next().unwrap_or_default();
        if version != "WARC/1.0" {
            return Err(PreservationError::write_msg(
                path,
                format!("unexpected record version line '{version}'"),
            ));
        }

        let mut record_type = String::new();
        let mut record_urn = String::new();
        let mut block_digest = None;
        let mut content_length: Option<usize> = None;

        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match name {
                "WARC-Type" => record_type = value.to_string(),
                "WARC-Record-ID" => {
                    record_urn = value.trim_matches(|c| c == '<' || c == '>').to_string();
                }
                "WARC-Block-Digest" => block_digest = Some(value.to_string()),
                "Content-Length" => {
                    content_length = Some(value.parse().map_err(|_| {
                        PreservationError::write_msg(
                            path,
                            format!("invalid Content-Length '{value}'"),
                        )
                    })?);
                }
                _ => {}
            }
        }

        let payload_len = content_length.ok_or_else(|| {
            PreservationError::write_msg(path, "record missing Content-Length")
        })?;
        let payload_start = header_end + 4;
        let payload_end = payload_start + payload_len;
        if payload_end + 4 > data.len() {
            return Err(PreservationError::write_msg(path, "truncated record payload"));
        }

        records.push(ParsedRecord {
            record_type,
            record_urn,
            block_digest,
            payload_start,
            payload_len,
        });

        pos = payload_end + 4; // skip the trailing blank line
    }

    Ok(records)
}

fn find(data: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    data[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| from + i)
}
