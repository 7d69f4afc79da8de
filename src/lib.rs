// Copyright (c) 2025-2026 the preservation-engine authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Preservation Engine
//!
//! Packaging and quorum-tolerant replication for digital preservation.
//! Records coming out of an upstream catalog are batched per collection
//! into self-delimited archival containers, and sealed containers are
//! replicated onto a fixed set of storage pillars with a per-collection
//! failure tolerance. Fixity checks run with zero tolerance: replicas must
//! agree unanimously or the check fails hard.
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────────────┐
//!   records in ──────► │  CollectionBatcher   │  one active container
//!                      │  (src/batcher.rs)    │  per collection
//!                      └──────────┬───────────┘
//!                                 │ pack / seal
//!                      ┌──────────▼───────────┐
//!                      │   ContainerWriter    │  warcinfo + resource +
//!                      │  (src/container.rs)  │  metadata records
//!                      └──────────┬───────────┘
//!                                 │ upload sealed container
//!                      ┌──────────▼───────────┐
//!                      │  ReplicationClient   │  Local | Distributed,
//!                      │   (src/client/)      │  chosen at startup
//!                      └──────────┬───────────┘
//!                                 │ fan-out on the transport
//!                  ┌──────────────┼──────────────┐
//!            ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!            │ pillar p1 │  │ pillar p2 │  │ pillar p3 │
//!            └─────┬─────┘  └─────┬─────┘  └─────┬─────┘
//!                  └──────────────┼──────────────┘
//!                                 │ PillarEvents
//!                      ┌──────────▼───────────┐
//!                      │ PillarEventAggregator│  verdict under the
//!                      │  (src/aggregator.rs) │  collection tolerance
//!                      └──────────────────────┘
//! ```
//!
//! ## Tolerance model
//!
//! Uploads and listings absorb up to `max_failing_pillars` failures per
//! collection. Checksum consensus ([`consensus::agree`]) never does: any
//! pillar failure, any disagreement, or an empty response set fails the
//! fixity check, because a silent majority vote would mask corruption.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use preservation_engine::batcher::CollectionBatcher;
//! use preservation_engine::client::{build_archive, transport::ScriptedTransport};
//! use preservation_engine::config::{ArchiveConfig, CollectionConfig};
//! use preservation_engine::record::MemoryRecord;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> preservation_engine::error::Result<()> {
//! let config = ArchiveConfig {
//!     collections: vec![
//!         CollectionConfig::for_testing("books", &["p1", "p2", "p3"], 1),
//!     ],
//!     ..ArchiveConfig::for_testing("/var/lib/preservation/staging")
//! };
//!
//! let client = build_archive(&config, Arc::new(ScriptedTransport::new()));
//! let batcher = CollectionBatcher::new(config, client);
//!
//! let record = Arc::new(MemoryRecord::new("/data/folio-12r.tiff", "books"));
//! batcher.pack(record, Path::new("/data/folio-12r.xml")).await?;
//! batcher.flush_all().await?;
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod batcher;
pub mod client;
pub mod config;
pub mod consensus;
pub mod container;
pub mod digest;
pub mod error;
pub mod metrics;
pub mod record;

pub use aggregator::{ChecksumReport, OperationVerdict, PillarEvent, PillarEventAggregator};
pub use batcher::CollectionBatcher;
pub use client::{build_archive, ReplicationClient};
pub use config::{ArchiveConfig, ArchiveMode, CollectionConfig};
pub use container::ContainerWriter;
pub use digest::DigestAlgorithm;
pub use error::{PreservationError, Result};
pub use record::{MemoryRecord, PreservationRecord, RecordStatus};
