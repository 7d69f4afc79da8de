// Copyright (c) 2025-2026 the preservation-engine authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Message transport seam between the distributed client and the pillars.
//!
//! The deployment's asynchronous message bus is an external dependency;
//! this module only defines the seam. A broadcast hands the transport a
//! request plus the sending half of the operation's completion channel, and
//! the transport pushes one [`PillarEvent`] per responding pillar onto it
//! from its own dispatch tasks. The calling task never sees the bus.
//!
//! [`ScriptedTransport`] is the in-process implementation used by tests and
//! broker-less deployments: each pillar is given a fixed script of how to
//! answer each request kind.

use crate::aggregator::{ChecksumReport, PillarEvent};
use crate::digest::DigestAlgorithm;
use crate::error::{PreservationError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Broadcast put-request: replicate a staged file onto every pillar.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub operation_id: Uuid,
    pub collection_id: String,
    pub pillar_ids: Vec<String>,
    /// Object identifier the pillars will store the file under.
    pub file_id: String,
    /// Reachable staging location the pillars fetch the file from.
    pub staged_path: PathBuf,
    /// Locally computed checksum the pillars validate against.
    pub validation: ChecksumReport,
    /// Identifier of the requesting client on the shared transport.
    pub component_id: String,
}

/// Broadcast checksum-request for a fixity check.
#[derive(Debug, Clone)]
pub struct ChecksumRequest {
    pub operation_id: Uuid,
    pub collection_id: String,
    pub pillar_ids: Vec<String>,
    pub file_id: String,
    pub algorithm: DigestAlgorithm,
    pub component_id: String,
}

/// Delivery request answered by the fastest-responding pillar.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub operation_id: Uuid,
    pub collection_id: String,
    pub pillar_ids: Vec<String>,
    pub file_id: String,
    /// Location the delivering pillar writes the object to.
    pub delivery_path: PathBuf,
    pub component_id: String,
}

/// Paged object-id listing request.
#[derive(Debug, Clone)]
pub struct ListingRequest {
    pub operation_id: Uuid,
    pub collection_id: String,
    pub pillar_ids: Vec<String>,
    /// Object id the listing is restricted to.
    pub object_id: String,
    pub component_id: String,
}

/// The deployment's asynchronous message bus, seen from this client.
///
/// Implementations dispatch each request to the named pillars and push one
/// [`PillarEvent`] per responding pillar onto `events`. Broadcasting must
/// not block on pillar responses; only enqueueing may fail.
pub trait PillarTransport: Send + Sync + 'static {
    /// Broadcast a put-request to every pillar of the collection.
    fn broadcast_put(&self, request: PutRequest, events: mpsc::Sender<PillarEvent>) -> Result<()>;

    /// Broadcast a checksum request to every pillar of the collection.
    fn broadcast_checksum(
        &self,
        request: ChecksumRequest,
        events: mpsc::Sender<PillarEvent>,
    ) -> Result<()>;

    /// Ask for delivery of an object; answered by one pillar.
    fn request_delivery(
        &self,
        request: DeliveryRequest,
        events: mpsc::Sender<PillarEvent>,
    ) -> Result<()>;

    /// Broadcast an object-id listing request.
    fn broadcast_listing(
        &self,
        request: ListingRequest,
        events: mpsc::Sender<PillarEvent>,
    ) -> Result<()>;

    /// Release the bus connection. Later broadcasts must fail immediately.
    fn close(&self);
}

// ═══════════════════════════════════════════════════════════════════════════════
// ScriptedTransport: in-process pillars with fixed behaviors
// ═══════════════════════════════════════════════════════════════════════════════

/// How a scripted pillar answers a put-request.
#[derive(Debug, Clone, Default)]
pub enum PutResponse {
    /// Acknowledge the replica as stored.
    #[default]
    Ack,
    /// Report failure with this reason.
    Fail(String),
    /// Never respond (exercises the timeout path).
    Silent,
}

/// How a scripted pillar answers a checksum request.
#[derive(Debug, Clone, Default)]
pub enum ChecksumResponse {
    /// Report this hex checksum value.
    Value(String),
    /// Report failure with this reason.
    Fail(String),
    /// Never respond.
    #[default]
    Silent,
}

/// How a scripted pillar answers a listing request.
#[derive(Debug, Clone, Default)]
pub enum ListingResponse {
    /// Complete the listing holding these object ids.
    Holds(Vec<String>),
    /// Complete the listing holding nothing.
    #[default]
    Empty,
    /// Report failure with this reason.
    Fail(String),
    /// Never respond.
    Silent,
}

/// How a scripted pillar answers a delivery request.
#[derive(Debug, Clone, Default)]
pub enum DeliveryResponse {
    /// Write these bytes to the delivery location and report success.
    Deliver(Vec<u8>),
    /// Report failure with this reason.
    Fail(String),
    /// Never respond.
    #[default]
    Silent,
}

/// Fixed behavior of one scripted pillar.
#[derive(Debug, Clone, Default)]
pub struct PillarScript {
    pub put: PutResponse,
    pub checksum: ChecksumResponse,
    pub listing: ListingResponse,
    pub delivery: DeliveryResponse,
}

impl PillarScript {
    /// A pillar that acknowledges puts, reports `checksum_value` for fixity
    /// checks, and lists nothing.
    pub fn healthy(checksum_value: &str) -> Self {
        Self {
            put: PutResponse::Ack,
            checksum: ChecksumResponse::Value(checksum_value.to_string()),
            listing: ListingResponse::Empty,
            delivery: DeliveryResponse::Silent,
        }
    }

    /// A pillar that fails every request with `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            put: PutResponse::Fail(reason.to_string()),
            checksum: ChecksumResponse::Fail(reason.to_string()),
            listing: ListingResponse::Fail(reason.to_string()),
            delivery: DeliveryResponse::Fail(reason.to_string()),
        }
    }

    /// A pillar that never answers anything.
    pub fn silent() -> Self {
        Self {
            put: PutResponse::Silent,
            checksum: ChecksumResponse::Silent,
            listing: ListingResponse::Silent,
            delivery: DeliveryResponse::Silent,
        }
    }

    /// Replace the listing behavior: this pillar holds `object_ids`.
    pub fn holding(mut self, object_ids: &[&str]) -> Self {
        self.listing = ListingResponse::Holds(object_ids.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Replace the delivery behavior: this pillar delivers `bytes`.
    pub fn delivering(mut self, bytes: &[u8]) -> Self {
        self.delivery = DeliveryResponse::Deliver(bytes.to_vec());
        self
    }
}

/// In-process transport with per-pillar scripted behaviors.
///
/// Plays the role of the real message bus in tests: responses are pushed
/// from spawned tasks, so events reach the aggregator asynchronously just
/// as they would from transport-dispatch threads. A pillar named in a
/// request but missing from the script table reports failure.
#[derive(Default)]
pub struct ScriptedTransport {
    pillars: HashMap<String, PillarScript>,
    closed: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scripted pillar.
    pub fn pillar(mut self, pillar_id: &str, script: PillarScript) -> Self {
        self.pillars.insert(pillar_id.to_string(), script);
        self
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PreservationError::Shutdown);
        }
        Ok(())
    }

    fn script_for(&self, pillar_id: &str) -> PillarScript {
        self.pillars.get(pillar_id).cloned().unwrap_or_else(|| {
            PillarScript::failing("pillar not reachable on transport")
        })
    }

    fn dispatch(events: &mpsc::Sender<PillarEvent>, event: PillarEvent) {
        let events = events.clone();
        tokio::spawn(async move {
            // Receiver may already have resolved early; dropped sends are fine.
            let _ = events.send(event).await;
        });
    }
}

impl PillarTransport for ScriptedTransport {
    fn broadcast_put(&self, request: PutRequest, events: mpsc::Sender<PillarEvent>) -> Result<()> {
        self.ensure_open()?;
        debug!(
            operation_id = %request.operation_id,
            collection_id = %request.collection_id,
            file_id = %request.file_id,
            pillar_count = request.pillar_ids.len(),
            "Broadcasting put-request"
        );
        for pillar_id in &request.pillar_ids {
            match self.script_for(pillar_id).put {
                PutResponse::Ack => Self::dispatch(&events, PillarEvent::success(pillar_id)),
                PutResponse::Fail(reason) => {
                    Self::dispatch(&events, PillarEvent::failure(pillar_id, &reason))
                }
                PutResponse::Silent => {}
            }
        }
        Ok(())
    }

    fn broadcast_checksum(
        &self,
        request: ChecksumRequest,
        events: mpsc::Sender<PillarEvent>,
    ) -> Result<()> {
        self.ensure_open()?;
        for pillar_id in &request.pillar_ids {
            match self.script_for(pillar_id).checksum {
                ChecksumResponse::Value(value) => {
                    let report = ChecksumReport {
                        file_id: request.file_id.clone(),
                        algorithm: request.algorithm,
                        value,
                    };
                    Self::dispatch(&events, PillarEvent::checksum(pillar_id, report));
                }
                ChecksumResponse::Fail(reason) => {
                    Self::dispatch(&events, PillarEvent::failure(pillar_id, &reason))
                }
                ChecksumResponse::Silent => {}
            }
        }
        Ok(())
    }

    fn request_delivery(
        &self,
        request: DeliveryRequest,
        events: mpsc::Sender<PillarEvent>,
    ) -> Result<()> {
        self.ensure_open()?;
        // One answer: the first pillar scripted to deliver wins, standing in
        // for "fastest responder". If none delivers, a failing pillar gets
        // to report; otherwise the request goes unanswered.
        let mut failure: Option<(String, String)> = None;
        for pillar_id in &request.pillar_ids {
            match self.script_for(pillar_id).delivery {
                DeliveryResponse::Deliver(bytes) => {
                    let path = request.delivery_path.clone();
                    let pillar_id = pillar_id.clone();
                    let events = events.clone();
                    tokio::spawn(async move {
                        let event = match tokio::fs::write(&path, &bytes).await {
                            Ok(()) => PillarEvent::success(&pillar_id),
                            Err(e) => PillarEvent::failure(&pillar_id, &e.to_string()),
                        };
                        let _ = events.send(event).await;
                    });
                    return Ok(());
                }
                DeliveryResponse::Fail(reason) => {
                    failure.get_or_insert((pillar_id.clone(), reason));
                }
                DeliveryResponse::Silent => {}
            }
        }
        if let Some((pillar_id, reason)) = failure {
            Self::dispatch(&events, PillarEvent::failure(&pillar_id, &reason));
        }
        Ok(())
    }

    fn broadcast_listing(
        &self,
        request: ListingRequest,
        events: mpsc::Sender<PillarEvent>,
    ) -> Result<()> {
        self.ensure_open()?;
        for pillar_id in &request.pillar_ids {
            match self.script_for(pillar_id).listing {
                ListingResponse::Holds(ids) => {
                    let matched: Vec<String> =
                        ids.into_iter().filter(|id| *id == request.object_id).collect();
                    Self::dispatch(&events, PillarEvent::listing(pillar_id, matched));
                }
                ListingResponse::Empty => {
                    Self::dispatch(&events, PillarEvent::listing(pillar_id, Vec::new()))
                }
                ListingResponse::Fail(reason) => {
                    Self::dispatch(&events, PillarEvent::failure(pillar_id, &reason))
                }
                ListingResponse::Silent => {}
            }
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
