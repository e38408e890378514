//! Wires decoded messages to the state they act on.
//!
//! One dispatcher per connection. `execute` on a received message calls
//! through the `NodeActions` trait; this is the implementation that owns
//! the actual handles: the peer entry, the trailer demux, the credit
//! ledger, and the outbound sender registry. Application messages are
//! forwarded on a bounded channel and dropped with a log line when the
//! consumer falls behind.

use std::net::Ipv4Addr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use cairn_core::{NodeActions, NodeRef, RateLimitViolation, TrailerChunk};

use crate::flow::CreditLedger;
use crate::peers::Peer;
use crate::trailer::{TrailerDemux, TrailerSenders};

/// A decoded application message handed up out of this layer.
#[derive(Debug, Clone)]
pub struct AppMessage {
    pub body: Bytes,
    pub trailer_id: Option<u16>,
    pub is_request: bool,
}

pub struct ConnectionDispatch {
    peer: Arc<Peer>,
    demux: Arc<TrailerDemux>,
    ledger: Arc<CreditLedger>,
    senders: Arc<TrailerSenders>,
    app_tx: mpsc::Sender<AppMessage>,
}

impl ConnectionDispatch {
    pub fn new(
        peer: Arc<Peer>,
        demux: Arc<TrailerDemux>,
        ledger: Arc<CreditLedger>,
        senders: Arc<TrailerSenders>,
        app_tx: mpsc::Sender<AppMessage>,
    ) -> Self {
        Self {
            peer,
            demux,
            ledger,
            senders,
            app_tx,
        }
    }
}

impl NodeActions for ConnectionDispatch {
    fn peer_identified(&self, node: NodeRef, rate_interval: Option<f64>) {
        self.peer.note_traffic();
        tracing::info!(
            peer = hex::encode(&node.identity[..8]),
            version = node.version,
            "peer identified"
        );
        self.peer.set_protocol_version(node.version);
        self.peer.set_node_ref(node);
        self.peer.set_connected(true);
        if let Some(interval) = rate_interval {
            self.peer.set_peer_requested_interval(interval);
        }
    }

    fn peer_departed(&self) {
        tracing::info!(
            peer = hex::encode(&self.peer.identity()[..8]),
            "peer departed, tearing down link state"
        );
        self.peer.set_connected(false);
        self.demux.close_all();
    }

    fn rate_interval_updated(&self, interval: f64) {
        self.peer.note_traffic();
        tracing::debug!(interval, "peer updated its request interval");
        self.peer.set_peer_requested_interval(interval);
    }

    fn address_detected(&self, address: Ipv4Addr) {
        self.peer.note_traffic();
        tracing::debug!(%address, "peer reported our detected address");
        self.peer.set_detected_address(address);
    }

    fn rate_limit_violation(&self, report: &RateLimitViolation) {
        self.peer.note_traffic();
        tracing::warn!(
            violations = report.violation_count,
            requested = report.requested_interval,
            observed = report.observed_interval,
            excess = report.excess,
            "peer reports we violated its request rate"
        );
    }

    fn application_message(&self, body: Bytes, trailer_id: Option<u16>, is_request: bool) {
        self.peer.note_traffic();
        self.peer.counters().recv_queue_add(body.len());
        let msg = AppMessage {
            body,
            trailer_id,
            is_request,
        };
        if let Err(e) = self.app_tx.try_send(msg) {
            let dropped = match e {
                mpsc::error::TrySendError::Full(m) => m,
                mpsc::error::TrySendError::Closed(m) => m,
            };
            self.peer.counters().recv_queue_sub(dropped.body.len());
            tracing::warn!(
                len = dropped.body.len(),
                "application consumer behind, dropping message"
            );
        }
    }

    fn trailer_chunk(&self, chunk: TrailerChunk) {
        self.peer.note_traffic();
        self.peer.counters().record_received(chunk.data.len());
        self.demux.route(chunk);
    }

    fn trailer_credit(&self, credit: u16) {
        self.peer.note_traffic();
        self.ledger.grant(credit);
    }

    fn trailer_kill(&self, trailer_id: u16) {
        self.peer.note_traffic();
        self.senders.kill(trailer_id);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
