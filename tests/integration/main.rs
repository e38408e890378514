//! Cairn integration test harness.
//!
//! These tests wire two in-process link endpoints straight into each
//! other: a frame "sent" by one side is decoded through the registry and
//! executed against the other side's dispatcher, which is exactly the
//! path real network bytes take after the transport strips encryption.
//! No sockets are involved; the transport is out of scope here.

mod link;
mod scheduler;
mod trailers;

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use cairn_core::frame::{self, HEADER_LEN};
use cairn_core::{MessageRegistry, Presentation};
use cairn_peer::{
    AppMessage, ConnectionDispatch, CreditLedger, CreditReturn, PacketSink, Peer, TrailerDemux,
    TrailerSenders,
};

// ── Harness ───────────────────────────────────────────────────────────────────

/// One side of a link: the full receive/send state for a single peer
/// connection.
pub struct Endpoint {
    pub peer: Arc<Peer>,
    pub demux: Arc<TrailerDemux>,
    pub ledger: Arc<CreditLedger>,
    pub senders: Arc<TrailerSenders>,
    pub dispatch: Arc<ConnectionDispatch>,
}

/// Build an endpoint with an empty credit window and a small app channel.
pub fn endpoint(id_byte: u8) -> (Endpoint, mpsc::Receiver<AppMessage>) {
    let peer = Peer::new([id_byte; 32], Presentation::Standard);
    let credit = Arc::new(CreditReturn::new(peer.queue().clone()));
    let demux = TrailerDemux::new(peer.queue().clone(), credit);
    let ledger = Arc::new(CreditLedger::new(0));
    let senders = TrailerSenders::new();
    let (app_tx, app_rx) = mpsc::channel(16);
    let dispatch = Arc::new(ConnectionDispatch::new(
        peer.clone(),
        demux.clone(),
        ledger.clone(),
        senders.clone(),
        app_tx,
    ));
    (
        Endpoint {
            peer,
            demux,
            ledger,
            senders,
            dispatch,
        },
        app_rx,
    )
}

/// A sink that delivers frames straight into the remote endpoint's
/// receive path: header decode, registry parse, execute.
pub struct DirectLink {
    remote: Arc<ConnectionDispatch>,
    registry: Arc<MessageRegistry>,
}

impl DirectLink {
    pub fn to(remote: &Endpoint) -> Self {
        Self {
            remote: remote.dispatch.clone(),
            registry: Arc::new(MessageRegistry::standard()),
        }
    }
}

impl PacketSink for DirectLink {
    fn send(&self, frame: Bytes) -> anyhow::Result<()> {
        let (len, code) = frame::decode_header(&frame)?;
        let payload = frame.slice(HEADER_LEN..);
        anyhow::ensure!(
            payload.len() == len as usize,
            "frame length field does not match payload"
        );
        // The payload is our own frame, never reused: no copy needed.
        if let Some(msg) = self.registry.parse(code, &payload, false) {
            msg.execute(&*self.remote);
        }
        Ok(())
    }
}

/// Drive one endpoint's outbound queue dry into a sink.
pub fn pump(from: &Endpoint, sink: &dyn PacketSink) -> usize {
    let mut sent = 0;
    loop {
        match from.peer.queue().send_next(sink) {
            cairn_peer::SendOutcome::Idle => return sent,
            _ => sent += 1,
        }
    }
}

// ── Smoke test ────────────────────────────────────────────────────────────────

#[test]
fn endpoints_start_disconnected_and_empty() {
    let (a, _rx) = endpoint(1);
    assert!(!a.peer.is_connected());
    assert!(a.peer.queue().is_empty());
    assert_eq!(a.demux.active_transfers(), 0);
    assert_eq!(a.ledger.available(), 0);
}
