//! Per-transfer chunk reordering.
//!
//! The engine is synchronous and event-driven: chunks arrive in whatever
//! order the network produced them, queue in arrival order, and are
//! matched against the stream position each time the consumer asks for
//! the next piece. A chunk landing exactly at the position advances the
//! stream; one behind it is a stale duplicate; one ahead of it means the
//! mux has desynced, which is unrecoverable and closes the transfer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;

use cairn_core::{PacketMessage, PeerMessage, TrailerChunk, TrailerKill};

use crate::flow::CreditReturn;
use crate::queue::OutboundQueue;

use super::demux::TrailerDemux;

/// Receives the reassembled stream.
///
/// Both callbacks run while the transfer lock is held: implementations
/// must return quickly and must not call back into the same trailer
/// (`request_next`, `close`) synchronously, or they will deadlock.
pub trait TrailerConsumer: Send {
    /// The next in-order piece of the stream. An error here is logged;
    /// the stream position has already advanced past these bytes.
    fn data(&mut self, bytes: &Bytes) -> anyhow::Result<()>;

    /// The transfer ended. Called exactly once, on explicit close, kill,
    /// desync, or timeout.
    fn closed(&mut self);
}

/// Reassembly state for one trailer id. Open until closed; closing is
/// one-way and happens exactly once no matter how many triggers race.
pub struct TrailerReassembly {
    trailer_id: u16,
    closed: AtomicBool,
    inner: Mutex<Inner>,
    credit: Arc<CreditReturn>,
    queue: Arc<OutboundQueue>,
    demux: Weak<TrailerDemux>,
}

struct Inner {
    /// Next byte offset the consumer has not yet seen.
    position: u64,
    /// Chunks in arrival order, not offset order.
    arrived: VecDeque<TrailerChunk>,
    /// One-shot: the consumer wants the next chunk.
    want_next: bool,
    chunks_received: u64,
    consumer: Box<dyn TrailerConsumer>,
}

impl TrailerReassembly {
    pub(super) fn new(
        trailer_id: u16,
        consumer: Box<dyn TrailerConsumer>,
        credit: Arc<CreditReturn>,
        queue: Arc<OutboundQueue>,
        demux: Weak<TrailerDemux>,
    ) -> Self {
        Self {
            trailer_id,
            closed: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                position: 0,
                arrived: VecDeque::new(),
                want_next: false,
                chunks_received: 0,
                consumer,
            }),
            credit,
            queue,
            demux,
        }
    }

    pub fn trailer_id(&self) -> u16 {
        self.trailer_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// A chunk arrived from the network for this trailer.
    pub fn received(&self, chunk: TrailerChunk) {
        let mut inner = self.inner.lock().unwrap();
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(
                trailer_id = self.trailer_id,
                offset = chunk.offset,
                len = chunk.data.len(),
                "chunk for closed trailer, discarding"
            );
            self.credit.release(chunk.data.len());
            return;
        }
        inner.chunks_received += 1;
        inner.arrived.push_back(chunk);
        self.deliver(&mut inner);
    }

    /// The consumer wants the next in-order chunk. Satisfied immediately
    /// if a matching chunk already arrived.
    pub fn request_next(&self) {
        let mut inner = self.inner.lock().unwrap();
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        inner.want_next = true;
        self.deliver(&mut inner);
    }

    /// Try to satisfy an outstanding read from queued arrivals.
    fn deliver(&self, inner: &mut Inner) {
        while inner.want_next {
            let Some(chunk) = inner.arrived.pop_front() else {
                return;
            };
            let offset = chunk.offset as u64;
            let len = chunk.data.len();

            if offset == inner.position {
                inner.position += len as u64;
                inner.want_next = false;
                if let Err(e) = inner.consumer.data(&chunk.data) {
                    tracing::warn!(
                        trailer_id = self.trailer_id,
                        error = %e,
                        "trailer consumer failed; stream position kept"
                    );
                }
                self.credit.release(len);
            } else if offset < inner.position {
                // Stale duplicate: the read request stays pending and the
                // next arrival gets a chance.
                tracing::debug!(
                    trailer_id = self.trailer_id,
                    offset,
                    position = inner.position,
                    "stale duplicate chunk, discarding"
                );
                self.credit.release(len);
            } else {
                // A gap means the mux lost chunks or reordered beyond its
                // guarantees. Not recoverable for this transfer.
                tracing::error!(
                    trailer_id = self.trailer_id,
                    offset,
                    position = inner.position,
                    "chunk ahead of stream position, closing trailer"
                );
                self.credit.release(len);
                if self.begin_close() {
                    self.close_locked(inner, true);
                }
                return;
            }
        }
    }

    /// Terminate the transfer. Idempotent: only the first caller runs the
    /// side effects (deregistration, drain, consumer notification, and
    /// the kill message when requested).
    pub fn close(&self, kill: bool) {
        if !self.begin_close() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        self.close_locked(&mut inner, kill);
    }

    /// Win the race to close. True for exactly one caller.
    fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    fn close_locked(&self, inner: &mut Inner, kill: bool) {
        if let Some(demux) = self.demux.upgrade() {
            demux.deregister(self.trailer_id);
        }
        while let Some(chunk) = inner.arrived.pop_front() {
            self.credit.release(chunk.data.len());
        }
        inner.want_next = false;
        inner.consumer.closed();
        if kill {
            self.queue
                .enqueue(PacketMessage::new(PeerMessage::TrailerKill(TrailerKill {
                    trailer_id: self.trailer_id,
                })));
        }
        tracing::debug!(
            trailer_id = self.trailer_id,
            position = inner.position,
            chunks = inner.chunks_received,
            kill,
            "trailer closed"
        );
    }

    /// Total chunks this transfer has accepted off the link.
    pub fn chunks_received(&self) -> u64 {
        self.inner.lock().unwrap().chunks_received
    }

    /// Current contiguous stream position.
    pub fn position(&self) -> u64 {
        self.inner.lock().unwrap().position
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
