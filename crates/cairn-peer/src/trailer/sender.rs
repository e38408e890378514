//! Outbound trailer streams.
//!
//! The sending half of the mux: splits a logical stream into chunk
//! frames, never letting more bytes onto the link than the peer's credit
//! window covers. A kill from the peer stops the stream at the next
//! chunk boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use dashmap::DashMap;

use cairn_core::frame::{self, type_code, MAX_PAYLOAD};
use cairn_core::message::MAX_CHUNK_OFFSET;
use cairn_core::TrailerChunk;

use crate::accounting::TransferCounters;
use crate::flow::CreditLedger;
use crate::queue::PacketSink;

use super::TrailerError;

/// Most data bytes one chunk frame can carry: the frame payload holds a
/// 6-byte chunk header (id + offset) ahead of the data.
pub const CHUNK_DATA_MAX: usize = MAX_PAYLOAD - 6;

/// The trailer ids this connection is currently sending on, so an
/// incoming kill can stop the right stream.
pub struct TrailerSenders {
    active: DashMap<u16, Arc<AtomicBool>>,
}

impl TrailerSenders {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: DashMap::new(),
        })
    }

    fn begin(&self, trailer_id: u16) -> Result<Arc<AtomicBool>, TrailerError> {
        match self.active.entry(trailer_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(TrailerError::DuplicateTrailer(trailer_id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let flag = Arc::new(AtomicBool::new(false));
                slot.insert(flag.clone());
                Ok(flag)
            }
        }
    }

    /// The peer wants no more chunks on this id.
    pub fn kill(&self, trailer_id: u16) {
        match self.active.remove(&trailer_id) {
            Some((_, flag)) => {
                flag.store(true, Ordering::Release);
                tracing::debug!(trailer_id, "outbound trailer killed by peer");
            }
            None => {
                tracing::debug!(trailer_id, "kill for unknown outbound trailer, ignoring");
            }
        }
    }

    fn finish(&self, trailer_id: u16) {
        self.active.remove(&trailer_id);
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// One outbound stream. Not shared: the producing task owns it.
pub struct TrailerSender {
    trailer_id: u16,
    offset: u64,
    ledger: Arc<CreditLedger>,
    counters: Arc<TransferCounters>,
    registry: Arc<TrailerSenders>,
    killed: Arc<AtomicBool>,
    finished: bool,
}

impl TrailerSender {
    pub fn begin(
        registry: &Arc<TrailerSenders>,
        trailer_id: u16,
        ledger: Arc<CreditLedger>,
        counters: Arc<TransferCounters>,
    ) -> Result<Self, TrailerError> {
        let killed = registry.begin(trailer_id)?;
        Ok(Self {
            trailer_id,
            offset: 0,
            ledger,
            counters,
            registry: registry.clone(),
            killed,
            finished: false,
        })
    }

    pub fn trailer_id(&self) -> u16 {
        self.trailer_id
    }

    /// Frame and send as much of `data` as the credit window covers.
    ///
    /// Returns the number of bytes consumed; the caller holds the rest
    /// until more credit arrives. Errors on a peer kill, on exhausting
    /// the wire offset range, or on a failed send.
    pub fn write(&mut self, sink: &dyn PacketSink, data: &[u8]) -> anyhow::Result<usize> {
        let mut sent = 0usize;
        for piece in data.chunks(CHUNK_DATA_MAX) {
            if self.killed.load(Ordering::Acquire) {
                self.finish();
                return Err(TrailerError::Killed(self.trailer_id).into());
            }
            let end = self.offset + piece.len() as u64;
            if end > MAX_CHUNK_OFFSET as u64 + 1 {
                return Err(TrailerError::TransferTooLarge {
                    trailer_id: self.trailer_id,
                    offset: end,
                }
                .into());
            }
            if !self.ledger.try_reserve(piece.len()) {
                tracing::trace!(
                    trailer_id = self.trailer_id,
                    want = piece.len(),
                    available = self.ledger.available(),
                    "credit exhausted, pausing stream"
                );
                break;
            }
            let chunk = TrailerChunk::new(
                self.trailer_id,
                self.offset as u32,
                Bytes::copy_from_slice(piece),
            )?;
            let frame = frame::encode_frame(type_code::TRAILER_CHUNK, &chunk.encode());
            let frame_len = frame.len();
            sink.send(frame)
                .with_context(|| format!("trailer {} chunk send failed", self.trailer_id))?;
            self.counters.record_sent(frame_len);
            self.offset = end;
            sent += piece.len();
        }
        Ok(sent)
    }

    /// The stream is complete; free the id for reuse.
    pub fn finish(&mut self) {
        if !self.finished {
            self.registry.finish(self.trailer_id);
            self.finished = true;
        }
    }
}

impl Drop for TrailerSender {
    fn drop(&mut self) {
        self.finish();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
