//! Trailer flow control.
//!
//! Two halves of the credit protocol. The ledger is the sender side: a
//! window of bytes the peer has agreed to accept, drawn down before each
//! chunk goes out. The return path is the receiver side: bytes we have
//! consumed (or discarded) accrue as owed credit and flow back to the
//! peer as credit messages, which the outbound queue coalesces.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cairn_core::{PacketMessage, PeerMessage, TrailerCredit};

use crate::queue::OutboundQueue;

/// Sender side: how many trailer bytes the peer will currently accept.
#[derive(Debug)]
pub struct CreditLedger {
    available: AtomicU64,
}

impl CreditLedger {
    pub fn new(initial: u64) -> Self {
        Self {
            available: AtomicU64::new(initial),
        }
    }

    /// A credit message arrived; widen the window.
    pub fn grant(&self, credit: u16) {
        self.available.fetch_add(credit as u64, Ordering::AcqRel);
    }

    /// Claim window space for a chunk about to be sent. Returns false
    /// without claiming anything when the window is too small; the caller
    /// must hold the chunk until more credit arrives.
    pub fn try_reserve(&self, len: usize) -> bool {
        let len = len as u64;
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |avail| {
                avail.checked_sub(len)
            })
            .is_ok()
    }

    pub fn available(&self) -> u64 {
        self.available.load(Ordering::Acquire)
    }
}

/// Receiver side: credit owed back to the peer for trailer bytes we have
/// taken off the link, whether they were delivered or discarded.
pub struct CreditReturn {
    queue: Arc<OutboundQueue>,
}

impl CreditReturn {
    pub fn new(queue: Arc<OutboundQueue>) -> Self {
        Self { queue }
    }

    /// Release `n` bytes back to the peer. Grants larger than the 16-bit
    /// wire field split into several messages; the queue merges adjacent
    /// grants back together where they fit.
    pub fn release(&self, n: usize) {
        let mut remaining = n;
        while remaining > 0 {
            let grant = remaining.min(u16::MAX as usize);
            let credit =
                TrailerCredit::new(grant as u32).expect("grant bounded to the wire field");
            self.queue
                .enqueue(PacketMessage::new(PeerMessage::TrailerCredit(credit)));
            remaining -= grant;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
