//! Routes arriving chunks to the transfer that owns their trailer id.
//!
//! One demux per peer connection. Transfers register here when they open
//! and deregister themselves when they close; a chunk with no live
//! transfer is discarded with its credit released, since the sender paid
//! window for it.

use std::sync::Arc;

use dashmap::DashMap;

use cairn_core::TrailerChunk;

use crate::flow::CreditReturn;
use crate::queue::OutboundQueue;

use super::reassembly::{TrailerConsumer, TrailerReassembly};
use super::TrailerError;

pub struct TrailerDemux {
    transfers: DashMap<u16, Arc<TrailerReassembly>>,
    credit: Arc<CreditReturn>,
    queue: Arc<OutboundQueue>,
}

impl TrailerDemux {
    pub fn new(queue: Arc<OutboundQueue>, credit: Arc<CreditReturn>) -> Arc<Self> {
        Arc::new(Self {
            transfers: DashMap::new(),
            credit,
            queue,
        })
    }

    /// Start a transfer on a trailer id. The id must not already be
    /// active; concurrent transfers use distinct ids.
    pub fn open(
        self: &Arc<Self>,
        trailer_id: u16,
        consumer: Box<dyn TrailerConsumer>,
    ) -> Result<Arc<TrailerReassembly>, TrailerError> {
        match self.transfers.entry(trailer_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(TrailerError::DuplicateTrailer(trailer_id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let transfer = Arc::new(TrailerReassembly::new(
                    trailer_id,
                    consumer,
                    self.credit.clone(),
                    self.queue.clone(),
                    Arc::downgrade(self),
                ));
                slot.insert(transfer.clone());
                tracing::debug!(trailer_id, "trailer transfer opened");
                Ok(transfer)
            }
        }
    }

    /// Hand an arriving chunk to its transfer.
    pub fn route(&self, chunk: TrailerChunk) {
        // Clone out of the map first: delivery may close the transfer,
        // which removes this entry, and dashmap locks are not reentrant.
        let target = self.transfers.get(&chunk.trailer_id).map(|t| t.clone());
        match target {
            Some(transfer) => transfer.received(chunk),
            None => {
                tracing::debug!(
                    trailer_id = chunk.trailer_id,
                    len = chunk.data.len(),
                    "chunk with no active transfer, discarding"
                );
                self.credit.release(chunk.data.len());
            }
        }
    }

    /// Shut down one receive transfer locally, without echoing a kill
    /// back to the peer.
    pub fn shutdown(&self, trailer_id: u16) {
        let target = self.transfers.get(&trailer_id).map(|t| t.clone());
        if let Some(transfer) = target {
            transfer.close(false);
        }
    }

    /// Close every active transfer, e.g. when the connection drops.
    pub fn close_all(&self) {
        let active: Vec<Arc<TrailerReassembly>> =
            self.transfers.iter().map(|e| e.value().clone()).collect();
        for transfer in active {
            transfer.close(false);
        }
    }

    pub(super) fn deregister(&self, trailer_id: u16) {
        self.transfers.remove(&trailer_id);
    }

    pub fn active_transfers(&self) -> usize {
        self.transfers.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
