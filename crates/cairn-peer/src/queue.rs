//! Per-peer outbound message queue.
//!
//! Messages wait here ordered by priority (class, then fine delta, then
//! arrival), get dropped if they expire before a send slot opens, and
//! drive their exactly-once success/failure notifications when a send
//! attempt concludes. Queued credit grants for the same link coalesce so
//! at most one credit message is in flight per peer at a time.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;

use cairn_core::{FailureAction, PacketMessage, PeerMessage, Presentation};

use crate::accounting::TransferCounters;

/// Transmits one rendered frame toward a peer.
///
/// Implemented by the transport below this layer; tests substitute
/// doubles that capture or reject frames.
pub trait PacketSink: Send + Sync {
    fn send(&self, frame: Bytes) -> anyhow::Result<()>;
}

/// Outcome of one send attempt driven from the queue head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing eligible to send.
    Idle,
    /// A frame went out. `close_after` is set when it was the goodbye
    /// message and the connection should now be torn down.
    Sent { close_after: bool },
    /// The send failed and the per-variant failure policy was applied.
    /// `close_link` demands connection teardown (failed identify).
    Failed { close_link: bool },
}

pub struct OutboundQueue {
    inner: Mutex<Inner>,
    counters: Arc<TransferCounters>,
    presentation: Presentation,
}

struct Inner {
    /// Keyed by (priority class, delta, arrival sequence); BTreeMap
    /// iteration order is exactly send order.
    items: BTreeMap<(u8, i8, u64), PacketMessage>,
    next_seq: u64,
}

impl OutboundQueue {
    pub fn new(presentation: Presentation, counters: Arc<TransferCounters>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: BTreeMap::new(),
                next_seq: 0,
            }),
            counters,
            presentation,
        }
    }

    pub fn presentation(&self) -> Presentation {
        self.presentation
    }

    /// Queue a message for sending.
    ///
    /// Rejects messages the link's presentation cannot express (logged,
    /// dropped). A credit grant merges into an already-queued credit when
    /// the sum still fits the wire field.
    pub fn enqueue(&self, mut pm: PacketMessage) {
        if let Err(e) = pm.resolve(self.presentation, true) {
            tracing::warn!(error = %e, "message not expressible on this link, dropping");
            return;
        }

        let mut inner = self.inner.lock().unwrap();

        if let PeerMessage::TrailerCredit(new_credit) = pm.msg() {
            let extra = new_credit.credit();
            for queued in inner.items.values_mut() {
                let merged = match queued.msg_mut() {
                    PeerMessage::TrailerCredit(existing) => existing.merge(extra),
                    _ => false,
                };
                if merged {
                    tracing::trace!(extra, "coalesced credit into queued grant");
                    return;
                }
            }
        }

        let key = {
            let p = pm.priority().sort_key();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            (p.0, p.1, seq)
        };
        self.counters.send_queue_add(pm.length());
        inner.items.insert(key, pm);
    }

    /// Pop the most urgent live message and attempt to send it.
    ///
    /// Expired messages encountered on the way are dropped through their
    /// failure policy without a send attempt.
    pub fn send_next(&self, sink: &dyn PacketSink) -> SendOutcome {
        loop {
            let mut pm = {
                let mut inner = self.inner.lock().unwrap();
                let Some((&key, _)) = inner.items.iter().next() else {
                    return SendOutcome::Idle;
                };
                let pm = inner.items.remove(&key).expect("key was just observed");
                self.counters.send_queue_sub(pm.length());
                pm
            };

            if pm.is_expired(Instant::now()) {
                match pm.notify_failure(&"expired before send") {
                    FailureAction::Drop => continue,
                    FailureAction::Requeue(fresh) => {
                        self.enqueue(fresh);
                        continue;
                    }
                    FailureAction::CloseConnection => {
                        return SendOutcome::Failed { close_link: true }
                    }
                }
            }

            // Enqueue already resolved; re-resolve only if coalescing
            // invalidated the cached frame.
            if let Err(e) = pm.resolve(self.presentation, true) {
                tracing::warn!(error = %e, "queued message lost expressibility, dropping");
                continue;
            }

            let frame = pm.content();
            let close_after = pm.msg().is_close();
            match sink.send(frame.clone()) {
                Ok(()) => {
                    self.counters.record_sent(frame.len());
                    pm.notify_success();
                    return SendOutcome::Sent { close_after };
                }
                Err(e) => {
                    return match pm.notify_failure(&e) {
                        FailureAction::Drop => SendOutcome::Failed { close_link: false },
                        FailureAction::Requeue(fresh) => {
                            self.enqueue(fresh);
                            SendOutcome::Failed { close_link: false }
                        }
                        FailureAction::CloseConnection => {
                            SendOutcome::Failed { close_link: true }
                        }
                    };
                }
            }
        }
    }

    /// Drop every expired message, applying failure policies. Returns how
    /// many were removed. Called from the periodic maintenance pass.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let expired: Vec<PacketMessage> = {
            let mut inner = self.inner.lock().unwrap();
            let keys: Vec<_> = inner
                .items
                .iter()
                .filter(|(_, pm)| pm.is_expired(now))
                .map(|(&k, _)| k)
                .collect();
            keys.into_iter()
                .filter_map(|k| inner.items.remove(&k))
                .collect()
        };

        let count = expired.len();
        for pm in expired {
            self.counters.send_queue_sub(pm.length());
            match pm.notify_failure(&"expired in queue") {
                FailureAction::Requeue(fresh) => self.enqueue(fresh),
                FailureAction::Drop | FailureAction::CloseConnection => {}
            }
        }
        if count > 0 {
            tracing::debug!(count, "dropped expired outbound messages");
        }
        count
    }

    /// Whether any queued message announces a rate interval. The
    /// keepalive scheduler checks this before queueing another.
    pub fn has_rate_message(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .items
            .values()
            .any(|pm| pm.msg().carries_rate_interval())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the queued variants, in send order. Test-only.
    #[cfg(test)]
    pub(crate) fn queued_messages(&self) -> Vec<PeerMessage> {
        self.inner
            .lock()
            .unwrap()
            .items
            .values()
            .map(|pm| pm.msg().clone())
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
