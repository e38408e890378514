//! Peer registry: per-connection state shared between the receive path,
//! the send path, and the keepalive scheduler.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use cairn_core::{NodeRef, Presentation};

use crate::accounting::TransferCounters;
use crate::queue::OutboundQueue;

/// Protocol versions this node can talk to.
pub const MIN_PROTOCOL_VERSION: u32 = 2;
pub const MAX_PROTOCOL_VERSION: u32 = 3;

/// Rate-announcement bookkeeping for one peer: what we last told them
/// and what we currently want them to honor.
#[derive(Debug, Clone)]
pub struct RateSignal {
    /// When we last queued a rate announcement for this peer.
    pub last_sent_at: Option<Instant>,
    /// The interval value that announcement carried, in milliseconds.
    pub last_sent_interval: f64,
    /// The interval we currently want the peer to honor.
    pub current_interval: f64,
}

/// One peer connection's shared state.
pub struct Peer {
    identity: [u8; 32],
    queue: Arc<OutboundQueue>,
    counters: Arc<TransferCounters>,
    connected: AtomicBool,
    protocol_version: AtomicU32,
    last_traffic: Mutex<Instant>,
    rate: Mutex<RateSignal>,
    node_ref: Mutex<Option<NodeRef>>,
    detected_address: Mutex<Option<Ipv4Addr>>,
    /// What the peer asked of us, updated from their announcements.
    peer_requested_interval: Mutex<Option<f64>>,
}

impl Peer {
    pub fn new(identity: [u8; 32], presentation: Presentation) -> Arc<Self> {
        let counters = Arc::new(TransferCounters::new());
        Arc::new(Self {
            identity,
            queue: Arc::new(OutboundQueue::new(presentation, counters.clone())),
            counters,
            connected: AtomicBool::new(false),
            protocol_version: AtomicU32::new(0),
            last_traffic: Mutex::new(Instant::now()),
            rate: Mutex::new(RateSignal {
                last_sent_at: None,
                last_sent_interval: 0.0,
                current_interval: 0.0,
            }),
            node_ref: Mutex::new(None),
            detected_address: Mutex::new(None),
            peer_requested_interval: Mutex::new(None),
        })
    }

    pub fn identity(&self) -> [u8; 32] {
        self.identity
    }

    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    pub fn counters(&self) -> &Arc<TransferCounters> {
        &self.counters
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version.load(Ordering::Acquire)
    }

    pub fn set_protocol_version(&self, version: u32) {
        self.protocol_version.store(version, Ordering::Release);
    }

    pub fn version_supported(&self) -> bool {
        let v = self.protocol_version();
        (MIN_PROTOCOL_VERSION..=MAX_PROTOCOL_VERSION).contains(&v)
    }

    /// Note real traffic on the connection (any message in or out).
    pub fn note_traffic(&self) {
        *self.last_traffic.lock().unwrap() = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_traffic.lock().unwrap())
    }

    pub fn set_node_ref(&self, node: NodeRef) {
        *self.node_ref.lock().unwrap() = Some(node);
    }

    pub fn node_ref(&self) -> Option<NodeRef> {
        self.node_ref.lock().unwrap().clone()
    }

    pub fn set_detected_address(&self, addr: Ipv4Addr) {
        *self.detected_address.lock().unwrap() = Some(addr);
    }

    pub fn detected_address(&self) -> Option<Ipv4Addr> {
        *self.detected_address.lock().unwrap()
    }

    pub fn set_peer_requested_interval(&self, interval: f64) {
        *self.peer_requested_interval.lock().unwrap() = Some(interval);
    }

    pub fn peer_requested_interval(&self) -> Option<f64> {
        *self.peer_requested_interval.lock().unwrap()
    }

    /// Change the interval we want the peer to honor; the scheduler
    /// decides when the change is worth announcing.
    pub fn set_request_interval(&self, interval: f64) {
        self.rate.lock().unwrap().current_interval = interval;
    }

    pub fn rate_signal(&self) -> RateSignal {
        self.rate.lock().unwrap().clone()
    }

    /// Record that a rate announcement was queued for the peer.
    pub fn mark_rate_announced(&self, at: Instant, interval: f64) {
        let mut rate = self.rate.lock().unwrap();
        rate.last_sent_at = Some(at);
        rate.last_sent_interval = interval;
    }
}

/// The peer table, shared across all tasks. Keyed on peer identity.
pub type PeerTable = Arc<DashMap<[u8; 32], Arc<Peer>>>;

/// Create a new empty peer table.
pub fn new_peer_table() -> PeerTable {
    Arc::new(DashMap::new())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
