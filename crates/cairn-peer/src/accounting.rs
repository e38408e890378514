//! Per-connection transfer accounting.
//!
//! Monotonic totals plus live queue-residency gauges, all atomic so the
//! send path, receive path, and status reporting never contend on a lock.
//! Queue gauges move in increment/decrement pairs around residency.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TransferCounters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    send_queue_bytes: AtomicU64,
    recv_queue_bytes: AtomicU64,
}

impl TransferCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record bytes that actually left on the wire.
    pub fn record_sent(&self, n: usize) {
        self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Record bytes that arrived from the wire.
    pub fn record_received(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// A message entered the outbound queue.
    pub fn send_queue_add(&self, n: usize) {
        self.send_queue_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// A message left the outbound queue (sent, expired, or dropped).
    pub fn send_queue_sub(&self, n: usize) {
        self.send_queue_bytes.fetch_sub(n as u64, Ordering::Relaxed);
    }

    /// Bytes entered the receive-side buffering.
    pub fn recv_queue_add(&self, n: usize) {
        self.recv_queue_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Bytes handed out of the receive-side buffering.
    pub fn recv_queue_sub(&self, n: usize) {
        self.recv_queue_bytes.fetch_sub(n as u64, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn send_queue_bytes(&self) -> u64 {
        self.send_queue_bytes.load(Ordering::Relaxed)
    }

    pub fn recv_queue_bytes(&self) -> u64 {
        self.recv_queue_bytes.load(Ordering::Relaxed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
