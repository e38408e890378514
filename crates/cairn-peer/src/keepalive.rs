//! Keepalive and rate-announcement scheduling.
//!
//! A single background task covers every peer: each cycle it shuffles a
//! snapshot of the peer table, walks it in batches with a jittered pause
//! before each batch, and queues a rate announcement where one is due.
//! Idle links get probed so they stay alive; busy links only hear about
//! meaningful interval changes. Every cycle also sweeps expired messages
//! out of the outbound queues.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::broadcast;

use cairn_core::{PacketMessage, PeerMessage, RateInterval};

use crate::config::KeepaliveConfig;
use crate::peers::{Peer, PeerTable};

/// Minimum gap between rate announcements to one peer.
pub const RATE_COOLDOWN: Duration = Duration::from_secs(5);

/// A link silent for longer than this gets a forced announcement so the
/// peer knows we are alive.
pub const IDLE_PROBE_AFTER: Duration = Duration::from_secs(60);

/// Relative interval change below which an announcement is not worth the
/// bytes while the link is busy.
pub const RATE_DELTA_THRESHOLD: f64 = 0.10;

/// Queued rate announcements go stale quickly; no point sending one that
/// sat longer than two cooldowns.
const ANNOUNCE_MAX_AGE_MILLIS: i64 = 10_000;

/// Everything the per-peer decision needs, captured at one instant.
#[derive(Debug, Clone)]
pub struct RateProbe {
    pub connected: bool,
    pub version_supported: bool,
    pub last_announce: Option<Instant>,
    pub idle_for: Duration,
    pub rate_message_queued: bool,
    pub last_announced_interval: f64,
    pub current_interval: f64,
}

impl RateProbe {
    fn capture(peer: &Peer, now: Instant) -> Self {
        let rate = peer.rate_signal();
        Self {
            connected: peer.is_connected(),
            version_supported: peer.version_supported(),
            last_announce: rate.last_sent_at,
            idle_for: peer.idle_for(now),
            rate_message_queued: peer.queue().has_rate_message(),
            last_announced_interval: rate.last_sent_interval,
            current_interval: rate.current_interval,
        }
    }
}

/// The per-peer decision, pure over the snapshot.
///
/// An idle link is probed regardless of the interval delta; a busy link
/// is only told about changes above the threshold, and never while an
/// announcement is already queued or inside the cool-down.
pub fn should_announce(probe: &RateProbe, now: Instant) -> bool {
    if !probe.connected || !probe.version_supported {
        return false;
    }
    if let Some(at) = probe.last_announce {
        if now.saturating_duration_since(at) < RATE_COOLDOWN {
            return false;
        }
    }
    if probe.idle_for > IDLE_PROBE_AFTER {
        return true;
    }
    if probe.rate_message_queued {
        return false;
    }
    relative_change(probe.last_announced_interval, probe.current_interval) > RATE_DELTA_THRESHOLD
}

fn relative_change(old: f64, new: f64) -> f64 {
    if old == 0.0 {
        if new == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        ((new - old) / old).abs()
    }
}

/// Queue an announcement for one peer if the decision says so.
fn announce_if_due(peer: &Arc<Peer>, now: Instant) {
    let probe = RateProbe::capture(peer, now);
    if !should_announce(&probe, now) {
        return;
    }
    let interval = probe.current_interval;
    match RateInterval::new(interval) {
        Ok(msg) => {
            peer.queue().enqueue(
                PacketMessage::new(PeerMessage::RateInterval(msg))
                    .with_max_age(ANNOUNCE_MAX_AGE_MILLIS),
            );
            peer.mark_rate_announced(now, interval);
            tracing::debug!(
                peer = hex::encode(&peer.identity()[..8]),
                interval,
                idle_secs = probe.idle_for.as_secs(),
                "rate announcement queued"
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, "refusing to announce a bad interval");
        }
    }
}

/// Run the scheduler until shutdown. One instance per node, not per peer.
pub async fn rate_keeper_loop(
    peers: PeerTable,
    cfg: KeepaliveConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    loop {
        // Maintenance: expired outbound messages get dropped every cycle.
        for entry in peers.iter() {
            entry.value().queue().sweep_expired(Instant::now());
        }

        let mut snapshot: Vec<Arc<Peer>> = peers.iter().map(|e| e.value().clone()).collect();
        snapshot.shuffle(&mut rand::thread_rng());

        let batches = cfg.batches.max(1);
        let batch_len = (snapshot.len() + batches - 1) / batches;

        for batch in snapshot.chunks(batch_len.max(1)) {
            if pause(&cfg, &mut shutdown).await {
                tracing::info!("rate keeper shutting down");
                return Ok(());
            }
            let now = Instant::now();
            for peer in batch {
                announce_if_due(peer, now);
            }
        }

        if snapshot.is_empty() {
            // Nothing to walk; still pace the loop.
            if pause(&cfg, &mut shutdown).await {
                tracing::info!("rate keeper shutting down");
                return Ok(());
            }
        }
    }
}

/// Sleep a jittered batch delay. Returns true on shutdown.
async fn pause(cfg: &KeepaliveConfig, shutdown: &mut broadcast::Receiver<()>) -> bool {
    let span_ms = rand::thread_rng().gen_range(cfg.batch_delay_min_ms..=cfg.batch_delay_max_ms);
    tokio::select! {
        _ = shutdown.recv() => true,
        _ = tokio::time::sleep(Duration::from_millis(span_ms)) => false,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
