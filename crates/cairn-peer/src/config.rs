//! Configuration for the peer link layer.
//!
//! Wire-format constants are not configurable and live next to the types
//! they describe; these knobs only pace background work and resource
//! limits. All fields have serving defaults so an empty config is valid.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub keepalive: KeepaliveConfig,
    pub trailer: TrailerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// How many batches one sweep of the peer table is split into.
    pub batches: usize,
    /// Jitter window slept before each batch, milliseconds.
    pub batch_delay_min_ms: u64,
    pub batch_delay_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailerConfig {
    /// Blocking-read stall timeout, seconds.
    pub read_timeout_secs: u64,
    /// Credit window granted to a peer when its connection opens.
    pub initial_credit: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            keepalive: KeepaliveConfig::default(),
            trailer: TrailerConfig::default(),
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            batches: 5,
            batch_delay_min_ms: 750,
            batch_delay_max_ms: 1250,
        }
    }
}

impl Default for TrailerConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: 300,
            initial_credit: 65536,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
