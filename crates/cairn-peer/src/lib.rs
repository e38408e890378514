//! cairn-peer: the per-peer link layer.
//!
//! Sits on top of cairn-core's message set: trailer reassembly and flow
//! control, the per-peer outbound queue, the keepalive/rate scheduler,
//! and transfer accounting. The transport below and the request router
//! above are collaborators reached through traits and channels.

pub mod accounting;
pub mod config;
pub mod dispatch;
pub mod flow;
pub mod keepalive;
pub mod peers;
pub mod queue;
pub mod trailer;

pub use accounting::TransferCounters;
pub use config::{KeepaliveConfig, LinkConfig, TrailerConfig};
pub use dispatch::{AppMessage, ConnectionDispatch};
pub use flow::{CreditLedger, CreditReturn};
pub use keepalive::{rate_keeper_loop, should_announce, RateProbe};
pub use peers::{new_peer_table, Peer, PeerTable, RateSignal};
pub use queue::{OutboundQueue, PacketSink, SendOutcome};
pub use trailer::{
    BlockingTrailerReader, TrailerConsumer, TrailerDemux, TrailerError, TrailerReassembly,
    TrailerSender, TrailerSenders,
};
