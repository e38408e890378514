//! Trailer multiplexing.
//!
//! Large payloads travel out-of-band as numbered chunk streams riding the
//! same link as control messages. This module reassembles arriving chunks
//! into ordered byte streams (one per trailer id), terminates transfers,
//! and frames the outbound direction under the credit window.

mod demux;
mod reader;
mod reassembly;
mod sender;

pub use demux::TrailerDemux;
pub use reader::{BlockingTrailerReader, READ_TIMEOUT};
pub use reassembly::{TrailerConsumer, TrailerReassembly};
pub use sender::{TrailerSender, TrailerSenders, CHUNK_DATA_MAX};

/// Errors surfaced by the trailer layer.
#[derive(Debug, thiserror::Error)]
pub enum TrailerError {
    #[error("trailer {0} already has an active transfer")]
    DuplicateTrailer(u16),

    #[error("trailer {trailer_id} read timed out; transfer killed")]
    ReadTimeout { trailer_id: u16 },

    #[error("trailer {0} was killed by the peer")]
    Killed(u16),

    #[error("trailer {trailer_id} would exceed the wire offset range at {offset}")]
    TransferTooLarge { trailer_id: u16, offset: u64 },
}
