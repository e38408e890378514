//! cairn-core: wire framing, the packet message set, and the decoder
//! registry. All other cairn crates depend on this one.

pub mod actions;
pub mod frame;
pub mod message;
pub mod registry;

pub use actions::NodeActions;
pub use message::{
    AddressDetected, AppEnvelope, FailureAction, Identify, MessageError, NodeRef, PacketMessage,
    PeerMessage, Presentation, Priority, PriorityClass, RateInterval, RateLimitViolation,
    TrailerChunk, TrailerCredit, TrailerKill, Void,
};
pub use registry::MessageRegistry;
