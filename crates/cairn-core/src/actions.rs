//! Collaborator interface between decoded messages and node state.
//!
//! `execute` on a received message calls into this trait; the peer layer
//! supplies the implementation that owns the actual tables (peer registry,
//! trailer demux, rate bookkeeping). Methods are scoped to the connection
//! the message arrived on, so none of them name a peer explicitly.

use std::net::Ipv4Addr;

use bytes::Bytes;

use crate::message::{NodeRef, RateLimitViolation, TrailerChunk};

pub trait NodeActions: Send + Sync {
    /// The peer introduced itself (first message on a new connection).
    fn peer_identified(&self, node: NodeRef, rate_interval: Option<f64>);

    /// The peer said goodbye; the connection will be torn down.
    fn peer_departed(&self);

    /// The peer announced a new minimum request interval, in milliseconds.
    fn rate_interval_updated(&self, interval: f64);

    /// The peer reports the external address it observes our traffic from.
    fn address_detected(&self, address: Ipv4Addr);

    /// Diagnostic: we exceeded the peer's advertised request rate.
    fn rate_limit_violation(&self, report: &RateLimitViolation);

    /// A higher-level application message, opaque at this layer.
    fn application_message(&self, body: Bytes, trailer_id: Option<u16>, is_request: bool);

    /// One chunk of a trailer stream, to be routed to reassembly.
    fn trailer_chunk(&self, chunk: TrailerChunk);

    /// The peer granted us this many further trailer bytes.
    fn trailer_credit(&self, credit: u16);

    /// The peer wants no more chunks for this trailer id.
    fn trailer_kill(&self, trailer_id: u16);
}
