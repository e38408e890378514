//! Message type registry and parser.
//!
//! A single immutable table maps each reserved type code to its decoder.
//! The table is built once at process start and only read afterwards, so
//! lookups take no lock. Re-registering a code is a bug in the caller and
//! fails fast.

use std::collections::HashMap;

use bytes::Bytes;

use crate::frame::type_code;
use crate::message::PeerMessage;

/// Decodes one wire payload (header already stripped) into a message.
///
/// The second argument is the copy contract: when true, the caller will
/// reuse the source buffer after the call, so any byte range the decoder
/// retains must be copied out. When false the decoder may keep a slice
/// into the buffer. Violating this corrupts retained payloads; it is a
/// hard precondition, not something the parser can check.
pub type DecoderFn = fn(&Bytes, bool) -> Option<PeerMessage>;

pub struct MessageRegistry {
    decoders: HashMap<u16, DecoderFn>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// The full standard message set.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for code in [
            type_code::IDENTIFY,
            type_code::APP_ENVELOPE,
            type_code::TRAILER_CHUNK,
            type_code::TRAILER_CREDIT,
            type_code::TRAILER_KILL,
            type_code::RATE_LIMIT_VIOLATION,
            type_code::GO_AWAY,
            type_code::ADDRESS_DETECTED,
            type_code::RATE_INTERVAL,
        ] {
            let decoder = PeerMessage::decoder_for(code)
                .unwrap_or_else(|| panic!("no decoder defined for standard type {code}"));
            registry.register(code, decoder);
        }
        registry
    }

    /// Install a decoder. Exactly one decoder may exist per type code;
    /// registering a second is a programming error.
    pub fn register(&mut self, code: u16, decoder: DecoderFn) {
        let previous = self.decoders.insert(code, decoder);
        assert!(
            previous.is_none(),
            "decoder for message type {code} registered twice"
        );
    }

    /// Dispatch a raw payload to the decoder for its type code.
    ///
    /// Returns `None` in three non-fatal cases: padding (consumed
    /// silently), an unknown type code, or a payload the decoder could not
    /// parse. The caller drops the packet in all three.
    pub fn parse(&self, code: u16, payload: &Bytes, needs_copy: bool) -> Option<PeerMessage> {
        if code == type_code::VOID {
            return None;
        }
        let Some(decoder) = self.decoders.get(&code) else {
            tracing::debug!(type_code = code, len = payload.len(), "unknown message type, dropping");
            return None;
        };
        let decoded = decoder(payload, needs_copy);
        if decoded.is_none() {
            tracing::debug!(
                type_code = code,
                len = payload.len(),
                "payload failed to decode, dropping"
            );
        }
        decoded
    }
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
