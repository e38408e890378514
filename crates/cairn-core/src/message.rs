//! The low-level packet message set.
//!
//! Every small control message that travels on a peer link is one of the
//! variants here. A variant knows its reserved type code, how to render its
//! wire payload, its outbound scheduling priority, and the effect it applies
//! to node state when received. Large payloads never ride in these messages;
//! they are transferred out-of-band as trailer chunk streams and only
//! referenced from here.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::actions::NodeActions;
use crate::frame::{self, type_code};

/// Negotiated on-wire presentation for a connection.
///
/// Legacy links predate the trailer flow-control and rate-announcement
/// messages; resolving one of those for a Legacy link is an error and the
/// message is dropped rather than sent in a frame the peer cannot parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    Legacy,
    Standard,
}

/// Coarse scheduling class for outbound messages. Lower is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PriorityClass {
    High = 0,
    Normal = 1,
    Low = 2,
}

/// Full ordering key for the outbound queue: coarse class, then a fine
/// delta within it. Lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority {
    pub class: PriorityClass,
    pub delta: i8,
}

impl Priority {
    pub fn normal(delta: i8) -> Self {
        Self {
            class: PriorityClass::Normal,
            delta,
        }
    }

    /// Tuple form used as a queue sort key.
    pub fn sort_key(&self) -> (u8, i8) {
        (self.class as u8, self.delta)
    }
}

/// Errors raised when constructing or resolving a message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    #[error("message type {type_code} not expressible in {presentation:?} presentation")]
    UnsupportedPresentation {
        type_code: u16,
        presentation: Presentation,
    },

    #[error("rate interval {0} is not a finite number")]
    NonFiniteInterval(f64),

    #[error("credit {0} exceeds the 16-bit wire field")]
    CreditOutOfRange(u32),

    #[error("chunk offset {0:#x} exceeds the 24-bit wire range")]
    OffsetOutOfRange(u32),
}

// ── Node reference ────────────────────────────────────────────────────────────

/// The key-value fields a node announces about itself in an Identify
/// message: stable identity, software version, and reachable addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    /// Stable 32-byte identity, hex on the wire.
    #[serde(with = "hex_identity")]
    pub identity: [u8; 32],
    /// Advertised protocol version.
    pub version: u32,
    /// Reachable transport addresses, as printable strings.
    pub addresses: Vec<String>,
}

mod hex_identity {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(id))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        let raw = hex::decode(&text).map_err(serde::de::Error::custom)?;
        raw.try_into()
            .map_err(|_| serde::de::Error::custom("identity must be 32 bytes"))
    }
}

// ── Variants ──────────────────────────────────────────────────────────────────

/// Sent once per new connection: who we are, plus an optional initial
/// request-rate interval so the peer can throttle immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identify {
    pub node: NodeRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_interval: Option<f64>,
}

impl Identify {
    fn decode(payload: &Bytes, _needs_copy: bool) -> Option<PeerMessage> {
        let id: Identify = serde_json::from_slice(payload).ok()?;
        if let Some(v) = id.rate_interval {
            if !v.is_finite() {
                return None;
            }
        }
        Some(PeerMessage::Identify(id))
    }
}

/// Envelope for a higher-level application message. The body is opaque to
/// this layer; the envelope records whether a trailer stream follows and
/// which mux id carries it.
#[derive(Debug, Clone, PartialEq)]
pub struct AppEnvelope {
    pub body: Bytes,
    pub trailer_id: Option<u16>,
    pub is_request: bool,
}

const ENVELOPE_FLAG_TRAILER: u8 = 0b0000_0001;
const ENVELOPE_FLAG_REQUEST: u8 = 0b0000_0010;

impl AppEnvelope {
    fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(3 + self.body.len());
        let mut flags = 0u8;
        if self.trailer_id.is_some() {
            flags |= ENVELOPE_FLAG_TRAILER;
        }
        if self.is_request {
            flags |= ENVELOPE_FLAG_REQUEST;
        }
        out.put_u8(flags);
        if let Some(id) = self.trailer_id {
            out.put_u16(id);
        }
        out.put_slice(&self.body);
        out.freeze()
    }

    fn decode(payload: &Bytes, needs_copy: bool) -> Option<PeerMessage> {
        let flags = *payload.first()?;
        let has_trailer = flags & ENVELOPE_FLAG_TRAILER != 0;
        let body_start = if has_trailer { 3 } else { 1 };
        if payload.len() < body_start {
            return None;
        }
        let trailer_id = if has_trailer {
            Some(u16::from_be_bytes([payload[1], payload[2]]))
        } else {
            None
        };
        let body = if needs_copy {
            Bytes::copy_from_slice(&payload[body_start..])
        } else {
            payload.slice(body_start..)
        };
        Some(PeerMessage::AppEnvelope(AppEnvelope {
            body,
            trailer_id,
            is_request: flags & ENVELOPE_FLAG_REQUEST != 0,
        }))
    }
}

/// One fragment of a trailer stream: which transfer it belongs to and
/// where its bytes land in the logical stream.
///
/// Chunks are decoded from the network and fed to the reassembly engine;
/// the outbound side frames them directly rather than going through the
/// resolve/queue path, so they never sit in an outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailerChunk {
    pub trailer_id: u16,
    pub offset: u32,
    pub data: Bytes,
}

/// The wire offset field is 4 bytes with the top byte always zero.
pub const MAX_CHUNK_OFFSET: u32 = 0x00FF_FFFF;

impl TrailerChunk {
    pub fn new(trailer_id: u16, offset: u32, data: Bytes) -> Result<Self, MessageError> {
        if offset > MAX_CHUNK_OFFSET {
            return Err(MessageError::OffsetOutOfRange(offset));
        }
        Ok(Self {
            trailer_id,
            offset,
            data,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(6 + self.data.len());
        out.put_u16(self.trailer_id);
        out.put_u32(self.offset);
        out.put_slice(&self.data);
        out.freeze()
    }

    fn decode(payload: &Bytes, needs_copy: bool) -> Option<PeerMessage> {
        if payload.len() < 6 {
            return None;
        }
        let trailer_id = u16::from_be_bytes([payload[0], payload[1]]);
        let offset = u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]);
        let data = if needs_copy {
            Bytes::copy_from_slice(&payload[6..])
        } else {
            payload.slice(6..)
        };
        Some(PeerMessage::TrailerChunk(TrailerChunk {
            trailer_id,
            offset,
            data,
        }))
    }
}

/// Grants the peer permission to send this many further trailer bytes on
/// the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailerCredit {
    credit: u16,
}

impl TrailerCredit {
    pub fn new(credit: u32) -> Result<Self, MessageError> {
        let credit = u16::try_from(credit).map_err(|_| MessageError::CreditOutOfRange(credit))?;
        Ok(Self { credit })
    }

    pub fn credit(&self) -> u16 {
        self.credit
    }

    /// Fold another grant into this one if the sum still fits the wire
    /// field. Used by the outbound queue to coalesce queued credits.
    pub fn merge(&mut self, extra: u16) -> bool {
        match self.credit.checked_add(extra) {
            Some(sum) => {
                self.credit = sum;
                true
            }
            None => false,
        }
    }

    fn decode(payload: &Bytes, _needs_copy: bool) -> Option<PeerMessage> {
        if payload.len() < 2 {
            return None;
        }
        Some(PeerMessage::TrailerCredit(TrailerCredit {
            credit: u16::from_be_bytes([payload[0], payload[1]]),
        }))
    }
}

/// Tells the peer to stop transmitting chunks for a trailer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailerKill {
    pub trailer_id: u16,
}

impl TrailerKill {
    fn decode(payload: &Bytes, _needs_copy: bool) -> Option<PeerMessage> {
        if payload.len() < 2 {
            return None;
        }
        Some(PeerMessage::TrailerKill(TrailerKill {
            trailer_id: u16::from_be_bytes([payload[0], payload[1]]),
        }))
    }
}

/// Random padding used to fill a packet out to a target size. Carries no
/// meaning; the parser swallows it without producing a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Void {
    pub data: Bytes,
}

impl Void {
    /// Padding of the given length with random bytes.
    pub fn padding(len: usize) -> Self {
        let mut data = vec![0u8; len];
        rand::Rng::fill(&mut rand::thread_rng(), data.as_mut_slice());
        Self { data: data.into() }
    }
}

/// Diagnostic report that the peer exceeded our advertised request rate.
/// Informational only; nothing retries it and receipt changes no state
/// beyond bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitViolation {
    /// How many requests arrived inside the advertised interval.
    pub violation_count: u64,
    /// The interval we had announced, in milliseconds.
    pub requested_interval: f64,
    /// The interval actually observed between the peer's requests.
    pub observed_interval: f64,
    /// How far over budget the peer is, in request-intervals.
    pub excess: f64,
}

impl RateLimitViolation {
    fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(32);
        out.put_u64(self.violation_count);
        out.put_u64(self.requested_interval.to_bits());
        out.put_u64(self.observed_interval.to_bits());
        out.put_u64(self.excess.to_bits());
        out.freeze()
    }

    fn decode(payload: &Bytes, _needs_copy: bool) -> Option<PeerMessage> {
        if payload.len() < 32 {
            return None;
        }
        let word = |i: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&payload[i..i + 8]);
            u64::from_be_bytes(buf)
        };
        Some(PeerMessage::RateLimitViolation(RateLimitViolation {
            violation_count: word(0),
            requested_interval: f64::from_bits(word(8)),
            observed_interval: f64::from_bits(word(16)),
            excess: f64::from_bits(word(24)),
        }))
    }
}

/// Tells the peer which address we observed its traffic arriving from, so
/// a node behind NAT can learn its external address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressDetected {
    pub address: Ipv4Addr,
}

impl AddressDetected {
    fn decode(payload: &Bytes, _needs_copy: bool) -> Option<PeerMessage> {
        serde_json::from_slice(payload)
            .ok()
            .map(PeerMessage::AddressDetected)
    }
}

/// Announces the minimum interval, in milliseconds, this node asks the
/// peer to leave between requests. Fixed 12-byte frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateInterval {
    interval: f64,
}

impl RateInterval {
    pub fn new(interval: f64) -> Result<Self, MessageError> {
        if !interval.is_finite() {
            return Err(MessageError::NonFiniteInterval(interval));
        }
        Ok(Self { interval })
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&self.interval.to_bits().to_be_bytes())
    }

    fn decode(payload: &Bytes, _needs_copy: bool) -> Option<PeerMessage> {
        if payload.len() < 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&payload[..8]);
        let interval = f64::from_bits(u64::from_be_bytes(buf));
        if !interval.is_finite() {
            return None;
        }
        Some(PeerMessage::RateInterval(RateInterval { interval }))
    }
}

// ── The message union ─────────────────────────────────────────────────────────

/// Tagged union of every packet message variant.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    Identify(Identify),
    AppEnvelope(AppEnvelope),
    TrailerChunk(TrailerChunk),
    TrailerCredit(TrailerCredit),
    Void(Void),
    TrailerKill(TrailerKill),
    RateLimitViolation(RateLimitViolation),
    GoAway,
    AddressDetected(AddressDetected),
    RateInterval(RateInterval),
}

impl PeerMessage {
    pub fn type_code(&self) -> u16 {
        match self {
            PeerMessage::Identify(_) => type_code::IDENTIFY,
            PeerMessage::AppEnvelope(_) => type_code::APP_ENVELOPE,
            PeerMessage::TrailerChunk(_) => type_code::TRAILER_CHUNK,
            PeerMessage::TrailerCredit(_) => type_code::TRAILER_CREDIT,
            PeerMessage::Void(_) => type_code::VOID,
            PeerMessage::TrailerKill(_) => type_code::TRAILER_KILL,
            PeerMessage::RateLimitViolation(_) => type_code::RATE_LIMIT_VIOLATION,
            PeerMessage::GoAway => type_code::GO_AWAY,
            PeerMessage::AddressDetected(_) => type_code::ADDRESS_DETECTED,
            PeerMessage::RateInterval(_) => type_code::RATE_INTERVAL,
        }
    }

    /// Wire payload (everything after the 4-byte header).
    pub fn payload_bytes(&self) -> Bytes {
        match self {
            PeerMessage::Identify(id) => {
                serde_json::to_vec(id).expect("identify serialization failed").into()
            }
            PeerMessage::AppEnvelope(e) => e.encode(),
            PeerMessage::TrailerChunk(c) => c.encode(),
            PeerMessage::TrailerCredit(c) => {
                Bytes::copy_from_slice(&c.credit.to_be_bytes())
            }
            PeerMessage::Void(v) => v.data.clone(),
            PeerMessage::TrailerKill(k) => {
                Bytes::copy_from_slice(&k.trailer_id.to_be_bytes())
            }
            PeerMessage::RateLimitViolation(v) => v.encode(),
            PeerMessage::GoAway => Bytes::new(),
            PeerMessage::AddressDetected(a) => {
                serde_json::to_vec(a).expect("address serialization failed").into()
            }
            PeerMessage::RateInterval(r) => r.encode(),
        }
    }

    /// Whether this variant can be rendered for the given presentation.
    /// Legacy links predate trailer flow control and rate announcements.
    pub fn supported_in(&self, presentation: Presentation) -> bool {
        match presentation {
            Presentation::Standard => true,
            Presentation::Legacy => !matches!(
                self,
                PeerMessage::TrailerCredit(_)
                    | PeerMessage::TrailerKill(_)
                    | PeerMessage::RateInterval(_)
            ),
        }
    }

    pub fn priority(&self) -> Priority {
        let delta = match self {
            PeerMessage::GoAway => -100,
            PeerMessage::TrailerCredit(_) | PeerMessage::TrailerKill(_) => -20,
            _ => 0,
        };
        Priority::normal(delta)
    }

    /// True only for the goodbye message; the connection is torn down
    /// after it is sent or received.
    pub fn is_close(&self) -> bool {
        matches!(self, PeerMessage::GoAway)
    }

    pub fn carries_rate_interval(&self) -> bool {
        self.rate_interval().is_some()
    }

    pub fn rate_interval(&self) -> Option<f64> {
        match self {
            PeerMessage::RateInterval(r) => Some(r.interval()),
            PeerMessage::Identify(id) => id.rate_interval,
            _ => None,
        }
    }

    /// The trailer mux id this message refers to, if any.
    pub fn trailer_id(&self) -> Option<u16> {
        match self {
            PeerMessage::AppEnvelope(e) => e.trailer_id,
            PeerMessage::TrailerChunk(c) => Some(c.trailer_id),
            PeerMessage::TrailerKill(k) => Some(k.trailer_id),
            _ => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, PeerMessage::AppEnvelope(e) if e.is_request)
    }

    /// Apply this message's effect to node state. Consumes the message;
    /// a received instance is executed at most once.
    pub fn execute(self, actions: &dyn NodeActions) {
        match self {
            PeerMessage::Identify(id) => actions.peer_identified(id.node, id.rate_interval),
            PeerMessage::AppEnvelope(e) => {
                actions.application_message(e.body, e.trailer_id, e.is_request)
            }
            PeerMessage::TrailerChunk(c) => actions.trailer_chunk(c),
            PeerMessage::TrailerCredit(c) => actions.trailer_credit(c.credit()),
            PeerMessage::TrailerKill(k) => actions.trailer_kill(k.trailer_id),
            PeerMessage::RateLimitViolation(v) => actions.rate_limit_violation(&v),
            PeerMessage::GoAway => {
                tracing::info!("peer said goodbye");
                actions.peer_departed();
            }
            PeerMessage::AddressDetected(a) => actions.address_detected(a.address),
            PeerMessage::RateInterval(r) => actions.rate_interval_updated(r.interval()),
            // Padding never reaches execute through the parser.
            PeerMessage::Void(_) => {}
        }
    }

    pub(crate) fn decoder_for(code: u16) -> Option<crate::registry::DecoderFn> {
        match code {
            type_code::IDENTIFY => Some(Identify::decode),
            type_code::APP_ENVELOPE => Some(AppEnvelope::decode),
            type_code::TRAILER_CHUNK => Some(TrailerChunk::decode),
            type_code::TRAILER_CREDIT => Some(TrailerCredit::decode),
            type_code::TRAILER_KILL => Some(TrailerKill::decode),
            type_code::RATE_LIMIT_VIOLATION => Some(RateLimitViolation::decode),
            type_code::GO_AWAY => Some(decode_go_away),
            type_code::ADDRESS_DETECTED => Some(AddressDetected::decode),
            type_code::RATE_INTERVAL => Some(RateInterval::decode),
            _ => None,
        }
    }
}

/// Goodbye carries no payload; any trailing bytes are ignored.
fn decode_go_away(_payload: &Bytes, _needs_copy: bool) -> Option<PeerMessage> {
    Some(PeerMessage::GoAway)
}

// ── Outbound packet ───────────────────────────────────────────────────────────

/// What the outbound queue should do after a failed send attempt.
#[derive(Debug)]
pub enum FailureAction {
    /// Log and forget; most variants are fire-and-forget.
    Drop,
    /// Re-enqueue with a fresh creation time (credit messages do this so a
    /// queued grant is not lost to expiry).
    Requeue(PacketMessage),
    /// The message was essential to the link; tear the connection down.
    CloseConnection,
}

/// An outbound packet: a message variant plus queue bookkeeping.
///
/// Owned exclusively by the per-peer outbound queue until sent or expired.
/// Length is always derived from the rendered frame, never computed
/// separately, so `length() == content().len()` holds by construction.
#[derive(Debug, Clone)]
pub struct PacketMessage {
    msg: PeerMessage,
    created: Instant,
    max_age: Option<Duration>,
    cached: Option<(Presentation, Bytes)>,
}

impl PacketMessage {
    pub fn new(msg: PeerMessage) -> Self {
        Self {
            msg,
            created: Instant::now(),
            max_age: None,
            cached: None,
        }
    }

    /// Set a maximum queue age in milliseconds. A requested age of zero or
    /// below means the message never expires.
    pub fn with_max_age(mut self, max_age_millis: i64) -> Self {
        self.max_age = if max_age_millis <= 0 {
            None
        } else {
            Some(Duration::from_millis(max_age_millis as u64))
        };
        self
    }

    /// Validate and cache the wire rendering for a presentation.
    ///
    /// With `only_if_needed`, an existing cached rendering for the same
    /// presentation is reused untouched.
    pub fn resolve(
        &mut self,
        presentation: Presentation,
        only_if_needed: bool,
    ) -> Result<(), MessageError> {
        if only_if_needed {
            if let Some((cached_for, _)) = &self.cached {
                if *cached_for == presentation {
                    return Ok(());
                }
            }
        }
        if !self.msg.supported_in(presentation) {
            return Err(MessageError::UnsupportedPresentation {
                type_code: self.msg.type_code(),
                presentation,
            });
        }
        let frame = frame::encode_frame(self.msg.type_code(), &self.msg.payload_bytes());
        self.cached = Some((presentation, frame));
        Ok(())
    }

    /// Full wire bytes including the header. Deterministic for a given
    /// message; uses the cached rendering when one exists.
    pub fn content(&self) -> Bytes {
        match &self.cached {
            Some((_, frame)) => frame.clone(),
            None => frame::encode_frame(self.msg.type_code(), &self.msg.payload_bytes()),
        }
    }

    pub fn length(&self) -> usize {
        self.content().len()
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    /// Restart the expiry clock. Credit messages do this when they
    /// resubmit themselves after a failed send.
    pub fn reset_created(&mut self) {
        self.created = Instant::now();
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.max_age.map(|age| self.created + age)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at(), Some(at) if at <= now)
    }

    pub fn msg(&self) -> &PeerMessage {
        &self.msg
    }

    /// Mutable access to the variant. Drops any cached rendering, since
    /// the bytes no longer describe the message.
    pub fn msg_mut(&mut self) -> &mut PeerMessage {
        self.cached = None;
        &mut self.msg
    }

    pub fn into_msg(self) -> PeerMessage {
        self.msg
    }

    pub fn priority(&self) -> Priority {
        self.msg.priority()
    }

    /// Called exactly once after a send attempt succeeds.
    pub fn notify_success(&self) {
        tracing::trace!(type_code = self.msg.type_code(), "packet sent");
    }

    /// Called exactly once after a send attempt fails (or the message
    /// expired unsent). Returns the per-variant recovery policy.
    pub fn notify_failure(mut self, error: &dyn fmt::Display) -> FailureAction {
        match &self.msg {
            PeerMessage::TrailerCredit(c) => {
                tracing::warn!(
                    credit = c.credit(),
                    error = %error,
                    "credit send failed, resubmitting"
                );
                self.reset_created();
                FailureAction::Requeue(self)
            }
            PeerMessage::Identify(_) => {
                tracing::warn!(error = %error, "identify send failed, closing link");
                FailureAction::CloseConnection
            }
            PeerMessage::TrailerKill(k) => {
                // The link is usually already failing when a kill cannot be
                // sent; one shot only.
                tracing::debug!(
                    trailer_id = k.trailer_id,
                    error = %error,
                    "kill send failed, not retried"
                );
                FailureAction::Drop
            }
            other => {
                tracing::debug!(
                    type_code = other.type_code(),
                    error = %error,
                    "packet send failed, dropping"
                );
                FailureAction::Drop
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
