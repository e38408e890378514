//! Control messages across a live link: identify, goodbye, rate
//! announcements, detected addresses, and padding.

use bytes::Bytes;

use cairn_core::frame::{encode_frame, type_code};
use cairn_core::{Identify, NodeRef, PacketMessage, PeerMessage, RateInterval};
use cairn_peer::{PacketSink, SendOutcome};

use crate::{endpoint, pump, DirectLink};

fn node(id_byte: u8, version: u32) -> NodeRef {
    NodeRef {
        identity: [id_byte; 32],
        version,
        addresses: vec!["192.0.2.10:5112".into()],
    }
}

#[test]
fn identify_brings_the_peer_up() {
    let (a, _arx) = endpoint(1);
    let (b, _brx) = endpoint(2);
    let to_b = DirectLink::to(&b);

    a.peer.queue().enqueue(PacketMessage::new(PeerMessage::Identify(Identify {
        node: node(1, 3),
        rate_interval: Some(300.0),
    })));
    assert_eq!(pump(&a, &to_b), 1);

    assert!(b.peer.is_connected());
    assert!(b.peer.version_supported());
    assert_eq!(b.peer.peer_requested_interval(), Some(300.0));
    assert_eq!(b.peer.node_ref().unwrap().identity, [1; 32]);
}

#[test]
fn goodbye_is_most_urgent_and_disconnects_the_remote() {
    let (a, _arx) = endpoint(1);
    let (b, _brx) = endpoint(2);
    let to_b = DirectLink::to(&b);
    b.peer.set_connected(true);

    a.peer.queue().enqueue(PacketMessage::new(PeerMessage::RateInterval(
        RateInterval::new(100.0).unwrap(),
    )));
    a.peer.queue().enqueue(PacketMessage::new(PeerMessage::GoAway));

    // The goodbye jumps the rate message in the queue.
    assert_eq!(
        a.peer.queue().send_next(&to_b),
        SendOutcome::Sent { close_after: true }
    );
    assert!(!b.peer.is_connected());
}

#[test]
fn rate_interval_updates_the_remote_bookkeeping() {
    let (a, _arx) = endpoint(1);
    let (b, _brx) = endpoint(2);
    let to_b = DirectLink::to(&b);

    a.peer.queue().enqueue(PacketMessage::new(PeerMessage::RateInterval(
        RateInterval::new(125.5).unwrap(),
    )));
    pump(&a, &to_b);

    assert_eq!(b.peer.peer_requested_interval(), Some(125.5));
}

#[test]
fn detected_address_is_recorded() {
    let (a, _arx) = endpoint(1);
    let (b, _brx) = endpoint(2);
    let to_b = DirectLink::to(&b);

    a.peer.queue().enqueue(PacketMessage::new(PeerMessage::AddressDetected(
        cairn_core::AddressDetected {
            address: "198.51.100.23".parse().unwrap(),
        },
    )));
    pump(&a, &to_b);

    assert_eq!(
        b.peer.detected_address(),
        Some("198.51.100.23".parse().unwrap())
    );
}

#[test]
fn application_envelope_arrives_with_its_trailer_reference() {
    let (a, _arx) = endpoint(1);
    let (b, mut brx) = endpoint(2);
    let to_b = DirectLink::to(&b);

    a.peer.queue().enqueue(PacketMessage::new(PeerMessage::AppEnvelope(
        cairn_core::AppEnvelope {
            body: Bytes::from_static(b"fetch the thing"),
            trailer_id: Some(12),
            is_request: true,
        },
    )));
    pump(&a, &to_b);

    let msg = brx.try_recv().expect("envelope must be delivered");
    assert_eq!(msg.body, Bytes::from_static(b"fetch the thing"));
    assert_eq!(msg.trailer_id, Some(12));
    assert!(msg.is_request);
}

#[test]
fn padding_and_unknown_frames_change_nothing() {
    let (b, mut brx) = endpoint(2);
    let to_b = DirectLink::to(&b);

    // Raw void padding and a reserved type code straight onto the link.
    to_b.send(encode_frame(type_code::VOID, &[0xA5; 32])).unwrap();
    to_b.send(encode_frame(type_code::TRAILER_ABORT, &[1, 2, 3])).unwrap();
    to_b.send(encode_frame(7, &[])).unwrap();

    assert!(!b.peer.is_connected());
    assert!(brx.try_recv().is_err());
    assert_eq!(b.demux.active_transfers(), 0);
}

#[test]
fn malformed_payload_is_dropped_without_killing_the_link() {
    let (b, _brx) = endpoint(2);
    let to_b = DirectLink::to(&b);
    b.peer.set_connected(true);

    // Truncated rate interval: 4 payload bytes instead of 8.
    to_b.send(encode_frame(type_code::RATE_INTERVAL, &[0; 4])).unwrap();

    assert!(b.peer.is_connected(), "decode failure is non-fatal");
    assert_eq!(b.peer.peer_requested_interval(), None);
}
