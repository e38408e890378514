//! End-to-end trailer transfers: chunk streams, credit flow, kills, and
//! desync teardown across two endpoints.

use std::time::Duration;

use bytes::Bytes;

use cairn_core::frame::{encode_frame, type_code};
use cairn_core::TrailerChunk;
use cairn_peer::{BlockingTrailerReader, PacketSink, TrailerError, TrailerSender};

use crate::{endpoint, pump, DirectLink};

#[test]
fn stream_flows_sender_to_reader_with_credit_coming_back() {
    let (a, _arx) = endpoint(1);
    let (b, _brx) = endpoint(2);
    let to_b = DirectLink::to(&b);
    let to_a = DirectLink::to(&a);

    // B prepares to receive trailer 3 and grants an opening window.
    let mut reader = BlockingTrailerReader::open(&b.demux, 3).unwrap();
    b.peer.queue().enqueue(cairn_core::PacketMessage::new(
        cairn_core::PeerMessage::TrailerCredit(cairn_core::TrailerCredit::new(1024).unwrap()),
    ));
    pump(&b, &to_a);
    assert_eq!(a.ledger.available(), 1024);

    // A streams two pieces.
    let mut sender = TrailerSender::begin(&a.senders, 3, a.ledger.clone(), a.peer.counters().clone())
        .unwrap();
    assert_eq!(sender.write(&to_b, b"ABCD").unwrap(), 4);
    assert_eq!(sender.write(&to_b, b"EFG").unwrap(), 3);
    assert_eq!(a.ledger.available(), 1024 - 7);

    // B reads them in order.
    assert_eq!(reader.read_next().unwrap().as_deref(), Some(&b"ABCD"[..]));
    assert_eq!(reader.read_next().unwrap().as_deref(), Some(&b"EFG"[..]));

    // Consumed bytes flow back as credit.
    pump(&b, &to_a);
    assert_eq!(a.ledger.available(), 1024);

    sender.finish();
    reader.close(false);
    assert_eq!(b.demux.active_transfers(), 0);
}

#[test]
fn sender_pauses_when_the_window_runs_dry() {
    let (a, _arx) = endpoint(1);
    let (b, _brx) = endpoint(2);
    let to_b = DirectLink::to(&b);
    let to_a = DirectLink::to(&a);

    let mut reader = BlockingTrailerReader::open(&b.demux, 1).unwrap();
    b.peer.queue().enqueue(cairn_core::PacketMessage::new(
        cairn_core::PeerMessage::TrailerCredit(cairn_core::TrailerCredit::new(4).unwrap()),
    ));
    pump(&b, &to_a);

    let mut sender = TrailerSender::begin(&a.senders, 1, a.ledger.clone(), a.peer.counters().clone())
        .unwrap();

    // Only the first 4 bytes fit the window; nothing more leaves.
    assert_eq!(sender.write(&to_b, b"ABCD").unwrap(), 4);
    assert_eq!(sender.write(&to_b, b"EFGH").unwrap(), 0);

    // Reading the delivered piece releases window for the rest.
    assert_eq!(reader.read_next().unwrap().as_deref(), Some(&b"ABCD"[..]));
    pump(&b, &to_a);
    assert_eq!(sender.write(&to_b, b"EFGH").unwrap(), 4);
    assert_eq!(reader.read_next().unwrap().as_deref(), Some(&b"EFGH"[..]));
}

#[test]
fn reader_kill_stops_the_remote_sender() {
    let (a, _arx) = endpoint(1);
    let (b, _brx) = endpoint(2);
    let to_b = DirectLink::to(&b);
    let to_a = DirectLink::to(&a);

    let mut reader = BlockingTrailerReader::open(&b.demux, 9).unwrap();
    let mut sender = TrailerSender::begin(&a.senders, 9, a.ledger.clone(), a.peer.counters().clone())
        .unwrap();
    a.ledger.grant(1024);

    // B abandons the transfer and asks A to stop.
    reader.close(true);
    pump(&b, &to_a);

    let err = sender.write(&to_b, b"ABCD").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TrailerError>(),
        Some(TrailerError::Killed(9))
    ));
    assert_eq!(a.senders.active_count(), 0);
}

#[test]
fn out_of_order_arrival_tears_down_the_transfer_and_kills_the_sender() {
    let (a, _arx) = endpoint(1);
    let (b, _brx) = endpoint(2);
    let to_b = DirectLink::to(&b);
    let to_a = DirectLink::to(&a);

    let mut reader = BlockingTrailerReader::open(&b.demux, 5).unwrap();
    let sender = TrailerSender::begin(&a.senders, 5, a.ledger.clone(), a.peer.counters().clone())
        .unwrap();

    // Forge a chunk starting at offset 4 while B still expects offset 0.
    let rogue = TrailerChunk::new(5, 4, Bytes::from_static(b"EFG")).unwrap();
    to_b.send(encode_frame(type_code::TRAILER_CHUNK, &rogue.encode()))
        .unwrap();

    // Nothing outstanding yet: the gap shows when the reader asks.
    assert_eq!(reader.read_next().unwrap(), None, "desync closes the stream");
    assert_eq!(b.demux.active_transfers(), 0);

    // The kill reaches A and stops its sender.
    pump(&b, &to_a);
    assert_eq!(a.senders.active_count(), 0);
    drop(sender);

    // Later chunks for the dead trailer come back as credit, not data.
    let late = TrailerChunk::new(5, 0, Bytes::from_static(b"ABCD")).unwrap();
    to_b.send(encode_frame(type_code::TRAILER_CHUNK, &late.encode()))
        .unwrap();
    let granted = pump(&b, &to_a);
    assert!(granted >= 1, "discarded chunk bytes must be re-credited");
}

#[test]
fn stalled_reader_times_out_and_kills() {
    let (a, _arx) = endpoint(1);
    let (b, _brx) = endpoint(2);
    let to_a = DirectLink::to(&a);

    let mut reader =
        BlockingTrailerReader::open_with_timeout(&b.demux, 2, Duration::from_millis(30)).unwrap();
    let _sender = TrailerSender::begin(&a.senders, 2, a.ledger.clone(), a.peer.counters().clone())
        .unwrap();

    match reader.read_next() {
        Err(TrailerError::ReadTimeout { trailer_id: 2 }) => {}
        other => panic!("expected a timeout, got {other:?}"),
    }

    pump(&b, &to_a);
    assert_eq!(a.senders.active_count(), 0, "timeout kill reaches the sender");
}
