//! The keepalive/rate scheduler against a live peer table.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use cairn_core::{PacketMessage, PeerMessage, Presentation};
use cairn_peer::{new_peer_table, rate_keeper_loop, KeepaliveConfig, Peer};

fn fast_config() -> KeepaliveConfig {
    KeepaliveConfig {
        batches: 5,
        batch_delay_min_ms: 2,
        batch_delay_max_ms: 5,
    }
}

fn live_peer(id_byte: u8) -> Arc<Peer> {
    let peer = Peer::new([id_byte; 32], Presentation::Standard);
    peer.set_connected(true);
    peer.set_protocol_version(3);
    peer
}

#[tokio::test]
async fn changed_interval_gets_announced() {
    let peers = new_peer_table();
    let peer = live_peer(1);
    peer.set_request_interval(250.0);
    peers.insert(peer.identity(), peer.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let keeper = tokio::spawn(rate_keeper_loop(peers.clone(), fast_config(), shutdown_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;

    let rate = peer.rate_signal();
    assert!(rate.last_sent_at.is_some(), "announcement must be queued");
    assert_eq!(rate.last_sent_interval, 250.0);
    assert!(peer.queue().has_rate_message());

    shutdown_tx.send(()).unwrap();
    keeper.await.unwrap().unwrap();
}

#[tokio::test]
async fn cool_down_allows_only_one_announcement() {
    let peers = new_peer_table();
    let peer = live_peer(2);
    peer.set_request_interval(100.0);
    peers.insert(peer.identity(), peer.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let keeper = tokio::spawn(rate_keeper_loop(peers.clone(), fast_config(), shutdown_rx));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(peer.queue().len(), 1);

    // A big change inside the 5s cool-down must stay quiet.
    peer.set_request_interval(1000.0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(peer.queue().len(), 1, "cool-down suppresses the second announcement");

    shutdown_tx.send(()).unwrap();
    keeper.await.unwrap().unwrap();
}

#[tokio::test]
async fn unsupported_peers_are_left_alone() {
    let peers = new_peer_table();
    let peer = live_peer(3);
    peer.set_protocol_version(99);
    peer.set_request_interval(500.0);
    peers.insert(peer.identity(), peer.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let keeper = tokio::spawn(rate_keeper_loop(peers.clone(), fast_config(), shutdown_rx));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(peer.queue().is_empty());

    shutdown_tx.send(()).unwrap();
    keeper.await.unwrap().unwrap();
}

#[tokio::test]
async fn maintenance_sweeps_expired_messages() {
    let peers = new_peer_table();
    // Not connected: the scheduler only runs queue maintenance for it.
    let peer = Peer::new([4; 32], Presentation::Standard);
    peer.queue()
        .enqueue(PacketMessage::new(PeerMessage::GoAway).with_max_age(1));
    peers.insert(peer.identity(), peer.clone());

    let expiry = Instant::now() + Duration::from_millis(2);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let keeper = tokio::spawn(rate_keeper_loop(peers.clone(), fast_config(), shutdown_rx));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(Instant::now() > expiry);
    assert!(peer.queue().is_empty(), "expired goodbye must be swept");

    shutdown_tx.send(()).unwrap();
    keeper.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_stops_the_loop_promptly() {
    let peers = new_peer_table();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let keeper = tokio::spawn(rate_keeper_loop(peers, fast_config(), shutdown_rx));

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(1), keeper)
        .await
        .expect("keeper must exit on shutdown")
        .unwrap()
        .unwrap();
}
