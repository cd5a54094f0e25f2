//! Flood-fill propagation over real peer links
//!
//! Nodes are `LocalSwarm`s linked over localhost WebSockets, each running a
//! session with the flood-fill extension installed.

use std::sync::Arc;
use std::time::Duration;

use syncwatch::sync::{MediaClock, PlaybackStatus, Role};
use syncwatch::{LocalSwarm, Session, SessionConfig, SimulatedPlayer};

struct Node {
    swarm: Arc<LocalSwarm>,
    session: Session,
    url: String,
}

async fn node(role: Role) -> Node {
    let swarm = LocalSwarm::new();
    let mut session = Session::new(SessionConfig::new(role));
    session.attach(swarm.clone());
    let (addr, _) = swarm
        .listen("127.0.0.1:0")
        .await
        .expect("Failed to listen");
    Node {
        swarm,
        session,
        url: format!("ws://{}", addr),
    }
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Test: Status reaches every node exactly once in a cyclic mesh
/// Given three nodes linked in a triangle
/// When the authority originates a status message
/// Then each follower accepts it exactly once
/// And the authority never accepts its own echo
#[tokio::test]
async fn test_triangle_mesh_delivers_once() {
    let a = node(Role::Authority).await;
    let b = node(Role::Follower).await;
    let c = node(Role::Follower).await;

    a.swarm.connect(&b.url).await.expect("a -> b");
    b.swarm.connect(&c.url).await.expect("b -> c");
    c.swarm.connect(&a.url).await.expect("c -> a");

    for n in [&a, &b, &c] {
        wait_until("flood-fill peers", || n.session.broadcaster().peer_count() == 2).await;
    }

    let mut a_accepted = a.session.broadcaster().subscribe();
    let mut b_accepted = b.session.broadcaster().subscribe();
    let mut c_accepted = c.session.broadcaster().subscribe();

    let message = a
        .session
        .reconciler()
        .originate_status(PlaybackStatus::new(false, 12.25))
        .expect("authority should originate");

    for accepted in [&mut b_accepted, &mut c_accepted] {
        let received = tokio::time::timeout(Duration::from_secs(5), accepted.recv())
            .await
            .expect("Timed out waiting for message")
            .expect("Channel closed");
        assert_eq!(received, message);
    }

    // Let the relays settle, then make sure nothing arrived twice
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(a_accepted.try_recv().is_err(), "Authority accepted its own echo");
    assert!(b_accepted.try_recv().is_err(), "Duplicate delivery at b");
    assert!(c_accepted.try_recv().is_err(), "Duplicate delivery at c");
}

/// Test: Multi-hop relay
/// Given a chain a - b - c with no direct link between a and c
/// When a originates a message
/// Then c receives it via b
#[tokio::test]
async fn test_chain_relays_through_middle_node() {
    let a = node(Role::Authority).await;
    let b = node(Role::Follower).await;
    let c = node(Role::Follower).await;

    a.swarm.connect(&b.url).await.expect("a -> b");
    c.swarm.connect(&b.url).await.expect("c -> b");
    wait_until("b peers", || b.session.broadcaster().peer_count() == 2).await;
    wait_until("a peers", || a.session.broadcaster().peer_count() == 1).await;
    wait_until("c peers", || c.session.broadcaster().peer_count() == 1).await;

    let mut c_accepted = c.session.broadcaster().subscribe();
    let message = a
        .session
        .reconciler()
        .originate_status(PlaybackStatus::new(true, 3.0))
        .expect("authority should originate");

    let received = tokio::time::timeout(Duration::from_secs(5), c_accepted.recv())
        .await
        .expect("Timed out waiting for relay")
        .expect("Channel closed");
    assert_eq!(received.id, message.id);
    assert!(b.session.broadcaster().has_seen(&message.id));
}

/// Test: Peers without the extension stay inert
/// Given a node whose swarm has no flood-fill extension installed
/// When it connects to a session node
/// Then the link is open but the session has no flood-fill peer
#[tokio::test]
async fn test_peer_without_extension_is_ignored() {
    let a = node(Role::Authority).await;
    let plain = LocalSwarm::new();

    plain.connect(&a.url).await.expect("plain -> a");
    wait_until("link", || a.swarm.connection_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(a.session.broadcaster().peer_count(), 0);
}

/// Test: Follower converges to the authority over the network
/// Given an authority and a running follower session
/// When the authority pauses at 42s
/// Then the follower's player ends up paused at 42s
#[tokio::test]
async fn test_follower_player_converges() {
    let a = node(Role::Authority).await;
    let mut b = node(Role::Follower).await;

    let player = Arc::new(SimulatedPlayer::new());
    player.play();
    b.session.start(player.clone());

    a.swarm.connect(&b.url).await.expect("a -> b");
    wait_until("a peers", || a.session.broadcaster().peer_count() == 1).await;

    a.session
        .reconciler()
        .originate_status(PlaybackStatus::new(true, 42.0))
        .expect("authority should originate");

    wait_until("follower convergence", || {
        let status = player.status();
        status.paused && status.current_time == 42.0
    })
    .await;
}

/// Test: Stopping a session detaches it from the swarm
/// Given a follower node linked to an authority
/// When the follower's session stops
/// Then its flood-fill peers are detached, it stops relaying
/// And later connections get no flood-fill extension
#[tokio::test]
async fn test_stopped_session_stops_relaying() {
    let a = node(Role::Authority).await;
    let mut b = node(Role::Follower).await;
    let c = node(Role::Follower).await;

    a.swarm.connect(&b.url).await.expect("a -> b");
    wait_until("b peers", || b.session.broadcaster().peer_count() == 1).await;

    b.session.stop();
    assert_eq!(b.session.broadcaster().peer_count(), 0);

    c.swarm.connect(&b.url).await.expect("c -> b");
    wait_until("b links", || b.swarm.connection_count() == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // c sees b's handshake without flood_fill, so neither side attaches
    assert_eq!(b.session.broadcaster().peer_count(), 0);
    assert_eq!(c.session.broadcaster().peer_count(), 0);

    let message = a
        .session
        .reconciler()
        .originate_status(PlaybackStatus::new(false, 8.0))
        .expect("authority should originate");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!b.session.broadcaster().has_seen(&message.id));
}
