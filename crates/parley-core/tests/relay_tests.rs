//! End-to-end tests of chat relaying through a live relay.

mod common;

use std::time::Duration;

use common::{
    client_config, connect_client, create_temp_dir, random_bytes, start_relay, EVENT_TIMEOUT,
};
use parley_core::client::{BackendState, ClientEvent};
use parley_core::model::MessageBody;

#[tokio::test]
async fn test_broadcast_is_seen_once_by_everyone() {
    let relay = start_relay().await;
    let dir = create_temp_dir();

    let mut alice = connect_client(client_config(relay.addr, "alice", dir.path())).await;
    let mut bob = connect_client(client_config(relay.addr, "bob", dir.path())).await;
    let bob_id = bob.id();

    alice
        .expect_event("bob joining", |e| {
            matches!(e, ClientEvent::PeerAdded(p) if p.id() == bob_id)
        })
        .await;

    assert!(alice.backend.send_text("hi"));
    assert!(alice.backend.send_text("done"));

    // The sender sees its own message through the local echo, the other
    // peer through the relay; neither sees it twice.
    assert_eq!(alice.texts_until("done").await, vec!["hi", "done"]);
    assert_eq!(bob.texts_until("done").await, vec!["hi", "done"]);

    alice.shutdown().await;
    bob.shutdown().await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_messages_carry_relay_assigned_sender() {
    let relay = start_relay().await;
    let dir = create_temp_dir();

    let alice = connect_client(client_config(relay.addr, "alice", dir.path())).await;
    let mut bob = connect_client(client_config(relay.addr, "bob", dir.path())).await;
    let alice_id = alice.id();

    alice.backend.send_text("who am i");
    let message = bob.expect_text("who am i").await;
    assert_eq!(message.sender.id(), alice_id);
    assert_eq!(message.sender.name(), "alice");

    alice.shutdown().await;
    bob.shutdown().await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_targeted_message_reaches_only_recipient() {
    let relay = start_relay().await;
    let dir = create_temp_dir();

    let alice = connect_client(client_config(relay.addr, "alice", dir.path())).await;
    let mut bob = connect_client(client_config(relay.addr, "bob", dir.path())).await;
    let mut carol = connect_client(client_config(relay.addr, "carol", dir.path())).await;

    let bob_identity = bob.backend.identity().expect("bob online");
    assert!(alice.backend.send_text_to("psst", vec![bob_identity]));
    assert!(alice.backend.send_text("public"));

    // Messages from one sender arrive in order, so anything addressed to
    // carol would show up before the broadcast.
    assert_eq!(bob.texts_until("public").await, vec!["psst", "public"]);
    assert_eq!(carol.texts_until("public").await, vec!["public"]);

    alice.shutdown().await;
    bob.shutdown().await;
    carol.shutdown().await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_rename_reaches_peers_and_roster() {
    let relay = start_relay().await;
    let dir = create_temp_dir();

    let alice = connect_client(client_config(relay.addr, "alice", dir.path())).await;
    let mut bob = connect_client(client_config(relay.addr, "bob", dir.path())).await;
    let alice_id = alice.id();

    alice.backend.change_name("zed", false);
    bob.expect_event("rename", |e| {
        matches!(e, ClientEvent::PeerAdded(p) if p.id() == alice_id && p.name() == "zed")
    })
    .await;

    assert_eq!(
        alice.backend.roster().get(&alice_id).map(|p| p.name().to_string()),
        Some("zed".to_string())
    );

    let dave = connect_client(client_config(relay.addr, "dave", dir.path())).await;
    let roster = dave.backend.roster();
    assert_eq!(roster.len(), 3);
    assert_eq!(roster.get(&alice_id).map(|p| p.name()), Some("zed"));

    alice.shutdown().await;
    bob.shutdown().await;
    dave.shutdown().await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_announced_rename_is_displayed() {
    let relay = start_relay().await;
    let dir = create_temp_dir();

    let alice = connect_client(client_config(relay.addr, "alice", dir.path())).await;
    let mut bob = connect_client(client_config(relay.addr, "bob", dir.path())).await;

    alice.backend.change_name("zed", true);
    let message = bob.expect_text("alice has changed their name to zed").await;
    assert_eq!(message.sender.name(), "zed");

    alice.shutdown().await;
    bob.shutdown().await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_leaving_peer_is_removed() {
    let relay = start_relay().await;
    let dir = create_temp_dir();

    let mut alice = connect_client(client_config(relay.addr, "alice", dir.path())).await;
    let bob = connect_client(client_config(relay.addr, "bob", dir.path())).await;
    let bob_id = bob.id();

    bob.shutdown().await;
    alice
        .expect_event("bob leaving", |e| {
            matches!(e, ClientEvent::PeerRemoved(p) if p.id() == bob_id)
        })
        .await;
    assert!(!alice.backend.roster().contains_key(&bob_id));

    alice.shutdown().await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_large_batch_is_split_across_frames() {
    let relay = start_relay().await;
    let dir = create_temp_dir();

    let alice = connect_client(client_config(relay.addr, "alice", dir.path())).await;
    let mut bob = connect_client(client_config(relay.addr, "bob", dir.path())).await;

    // Ten 3 MiB images encode to about 40 MiB, more than one frame holds.
    let image = random_bytes(3 * 1024 * 1024);
    for i in 0..10 {
        assert!(alice
            .backend
            .send_image(image.clone(), Some(format!("img-{i}")), Vec::new()));
    }
    assert!(alice.backend.send_text("after"));

    let mut captions = Vec::new();
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let event = bob.events.recv().await.expect("event channel closed");
            if let ClientEvent::MessageReceived(m) = event {
                if let MessageBody::Image { data } = &m.body {
                    assert_eq!(data.len(), image.len());
                }
                let text = m.text.unwrap_or_default();
                if text == "after" {
                    return;
                }
                captions.push(text);
            }
        }
    })
    .await
    .expect("all images arrived");

    let expected: Vec<String> = (0..10).map(|i| format!("img-{i}")).collect();
    assert_eq!(captions, expected);
    assert_eq!(alice.backend.state(), BackendState::Online);

    alice.shutdown().await;
    bob.shutdown().await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_unsendable_message_keeps_connection() {
    let relay = start_relay().await;
    let dir = create_temp_dir();

    let alice = connect_client(client_config(relay.addr, "alice", dir.path())).await;
    let mut bob = connect_client(client_config(relay.addr, "bob", dir.path())).await;

    assert!(!alice.backend.send_image(vec![0; 30 * 1024 * 1024], None, Vec::new()));
    assert!(alice.backend.send_text("still here"));
    bob.expect_text("still here").await;
    assert_eq!(alice.backend.state(), BackendState::Online);

    alice.shutdown().await;
    bob.shutdown().await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_relay_shutdown_stops_clients() {
    let relay = start_relay().await;
    let dir = create_temp_dir();

    let alice = connect_client(client_config(relay.addr, "alice", dir.path())).await;
    relay.shutdown().await;

    let state = tokio::time::timeout(
        EVENT_TIMEOUT,
        alice.backend.wait_for_state(BackendState::Stopped),
    )
    .await
    .expect("client noticed the relay going away");
    assert_eq!(state, BackendState::Stopped);
    assert!(!alice.backend.send_text("too late"));
}

#[tokio::test]
async fn test_unreachable_relay_stops_backend() {
    let dir = create_temp_dir();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let mut config = client_config(addr, "alice", dir.path());
    config.connect_timeout = Duration::from_secs(1);
    let backend = parley_core::client::Backend::new(config);
    backend.start();

    let state = tokio::time::timeout(EVENT_TIMEOUT, backend.wait_for_state(BackendState::Online))
        .await
        .expect("connect attempt finished");
    assert_eq!(state, BackendState::Stopped);
    assert!(backend.identity().is_none());
}
