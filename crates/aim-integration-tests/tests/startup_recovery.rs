//! Pending messages survive a restart and go out once both sides are up.

use std::time::Duration;

use aim_integration_tests::{disk_node, wait_until};
use aim_transport::mock::MockBus;
use aim_types::message::MessageStatus;

#[tokio::test]
async fn pending_message_delivers_after_restart() {
    let alice_dir = tempfile::tempdir().expect("alice dir");
    let bob_dir = tempfile::tempdir().expect("bob dir");
    let bus = MockBus::new();

    // First life: the peers exchange cards, Bob goes offline, and
    // Alice's send stays pending in her store.
    let alice_card = {
        let alice = disk_node(&bus, alice_dir.path(), "Alice");
        alice.card("Alice")
    };
    let bob_card = {
        let bob = disk_node(&bus, bob_dir.path(), "Bob");
        bob.identity()
            .add_contact_card(&alice_card)
            .expect("bob adds alice");
        bob.card("Bob")
    };
    {
        let alice = disk_node(&bus, alice_dir.path(), "Alice");
        alice
            .identity()
            .add_contact_card(&bob_card)
            .expect("alice adds bob");
        alice.service.start_networking().await.expect("alice up");
        let message_id = alice
            .service
            .send_message(&bob_card.identity_id, b"hello from the past")
            .await
            .expect("send");
        assert_eq!(
            alice.service.message_status(&message_id).expect("status"),
            MessageStatus::Pending
        );
        alice.service.stop_networking().await.expect("alice down");
    }

    // Second life: same identity and stores; both nodes start.
    let alice = disk_node(&bus, alice_dir.path(), "Alice");
    let bob = disk_node(&bus, bob_dir.path(), "Bob");
    let alice_id = alice.id.clone();

    bob.service.start_networking().await.expect("bob up");
    alice.service.start_networking().await.expect("alice up");

    let delivered = wait_until(Duration::from_secs(3), || async {
        let messages = bob
            .service
            .list_messages(&alice_id, 10, 0)
            .await
            .expect("list");
        messages
            .iter()
            .any(|m| m.content == b"hello from the past")
    })
    .await;
    assert!(delivered, "queued message did not deliver within 3s of restart");
}
