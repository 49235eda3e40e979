//! Wires from unknown senders are dropped under the default privacy
//! mode, and queue as requests under `requests` mode.

use std::time::Duration;

use aim_integration_tests::ephemeral_node;
use aim_messaging::policy::PrivacyMode;
use aim_transport::mock::MockBus;

#[tokio::test]
async fn unknown_sender_is_dropped_under_contacts_only() {
    let bus = MockBus::new();
    let alice = ephemeral_node(&bus, "Alice");
    let bob = ephemeral_node(&bus, "Bob");

    // Bob knows Alice, but Alice has never heard of Bob.
    bob.identity()
        .add_contact_card(&alice.card("Alice"))
        .expect("bob adds alice");

    alice.service.start_networking().await.expect("alice up");
    bob.service.start_networking().await.expect("bob up");

    bob.service
        .send_message(&alice.id, b"hello stranger")
        .await
        .expect("bob's publish succeeds");

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(
        alice.identity().list_contacts().is_empty(),
        "contact list must stay empty"
    );
    let messages = alice
        .service
        .list_messages(&bob.id, 10, 0)
        .await
        .expect("list");
    assert!(messages.is_empty(), "no message may land in the chat");
    assert!(alice.service.list_requests().is_empty());
}

#[tokio::test]
async fn unknown_sender_queues_under_requests_mode() {
    let bus = MockBus::new();
    let alice = ephemeral_node(&bus, "Alice");
    let bob = ephemeral_node(&bus, "Bob");

    bob.identity()
        .add_contact_card(&alice.card("Alice"))
        .expect("bob adds alice");
    alice
        .service
        .set_privacy_mode(PrivacyMode::Requests)
        .expect("set mode");

    alice.service.start_networking().await.expect("alice up");
    bob.service.start_networking().await.expect("bob up");

    bob.service
        .send_message(&alice.id, b"may I?")
        .await
        .expect("send");

    tokio::time::sleep(Duration::from_millis(300)).await;

    // Still not a chat message, but a queued request thread.
    let messages = alice
        .service
        .list_messages(&bob.id, 10, 0)
        .await
        .expect("list");
    assert!(messages.is_empty());
    let requests = alice.service.list_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].sender_id, bob.id);

    // Accepting moves the thread into the chat and records the contact.
    let moved = alice.service.accept_request(&bob.id).expect("accept");
    assert_eq!(moved, 1);
    assert!(alice.identity().is_known_contact(&bob.id));
    let messages = alice
        .service
        .list_messages(&bob.id, 10, 0)
        .await
        .expect("list");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, b"may I?");

    // Accepting again is a no-op.
    assert_eq!(alice.service.accept_request(&bob.id).expect("accept"), 0);
}

#[tokio::test]
async fn blocked_sender_is_rejected_even_when_known() {
    let bus = MockBus::new();
    let alice = ephemeral_node(&bus, "Alice");
    let bob = ephemeral_node(&bus, "Bob");

    alice
        .identity()
        .add_contact_card(&bob.card("Bob"))
        .expect("alice adds bob");
    bob.identity()
        .add_contact_card(&alice.card("Alice"))
        .expect("bob adds alice");
    alice.service.block_sender(&bob.id).expect("block");

    alice.service.start_networking().await.expect("alice up");
    bob.service.start_networking().await.expect("bob up");

    bob.service
        .send_message(&alice.id, b"let me in")
        .await
        .expect("send");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let messages = alice
        .service
        .list_messages(&bob.id, 10, 0)
        .await
        .expect("list");
    assert!(messages.is_empty(), "blocked sender must be dropped");
}
