//! Sends to an unreachable peer succeed locally and stay pending.

use aim_integration_tests::ephemeral_node;
use aim_transport::mock::MockBus;
use aim_types::message::MessageStatus;

#[tokio::test]
async fn offline_send_is_queued_as_pending() {
    let bus = MockBus::new();
    let alice = ephemeral_node(&bus, "Alice");
    // Bob has an identity and a card but no node on the network.
    let bob = ephemeral_node(&bus, "Bob");

    alice
        .identity()
        .add_contact_card(&bob.card("Bob"))
        .expect("alice adds bob");

    alice.service.start_networking().await.expect("alice up");

    let message_id = alice
        .service
        .send_message(&bob.id, b"queued")
        .await
        .expect("send succeeds even though bob is offline");

    let messages = alice
        .service
        .list_messages(&bob.id, 10, 0)
        .await
        .expect("list");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, message_id);
    assert_eq!(messages[0].status, MessageStatus::Pending);
}
