//! Listing on the receiving side auto-reads and the read receipt flows
//! back to the sender.

use std::time::Duration;

use aim_integration_tests::{ephemeral_node, wait_until};
use aim_transport::mock::MockBus;
use aim_types::message::MessageStatus;

#[tokio::test]
async fn auto_read_receipt_updates_sender_status() {
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

    alice.service.start_networking().await.expect("alice up");
    bob.service.start_networking().await.expect("bob up");

    let message_id = alice
        .service
        .send_message(&bob.id, b"read me")
        .await
        .expect("send");

    // Delivery receipt lands first.
    let delivered = wait_until(Duration::from_secs(2), || async {
        alice.service.message_status(&message_id).expect("status")
            >= MessageStatus::Delivered
    })
    .await;
    assert!(delivered, "delivered receipt missing");

    // Bob listing the conversation triggers auto-read.
    let listed = bob
        .service
        .list_messages(&alice.id, 10, 0)
        .await
        .expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, MessageStatus::Read);

    let read = wait_until(Duration::from_secs(3), || async {
        alice.service.message_status(&message_id).expect("status") == MessageStatus::Read
    })
    .await;
    assert!(read, "read receipt did not reach the sender within 3s");

    // Receipts never regress: a late delivered receipt leaves read.
    bob.service
        .send_receipt(&alice.id, &message_id, MessageStatus::Delivered)
        .await
        .expect("late receipt");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        alice.service.message_status(&message_id).expect("status"),
        MessageStatus::Read
    );
}
