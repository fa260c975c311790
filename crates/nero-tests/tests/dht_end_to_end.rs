//! End-to-end behavior of the peer protocol across real loopback nodes.

use std::time::Duration;

use serde_json::json;

use nero_core::RecordKey;
use nero_dht::EngineError;
use nero_proto::Record;
use nero_tests::{TestNetwork, TestNode, TestNodeConfig};

fn listing_value(id: &str) -> String {
    json!({
        "metadata": "listing",
        "id": id,
        "seller_id": "5AdFzy...",
        "quantity": 2,
        "price": 0.35,
        "currency": "XMR",
        "condition": "new",
        "date": "2025-11-02T10:00:00Z",
        "signature": "SigV1...",
        "product": {
            "name": "Hand forged chef knife",
            "description": "Carbon steel, 20cm",
            "category": "Kitchen"
        }
    })
    .to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn put_get_round_trip_between_two_nodes() {
    let node_b = TestNode::spawn(TestNodeConfig::default()).await;
    let node_a = TestNode::spawn(TestNodeConfig::default()).await;
    assert_eq!(node_a.bootstrap(&node_b).await, 1);

    let value = listing_value("u-1");
    let key = node_a.put(&value, 3600).await.unwrap();
    assert_eq!(key, RecordKey::from_value(value.as_bytes()));

    let record = node_b.get(&key).await.unwrap();
    assert_eq!(record.value, value);
    assert_eq!(record.key, key);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_joiner_resolves_via_lookup() {
    let network = TestNetwork::with_nodes(4, TestNodeConfig::default()).await;

    let value = listing_value("u-2");
    let key = network.node(1).put(&value, 3600).await.unwrap();
    network.settle().await;

    let late = TestNode::spawn(TestNodeConfig::default()).await;
    late.bootstrap(network.node(0)).await;

    let record = late.get(&key).await.unwrap();
    assert_eq!(record.value, value);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tampered_record_is_rejected_locally() {
    let node = TestNode::spawn(TestNodeConfig::default()).await;

    let mut record = Record::new(listing_value("u-3"), 3600, Some(node.node_id));
    record.key = RecordKey::from_value(b"some other value");

    let result = node.engine().publish(record).await;
    assert!(matches!(result, Err(EngineError::Rejected(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn record_expires_after_ttl() {
    let node = TestNode::spawn(TestNodeConfig::default()).await;

    let value = listing_value("u-4");
    let key = node.put(&value, 2).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(node.get(&key).await.is_ok());

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(matches!(node.get(&key).await, Err(EngineError::NotFound)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expiry_sweep_drops_the_record() {
    let node = TestNode::spawn(TestNodeConfig::default()).await;

    let key = node.put(&listing_value("u-5"), 1).await.unwrap();
    assert_eq!(node.engine().store().len(), 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    node.tick().await;

    assert_eq!(node.engine().store().len(), 0);
    assert!(matches!(node.get(&key).await, Err(EngineError::NotFound)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_key_is_not_found() {
    let network = TestNetwork::with_nodes(3, TestNodeConfig::default()).await;

    let missing = RecordKey::from_value(b"never published anywhere");
    let result = network.node(2).get(&missing).await;
    assert!(matches!(result, Err(EngineError::NotFound)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn status_reflects_three_active_peers() {
    let network = TestNetwork::with_nodes(4, TestNodeConfig::default()).await;
    network.settle().await;

    // Every other node pinged node 0 while bootstrapping.
    let status = network.node(0).engine().status();
    assert_eq!(status.connected_peers, 3);
    assert!(status.active_peers >= 1);
    assert!(matches!(status.peers[0].status, 1 | 2));
    assert_eq!(status.data_count, 0);
}
