//! Multi-node network harness.

use std::time::Duration;

use tokio::time::sleep;
use tracing::info;

use nero_core::NodeId;

use crate::node::{TestNode, TestNodeConfig};

/// A network of in-process nodes.
pub struct TestNetwork {
    nodes: Vec<TestNode>,
}

impl TestNetwork {
    /// Spawns `count` nodes and joins them through the first node.
    pub async fn with_nodes(count: usize, config: TestNodeConfig) -> Self {
        let mut nodes = Vec::with_capacity(count);
        for _ in 0..count {
            nodes.push(TestNode::spawn(config.clone()).await);
        }

        for node in &nodes[1..] {
            node.bootstrap(&nodes[0]).await;
        }

        info!(count, "test network up");
        Self { nodes }
    }

    /// Returns the node at an index.
    pub fn node(&self, index: usize) -> &TestNode {
        &self.nodes[index]
    }

    /// Returns all nodes.
    pub fn nodes(&self) -> &[TestNode] {
        &self.nodes
    }

    /// Number of nodes in the network.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true when the network has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks a node up by id.
    pub fn node_by_id(&self, id: &NodeId) -> Option<&TestNode> {
        self.nodes.iter().find(|n| &n.node_id == id)
    }

    /// Kills the node at an index, simulating a crash.
    pub fn kill(&self, index: usize) {
        self.nodes[index].kill();
    }

    /// Runs one maintenance pass on every node.
    pub async fn tick_all(&self) {
        for node in &self.nodes {
            node.tick().await;
        }
    }

    /// Lets in-flight replication and observation settle.
    pub async fn settle(&self) {
        sleep(Duration::from_millis(300)).await;
    }
}
