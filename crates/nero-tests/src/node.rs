//! A single in-process test node.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use nero_core::{NodeId, RecordKey, DEFAULT_ALPHA, DEFAULT_K};
use nero_dht::{ContentStore, ContentStoreConfig, Engine, EngineConfig, EngineError};
use nero_net::{StreamTransport, Transport};
use nero_proto::Record;

/// Knobs for a test node; defaults match the protocol constants except
/// for shorter timeouts so failing tests fail fast.
#[derive(Debug, Clone)]
pub struct TestNodeConfig {
    /// Bucket size (k).
    pub k: usize,
    /// Lookup parallelism (alpha).
    pub alpha: usize,
    /// Per-RPC deadline.
    pub rpc_timeout: Duration,
    /// Whole-lookup deadline.
    pub lookup_timeout: Duration,
    /// Interval between republications of a held record.
    pub republish_interval: Duration,
}

impl Default for TestNodeConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            alpha: DEFAULT_ALPHA,
            rpc_timeout: Duration::from_secs(2),
            lookup_timeout: Duration::from_secs(10),
            republish_interval: Duration::from_secs(3600),
        }
    }
}

/// A full daemon core listening on a loopback endpoint.
pub struct TestNode {
    /// The node's overlay endpoint.
    pub endpoint: String,
    /// The node's identity.
    pub node_id: NodeId,
    engine: Arc<Engine>,
    serve_task: JoinHandle<()>,
}

impl TestNode {
    /// Binds a loopback listener and starts serving the peer protocol.
    pub async fn spawn(config: TestNodeConfig) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(StreamTransport::new());
        let listener = transport
            .listen("127.0.0.1:0")
            .await
            .expect("loopback listen");
        let endpoint = listener.local_endpoint();
        let node_id = NodeId::from_identity(&endpoint);

        let store = ContentStore::new(ContentStoreConfig {
            republish_interval: config.republish_interval,
            ..Default::default()
        });

        let mut engine_config = EngineConfig::new(node_id, endpoint.clone());
        engine_config.k = config.k;
        engine_config.alpha = config.alpha;
        engine_config.rpc_timeout = config.rpc_timeout;
        engine_config.lookup_timeout = config.lookup_timeout;

        let engine = Arc::new(Engine::new(engine_config, store, transport));
        let serve_task = tokio::spawn(engine.clone().serve(listener));

        Self {
            endpoint,
            node_id,
            engine,
            serve_task,
        }
    }

    /// The node's protocol engine.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Joins the network through another node.
    pub async fn bootstrap(&self, seed: &TestNode) -> usize {
        self.engine.bootstrap(&[seed.endpoint.clone()]).await
    }

    /// Publishes a value and returns its key.
    pub async fn put(&self, value: &str, ttl: u64) -> Result<RecordKey, EngineError> {
        let record = Record::new(value.to_string(), ttl, Some(self.node_id));
        let key = record.key;
        self.engine.publish(record).await?;
        Ok(key)
    }

    /// Resolves a key locally or via iterative lookup.
    pub async fn get(&self, key: &RecordKey) -> Result<Record, EngineError> {
        self.engine.iterative_find_value(key).await
    }

    /// Runs one maintenance pass.
    pub async fn tick(&self) {
        self.engine.maintenance_tick().await;
    }

    /// Stops serving the peer protocol, simulating a crash.
    pub fn kill(&self) {
        self.serve_task.abort();
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.serve_task.abort();
    }
}
