#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration};

use xordht::{hash_value, Contact, DhtNode, Key, Network, NodeId, SessionId, StoreTimers};

/// In-memory transport: requests are answered by calling straight into the
/// target node's request methods, with injectable failures, latency and
/// corrupted value replies.
#[derive(Clone)]
pub struct TestNetwork {
    registry: Arc<NetworkRegistry>,
    me: Contact,
    failures: Arc<Mutex<HashSet<SocketAddr>>>,
    latencies: Arc<Mutex<HashMap<SocketAddr, Duration>>>,
    corrupt: Arc<Mutex<HashSet<SocketAddr>>>,
    stores: Arc<Mutex<Vec<(SocketAddr, Key, usize)>>>,
    pings: Arc<Mutex<Vec<SocketAddr>>>,
}

impl TestNetwork {
    pub fn new(registry: Arc<NetworkRegistry>, me: Contact) -> Self {
        Self {
            registry,
            me,
            failures: Arc::new(Mutex::new(HashSet::new())),
            latencies: Arc::new(Mutex::new(HashMap::new())),
            corrupt: Arc::new(Mutex::new(HashSet::new())),
            stores: Arc::new(Mutex::new(Vec::new())),
            pings: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make every RPC towards `addr` fail (or stop failing).
    pub async fn set_failure(&self, addr: SocketAddr, fail: bool) {
        let mut failures = self.failures.lock().await;
        if fail {
            failures.insert(addr);
        } else {
            failures.remove(&addr);
        }
    }

    pub async fn set_latency(&self, addr: SocketAddr, latency: Duration) {
        self.latencies.lock().await.insert(addr, latency);
    }

    /// Make `addr` answer value lookups with a payload that does not hash to
    /// the requested key.
    pub async fn set_corrupt(&self, addr: SocketAddr) {
        self.corrupt.lock().await.insert(addr);
    }

    /// Every store RPC issued through this network: target, key, value size.
    pub async fn store_calls(&self) -> Vec<(SocketAddr, Key, usize)> {
        self.stores.lock().await.clone()
    }

    pub async fn ping_calls(&self) -> Vec<SocketAddr> {
        self.pings.lock().await.clone()
    }

    async fn should_fail(&self, addr: &SocketAddr) -> bool {
        self.failures.lock().await.contains(addr)
    }

    async fn maybe_sleep(&self, addr: &SocketAddr) {
        let latency = { self.latencies.lock().await.get(addr).copied() };
        if let Some(delay) = latency {
            sleep(delay).await;
        }
    }
}

#[derive(Default)]
pub struct NetworkRegistry {
    peers: RwLock<HashMap<SocketAddr, Arc<DhtNode<TestNetwork>>>>,
}

impl NetworkRegistry {
    pub async fn register(&self, node: &Arc<DhtNode<TestNetwork>>) {
        let mut peers = self.peers.write().await;
        peers.insert(node.contact().addr, Arc::clone(node));
    }

    pub async fn get(&self, addr: &SocketAddr) -> Option<Arc<DhtNode<TestNetwork>>> {
        let peers = self.peers.read().await;
        peers.get(addr).cloned()
    }
}

#[async_trait::async_trait]
impl Network for TestNetwork {
    async fn ping(&self, addr: SocketAddr) -> Result<()> {
        if self.should_fail(&addr).await {
            return Err(anyhow!("injected network failure"));
        }
        self.maybe_sleep(&addr).await;
        self.pings.lock().await.push(addr);
        if self.registry.get(&addr).await.is_some() {
            Ok(())
        } else {
            Err(anyhow!("peer not reachable"))
        }
    }

    async fn find_nodes(&self, target: NodeId, addr: SocketAddr) -> Result<Vec<Contact>> {
        if self.should_fail(&addr).await {
            return Err(anyhow!("injected network failure"));
        }
        self.maybe_sleep(&addr).await;
        match self.registry.get(&addr).await {
            Some(peer) => Ok(peer.find_nodes_for(&self.me, target).await),
            None => Err(anyhow!("peer not reachable")),
        }
    }

    async fn find_value(
        &self,
        key: Key,
        addr: SocketAddr,
    ) -> Result<(Option<Vec<u8>>, Vec<Contact>)> {
        if self.should_fail(&addr).await {
            return Err(anyhow!("injected network failure"));
        }
        self.maybe_sleep(&addr).await;
        if self.corrupt.lock().await.contains(&addr) {
            return Ok((Some(b"bogus payload".to_vec()), Vec::new()));
        }
        match self.registry.get(&addr).await {
            Some(peer) => Ok(peer.find_value_for(&self.me, key).await),
            None => Err(anyhow!("peer not reachable")),
        }
    }

    async fn store(&self, value: Vec<u8>, addr: SocketAddr) -> Result<()> {
        if self.should_fail(&addr).await {
            return Err(anyhow!("injected network failure"));
        }
        self.maybe_sleep(&addr).await;
        self.stores
            .lock()
            .await
            .push((addr, hash_value(&value), value.len()));
        match self.registry.get(&addr).await {
            Some(peer) => {
                peer.store_from(&self.me, value).await;
                Ok(())
            }
            None => Err(anyhow!("peer not reachable")),
        }
    }

    async fn send_nodes(
        &self,
        _closest: Vec<Contact>,
        _session: SessionId,
        _addr: SocketAddr,
    ) -> Result<()> {
        // Mock requests are answered in place; nothing travels back.
        Ok(())
    }

    async fn send_value(
        &self,
        _key: Key,
        _value: Option<Vec<u8>>,
        _closest: Vec<Contact>,
        _session: SessionId,
        _addr: SocketAddr,
    ) -> Result<()> {
        Ok(())
    }
}

pub struct TestNode {
    pub node: Arc<DhtNode<TestNetwork>>,
    pub network: TestNetwork,
}

impl TestNode {
    pub async fn new(registry: Arc<NetworkRegistry>, index: u32) -> Self {
        Self::with_seeds(registry, index, &[]).await
    }

    pub async fn with_seeds(
        registry: Arc<NetworkRegistry>,
        index: u32,
        seeds: &[Contact],
    ) -> Self {
        Self::build(registry, index, seeds, StoreTimers::default()).await
    }

    pub async fn with_timers(
        registry: Arc<NetworkRegistry>,
        index: u32,
        seeds: &[Contact],
        timers: StoreTimers,
    ) -> Self {
        Self::build(registry, index, seeds, timers).await
    }

    async fn build(
        registry: Arc<NetworkRegistry>,
        index: u32,
        seeds: &[Contact],
        timers: StoreTimers,
    ) -> Self {
        let contact = make_contact(index);
        let network = TestNetwork::new(Arc::clone(&registry), contact.clone());
        let node = Arc::new(
            DhtNode::with_timers(contact, seeds, network.clone(), timers)
                .expect("valid seed set"),
        );
        registry.register(&node).await;
        Self { node, network }
    }

    pub fn contact(&self) -> Contact {
        self.node.contact()
    }

    pub fn addr(&self) -> SocketAddr {
        self.node.contact().addr
    }
}

pub fn make_node_id(index: u32) -> NodeId {
    let mut id = [0u8; 32];
    id[..4].copy_from_slice(&index.to_be_bytes());
    id
}

pub fn make_contact(index: u32) -> Contact {
    Contact {
        id: make_node_id(index),
        addr: ([127, 0, 0, 1], 20_000 + index as u16).into(),
    }
}
