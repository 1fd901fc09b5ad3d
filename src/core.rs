//! Core DHT logic: transport-agnostic Kademlia routing, storage and lookups.
//!
//! This module contains the building blocks of the overlay:
//!
//! - **Identity & Hashing**: [`NodeId`], [`Key`], [`hash_value`], [`verify_key_value`]
//! - **Distance**: [`xor_distance`] and [`bucket_index`] for XOR-metric routing
//! - **Routing**: [`RoutingTable`], [`Contact`] with least-recently-seen buckets
//! - **Shortlist**: the bounded, distance-sorted working set of a lookup
//! - **Storage**: [`Database`], a key/value map with expire/replicate/republish timers
//! - **Lookup engine**: the iterative α-parallel walk behind `get`, `put` and `join`
//! - **Node façade**: [`DhtNode`], generic over the [`Network`] transport

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::protocol::{FindNodesRequest, FindValueRequest, SessionId, StoreRequest};

// ============================================================================
// Type Aliases & Parameters
// ============================================================================

/// A 256-bit node identifier. Chosen externally (typically at random or from
/// a public key); uniform over the identifier space.
pub type NodeId = [u8; 32];

/// A 256-bit content-addressed key: the BLAKE2b-256 digest of the value.
pub type Key = [u8; 32];

/// An XOR distance between two identifiers, compared as a big-endian unsigned
/// integer.
pub type Distance = [u8; 32];

/// Bucket capacity, replication factor and shortlist bound.
pub const K: usize = 20;

/// Lookup parallelism: outstanding RPCs per wave.
pub const ALPHA: usize = 3;

/// Identifier width in bits; one routing bucket per bit position.
const ID_BITS: usize = 256;

// ============================================================================
// Errors
// ============================================================================

/// Terminal, caller-visible failures. Transient per-peer failures (timeouts,
/// refused stores) are absorbed inside the lookup walk and never surface here.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DhtError {
    /// A value lookup finished without any node returning the value.
    #[error("value not found in the network")]
    NotFound,

    /// A lookup finished with no responsive contacts at all.
    #[error("no responsive contacts for lookup")]
    NoContacts,

    /// A seed contact carries the local node's own identifier.
    #[error("seed contact reuses the local node id")]
    SeedIsSelf,

    /// Two seed contacts share an identifier.
    #[error("duplicate node id in seed contacts")]
    DuplicateSeed,
}

// ============================================================================
// Hashing
// ============================================================================

type Blake2b256 = Blake2b<U32>;

/// Compute the content-addressed key for a value: its BLAKE2b-256 digest.
///
/// The same value always produces the same key, so concurrent publishers of
/// one value converge on a single entry network-wide.
pub fn hash_value(value: &[u8]) -> Key {
    let mut hasher = Blake2b256::new();
    hasher.update(value);
    let digest = hasher.finalize();

    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Check that a key is the digest of a value. Used to validate both inbound
/// STORE payloads and FIND_VALUE responses before trusting them.
pub fn verify_key_value(key: &Key, value: &[u8]) -> bool {
    hash_value(value) == *key
}

/// Short hex form of an identifier for log lines.
pub(crate) fn hexid(id: &NodeId) -> String {
    hex::encode(&id[..8])
}

// ============================================================================
// Distance Metric
// ============================================================================

/// XOR distance between two identifiers.
///
/// # Properties
/// - `xor_distance(a, a) == [0; 32]`
/// - `xor_distance(a, b) == xor_distance(b, a)`
/// - Ordered with [`distance_cmp`], it is the only metric routing uses.
pub fn xor_distance(a: &NodeId, b: &NodeId) -> Distance {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Compare two distances as big-endian unsigned integers.
pub fn distance_cmp(a: &Distance, b: &Distance) -> std::cmp::Ordering {
    for i in 0..32 {
        if a[i] < b[i] {
            return std::cmp::Ordering::Less;
        } else if a[i] > b[i] {
            return std::cmp::Ordering::Greater;
        }
    }
    std::cmp::Ordering::Equal
}

/// Routing bucket index for `other` relative to `me`: the number of leading
/// bits the two identifiers share, i.e. the position of the first differing
/// bit (0..=255). Identical identifiers map to the last bucket, but the local
/// node is never stored.
pub fn bucket_index(me: &NodeId, other: &NodeId) -> usize {
    let dist = xor_distance(me, other);
    for (byte_idx, byte) in dist.iter().enumerate() {
        if *byte != 0 {
            return byte_idx * 8 + byte.leading_zeros() as usize;
        }
    }
    ID_BITS - 1
}

// ============================================================================
// Contact
// ============================================================================

/// Another node in the overlay: identifier plus UDP endpoint.
///
/// Equality and hashing consider the identifier only; the address is carried
/// along as opaque routing payload.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Contact {
    pub id: NodeId,
    pub addr: SocketAddr,
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Contact {}

impl std::hash::Hash for Contact {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ============================================================================
// Shortlist
// ============================================================================

/// The working set of a lookup: up to `capacity` contacts, kept sorted by
/// ascending XOR distance to a fixed target.
///
/// `add` is a set-union on node id followed by truncation to the closest
/// `capacity`, so after any sequence of adds and removes the shortlist holds
/// exactly the closest known survivors.
#[derive(Clone, Debug)]
pub struct Shortlist {
    target: NodeId,
    capacity: usize,
    contacts: Vec<Contact>,
}

impl Shortlist {
    pub fn new(target: NodeId, capacity: usize) -> Self {
        Self {
            target,
            capacity,
            contacts: Vec::new(),
        }
    }

    /// Merge contacts in, ignoring ids already present, then re-sort and trim
    /// to the closest `capacity`.
    pub fn add<I: IntoIterator<Item = Contact>>(&mut self, contacts: I) {
        for contact in contacts {
            if self.contacts.iter().any(|c| c.id == contact.id) {
                continue;
            }
            self.contacts.push(contact);
        }
        let target = self.target;
        self.contacts.sort_by(|a, b| {
            distance_cmp(&xor_distance(&a.id, &target), &xor_distance(&b.id, &target))
        });
        self.contacts.truncate(self.capacity);
    }

    pub fn remove(&mut self, id: &NodeId) {
        self.contacts.retain(|c| c.id != *id);
    }

    /// Snapshot of the contacts, closest first.
    pub fn sorted_contacts(&self) -> Vec<Contact> {
        self.contacts.clone()
    }

    pub fn first(&self) -> Option<&Contact> {
        self.contacts.first()
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

// ============================================================================
// Routing Table
// ============================================================================

/// One routing bucket: contacts ordered least-recently-seen first, so the
/// head is always the next eviction candidate. The bucket itself is a dumb
/// ordered container; the [`K`] capacity policy lives in the table.
#[derive(Clone, Debug, Default)]
struct Bucket {
    contacts: Vec<Contact>,
}

impl Bucket {
    /// Rotate a known contact to the most-recently-seen tail, preserving the
    /// relative order of everything else. False when the id is unknown.
    fn promote(&mut self, id: &NodeId) -> bool {
        match self.contacts.iter().position(|c| &c.id == id) {
            Some(pos) => {
                self.contacts[pos..].rotate_left(1);
                true
            }
            None => false,
        }
    }

    fn push(&mut self, contact: Contact) {
        self.contacts.push(contact);
    }

    fn has_room(&self) -> bool {
        self.contacts.len() < K
    }

    fn head(&self) -> Option<&Contact> {
        self.contacts.first()
    }

    fn contains(&self, id: &NodeId) -> bool {
        self.contacts.iter().any(|c| &c.id == id)
    }

    fn remove(&mut self, id: &NodeId) {
        self.contacts.retain(|c| &c.id != id);
    }
}

/// A pending full-bucket decision: the head contact must be pinged and the
/// result applied with [`RoutingTable::resolve_eviction`].
#[derive(Clone, Debug)]
pub struct EvictionCheck {
    bucket: usize,
    pub head: Contact,
    candidate: Contact,
}

/// XOR-metric routing table: 256 buckets, one per shared-prefix length with
/// the local identifier.
///
/// The table never contains the local node and never two contacts with the
/// same id. It is shared between the inbound request handlers and the lookup
/// walk, so callers serialize access behind a mutex.
#[derive(Debug)]
pub struct RoutingTable {
    me: Contact,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    /// Build a table seeded with an initial peer set.
    ///
    /// Seeds must not contain the local id or duplicate ids. A full bucket
    /// during seeding discards the newcomer: there is no transport yet to
    /// ping the head with.
    pub fn new(me: Contact, seeds: &[Contact]) -> Result<Self, DhtError> {
        let mut table = Self {
            me,
            buckets: vec![Bucket::default(); ID_BITS],
        };

        let mut seen = HashSet::new();
        for seed in seeds {
            if seed.id == table.me.id {
                return Err(DhtError::SeedIsSelf);
            }
            if !seen.insert(seed.id) {
                return Err(DhtError::DuplicateSeed);
            }
            let _ = table.add(seed.clone());
        }
        Ok(table)
    }

    /// Bucket position for an id, or `None` for the local id, which is never
    /// stored.
    fn slot_for(&self, id: &NodeId) -> Option<usize> {
        (*id != self.me.id).then(|| bucket_index(&self.me.id, id))
    }

    /// Add or refresh a contact.
    ///
    /// A known contact rotates to the most-recently-seen tail of its bucket;
    /// a new contact is appended while the bucket has room. A full bucket is
    /// left untouched: the caller receives an [`EvictionCheck`] naming the
    /// least-recently-seen head, pings it, and settles the bucket through
    /// [`resolve_eviction`](Self::resolve_eviction).
    pub fn add(&mut self, contact: Contact) -> Option<EvictionCheck> {
        let index = self.slot_for(&contact.id)?;
        let bucket = &mut self.buckets[index];

        if bucket.promote(&contact.id) {
            return None;
        }
        if bucket.has_room() {
            bucket.push(contact);
            return None;
        }

        let head = bucket.head()?.clone();
        Some(EvictionCheck {
            bucket: index,
            head,
            candidate: contact,
        })
    }

    /// Apply the liveness verdict for a pending full-bucket decision.
    ///
    /// A live head is promoted and the candidate discarded; a dead head is
    /// evicted and the candidate appended if the slot is still free.
    pub fn resolve_eviction(&mut self, check: EvictionCheck, head_alive: bool) {
        let bucket = &mut self.buckets[check.bucket];
        if head_alive {
            bucket.promote(&check.head.id);
            return;
        }

        bucket.remove(&check.head.id);
        if !bucket.contains(&check.candidate.id) && bucket.has_room() {
            bucket.push(check.candidate);
        }
    }

    /// Delete a contact by id, if present.
    pub fn remove(&mut self, id: &NodeId) {
        if let Some(index) = self.slot_for(id) {
            self.buckets[index].remove(id);
        }
    }

    /// The up-to-`n` contacts closest to `target`, as a sorted shortlist.
    ///
    /// Scans every bucket; the global sort makes visiting order irrelevant.
    pub fn n_closest(&self, target: &NodeId, n: usize) -> Shortlist {
        let mut all: Vec<Contact> = self
            .buckets
            .iter()
            .flat_map(|b| b.contacts.iter().cloned())
            .collect();
        all.sort_by(|a, b| {
            distance_cmp(&xor_distance(&a.id, target), &xor_distance(&b.id, target))
        });
        all.truncate(n);

        let mut shortlist = Shortlist::new(*target, K);
        shortlist.add(all);
        shortlist
    }

    /// Total number of contacts across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.contacts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Local Store
// ============================================================================

/// Timer configuration for the local store. The defaults are the canonical
/// network-wide values; tests shrink them.
#[derive(Clone, Copy, Debug)]
pub struct StoreTimers {
    /// Entry lifetime without a refresh.
    pub expire: Duration,
    /// Interval between re-advertisements of a held entry to its neighbours.
    pub replicate: Duration,
    /// Deadline for the original publisher to re-issue a put.
    pub republish: Duration,
    /// Cadence of the maintenance sweep.
    pub sweep: Duration,
}

impl Default for StoreTimers {
    fn default() -> Self {
        Self {
            expire: Duration::from_secs(86_410),
            replicate: Duration::from_secs(3_600),
            republish: Duration::from_secs(86_400),
            sweep: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
struct StoredItem {
    value: Vec<u8>,
    /// Most recent republisher of this entry.
    origin: NodeId,
    stored_at: Instant,
    replicated_at: Instant,
    republished_at: Instant,
}

/// Work produced by one sweep: values to re-advertise and values the local
/// node originally published and must re-put.
#[derive(Debug, Default)]
pub struct SweepPlan {
    pub replicate: Vec<(Key, Vec<u8>)>,
    pub republish: Vec<(Key, Vec<u8>)>,
}

/// In-memory key/value store with passive expiry.
///
/// Keys are always derived from values, never accepted from a peer. Expiry is
/// enforced both by the periodic sweep and lazily on reads, so an entry past
/// its lifetime is a miss even between sweeps.
#[derive(Debug)]
pub struct Database {
    me: NodeId,
    timers: StoreTimers,
    items: HashMap<Key, StoredItem>,
}

impl Database {
    pub fn new(me: NodeId, timers: StoreTimers) -> Self {
        Self {
            me,
            timers,
            items: HashMap::new(),
        }
    }

    /// Insert or refresh an entry, recording `origin` as its republisher and
    /// restarting every timer.
    pub fn add_item(&mut self, value: Vec<u8>, origin: NodeId) -> Key {
        let key = hash_value(&value);
        let now = Instant::now();
        self.items.insert(
            key,
            StoredItem {
                value,
                origin,
                stored_at: now,
                replicated_at: now,
                republished_at: now,
            },
        );
        key
    }

    /// Fetch a value, evicting it instead when its lifetime has passed.
    pub fn get_item(&mut self, key: &Key) -> Option<Vec<u8>> {
        let now = Instant::now();
        match self.items.get(key) {
            Some(item) if now.duration_since(item.stored_at) < self.timers.expire => {
                Some(item.value.clone())
            }
            Some(_) => {
                self.items.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn forget(&mut self, key: &Key) {
        self.items.remove(key);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Evict expired entries and collect due replicate/republish work.
    ///
    /// An entry due for both emits only the republish event; a republish
    /// re-advertises the value anyway. Timestamps are not touched here — the
    /// engine confirms success with [`mark_replicated`](Self::mark_replicated)
    /// or [`mark_republished`](Self::mark_republished), so failed work is
    /// retried on the next sweep.
    pub fn sweep(&mut self, now: Instant) -> SweepPlan {
        let expire = self.timers.expire;
        let before = self.items.len();
        self.items
            .retain(|_, item| now.duration_since(item.stored_at) < expire);
        let expired = before - self.items.len();
        if expired > 0 {
            debug!(expired, "evicted expired entries");
        }

        let mut plan = SweepPlan::default();
        for (key, item) in &self.items {
            if item.origin == self.me
                && now.duration_since(item.republished_at) >= self.timers.republish
            {
                plan.republish.push((*key, item.value.clone()));
            } else if now.duration_since(item.replicated_at) >= self.timers.replicate {
                plan.replicate.push((*key, item.value.clone()));
            }
        }
        plan
    }

    /// Record a successful re-advertisement.
    pub fn mark_replicated(&mut self, key: &Key, now: Instant) {
        if let Some(item) = self.items.get_mut(key) {
            item.replicated_at = now;
        }
    }

    /// Record a successful republish; the entry is fully refreshed.
    pub fn mark_republished(&mut self, key: &Key, now: Instant) {
        if let Some(item) = self.items.get_mut(key) {
            item.stored_at = now;
            item.replicated_at = now;
            item.republished_at = now;
        }
    }
}

// ============================================================================
// Network Trait
// ============================================================================

/// The transport collaborator.
///
/// Outbound RPCs resolve with the peer's reply or an error; the transport
/// owns the per-RPC deadline, so a timeout surfaces as `Err` and the walk
/// treats it as a permanent failure of that peer for the current lookup.
/// `send_nodes`/`send_value` answer inbound requests, correlated by the
/// request's session identifier.
#[async_trait]
pub trait Network: Send + Sync + 'static {
    /// Liveness probe, used before evicting a bucket head.
    async fn ping(&self, addr: SocketAddr) -> Result<()>;

    /// Ask a peer for its contacts closest to `target`.
    async fn find_nodes(&self, target: NodeId, addr: SocketAddr) -> Result<Vec<Contact>>;

    /// Ask a peer for a value, falling back to its closest contacts.
    async fn find_value(
        &self,
        key: Key,
        addr: SocketAddr,
    ) -> Result<(Option<Vec<u8>>, Vec<Contact>)>;

    /// Hand a peer a value to hold. The key is derived by the receiver.
    async fn store(&self, value: Vec<u8>, addr: SocketAddr) -> Result<()>;

    /// Reply to an inbound node lookup.
    async fn send_nodes(
        &self,
        closest: Vec<Contact>,
        session: SessionId,
        addr: SocketAddr,
    ) -> Result<()>;

    /// Reply to an inbound value lookup.
    async fn send_value(
        &self,
        key: Key,
        value: Option<Vec<u8>>,
        closest: Vec<Contact>,
        session: SessionId,
        addr: SocketAddr,
    ) -> Result<()>;
}

// ============================================================================
// DHT Node
// ============================================================================

/// RPC flavour a walk dispatches per peer.
#[derive(Clone, Copy, Debug)]
enum CallKind {
    FindNodes,
    FindValue,
}

struct WalkOutcome {
    contacts: Vec<Contact>,
    value: Option<Vec<u8>>,
}

/// Point-in-time counters for the stats log line.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    pub contacts: usize,
    pub stored_items: usize,
}

/// A single overlay node: routing table, local store and lookup engine glued
/// to a [`Network`] transport.
///
/// The type is generic over the transport so tests drive it with an in-memory
/// mock while the binary uses [`crate::net::UdpNetwork`]. It is `Arc`-friendly
/// and shared between the inbound handler loops and the maintenance sweep;
/// see [`crate::server::launch`] for the wiring.
pub struct DhtNode<N: Network> {
    me: Contact,
    routing: Arc<Mutex<RoutingTable>>,
    db: Arc<Mutex<Database>>,
    network: Arc<N>,
    timers: StoreTimers,
}

impl<N: Network> DhtNode<N> {
    /// Build a node with the canonical timers.
    pub fn new(me: Contact, seeds: &[Contact], network: N) -> Result<Self, DhtError> {
        Self::with_timers(me, seeds, network, StoreTimers::default())
    }

    /// Build a node with custom store timers (tests shrink them to
    /// milliseconds).
    pub fn with_timers(
        me: Contact,
        seeds: &[Contact],
        network: N,
        timers: StoreTimers,
    ) -> Result<Self, DhtError> {
        let routing = RoutingTable::new(me.clone(), seeds)?;
        let db = Database::new(me.id, timers);
        Ok(Self {
            me,
            routing: Arc::new(Mutex::new(routing)),
            db: Arc::new(Mutex::new(db)),
            network: Arc::new(network),
            timers,
        })
    }

    pub fn contact(&self) -> Contact {
        self.me.clone()
    }

    pub fn id(&self) -> NodeId {
        self.me.id
    }

    pub fn timers(&self) -> StoreTimers {
        self.timers
    }

    pub async fn stats(&self) -> Stats {
        let contacts = self.routing.lock().await.len();
        let stored_items = self.db.lock().await.len();
        Stats {
            contacts,
            stored_items,
        }
    }

    /// Fold a contact into the routing table.
    ///
    /// When its bucket is full, the least-recently-seen head is pinged in a
    /// background task; the head survives if it answers, otherwise it is
    /// evicted in favour of the newcomer.
    pub async fn observe_contact(&self, contact: Contact) {
        if contact.id == self.me.id {
            return;
        }
        let pending = {
            let mut routing = self.routing.lock().await;
            routing.add(contact)
        };
        if let Some(check) = pending {
            self.spawn_eviction_check(check);
        }
    }

    fn spawn_eviction_check(&self, check: EvictionCheck) {
        let network = Arc::clone(&self.network);
        let routing = Arc::clone(&self.routing);
        tokio::spawn(async move {
            let alive = match network.ping(check.head.addr).await {
                Ok(()) => true,
                Err(err) => {
                    debug!(peer = %hexid(&check.head.id), %err, "bucket head unresponsive");
                    false
                }
            };
            routing.lock().await.resolve_eviction(check, alive);
        });
    }

    // ------------------------------------------------------------------
    // Inbound requests
    // ------------------------------------------------------------------

    /// Answer a node lookup: refresh the sender's bucket position, return our
    /// k closest contacts to the target.
    pub async fn find_nodes_for(&self, from: &Contact, target: NodeId) -> Vec<Contact> {
        self.observe_contact(from.clone()).await;
        let routing = self.routing.lock().await;
        routing.n_closest(&target, K).sorted_contacts()
    }

    /// Answer a value lookup: the value when held locally, otherwise our k
    /// closest contacts to the key.
    pub async fn find_value_for(
        &self,
        from: &Contact,
        key: Key,
    ) -> (Option<Vec<u8>>, Vec<Contact>) {
        self.observe_contact(from.clone()).await;
        if let Some(value) = self.db.lock().await.get_item(&key) {
            return (Some(value), Vec::new());
        }
        let routing = self.routing.lock().await;
        (None, routing.n_closest(&key, K).sorted_contacts())
    }

    /// Accept a replicated value. The key is derived locally, never taken
    /// from the wire, and the sender becomes the entry's republisher.
    pub async fn store_from(&self, from: &Contact, value: Vec<u8>) -> Key {
        self.observe_contact(from.clone()).await;
        self.db.lock().await.add_item(value, from.id)
    }

    /// Channel-loop wrapper: answer and reply over the transport.
    pub async fn handle_find_nodes_request(&self, request: FindNodesRequest) {
        debug!(from = %hexid(&request.from.id), "node lookup request");
        let closest = self.find_nodes_for(&request.from, request.target).await;
        if let Err(err) = self
            .network
            .send_nodes(closest, request.session, request.from.addr)
            .await
        {
            warn!(peer = %hexid(&request.from.id), %err, "failed to reply to node lookup");
        }
    }

    /// Channel-loop wrapper: answer and reply over the transport.
    pub async fn handle_find_value_request(&self, request: FindValueRequest) {
        debug!(from = %hexid(&request.from.id), key = %hexid(&request.key), "value lookup request");
        let (value, closest) = self.find_value_for(&request.from, request.key).await;
        if let Err(err) = self
            .network
            .send_value(request.key, value, closest, request.session, request.from.addr)
            .await
        {
            warn!(peer = %hexid(&request.from.id), %err, "failed to reply to value lookup");
        }
    }

    /// Channel-loop wrapper: ingest a replicated value.
    pub async fn handle_store_request(&self, request: StoreRequest) {
        let from = request.from.clone();
        let key = self.store_from(&request.from, request.value).await;
        debug!(from = %hexid(&from.id), key = %hexid(&key), "stored value");
    }

    // ------------------------------------------------------------------
    // Iterative lookups
    // ------------------------------------------------------------------

    /// Bootstrap: look up our own identifier so the nodes nearest to us learn
    /// about us and populate our table in return. Returns the neighbours we
    /// became acquainted with.
    pub async fn join(&self) -> Vec<Contact> {
        let contacts = self.walk(self.me.id, CallKind::FindNodes).await.contacts;
        if contacts.is_empty() {
            warn!("bootstrap lookup reached no peers");
        } else {
            info!(peers = contacts.len(), "acquainted with network");
            for contact in &contacts {
                debug!(peer = %hexid(&contact.id), "neighbour");
            }
        }
        contacts
    }

    /// Store a value in the overlay and return its key.
    ///
    /// The value is kept locally with the local node as origin, then handed
    /// to the k closest nodes to the key. Unreachable peers are logged and
    /// skipped; the derived key is returned even when no peer accepted the
    /// value.
    pub async fn put(&self, value: Vec<u8>) -> Key {
        {
            let mut db = self.db.lock().await;
            db.add_item(value.clone(), self.me.id);
        }
        let (key, stored) = self.iterative_store(value).await;
        if stored.is_empty() {
            warn!(key = %hexid(&key), "value held locally only; no reachable peers");
        } else {
            debug!(key = %hexid(&key), peers = stored.len(), "value stored");
        }
        key
    }

    /// Retrieve a value by key, consulting the local store before walking the
    /// network.
    pub async fn get(&self, key: Key) -> Result<Vec<u8>, DhtError> {
        if let Some(value) = self.db.lock().await.get_item(&key) {
            return Ok(value);
        }
        self.iterative_find_value(key).await
    }

    /// The k closest reachable contacts to `target`.
    pub async fn iterative_find_nodes(&self, target: NodeId) -> Vec<Contact> {
        self.walk(target, CallKind::FindNodes).await.contacts
    }

    /// Place a value at the k closest nodes to its key. Returns the key and
    /// the contacts that acknowledged the store.
    pub async fn iterative_store(&self, value: Vec<u8>) -> (Key, Vec<Contact>) {
        let key = hash_value(&value);
        let targets = self.walk(key, CallKind::FindNodes).await.contacts;

        let mut stores = JoinSet::new();
        for contact in targets {
            let network = Arc::clone(&self.network);
            let value = value.clone();
            stores.spawn(async move {
                let sent = network.store(value, contact.addr).await;
                (contact, sent)
            });
        }

        let mut stored = Vec::new();
        while let Some(joined) = stores.join_next().await {
            let Ok((contact, result)) = joined else {
                continue;
            };
            match result {
                Ok(()) => stored.push(contact),
                Err(err) => {
                    warn!(peer = %hexid(&contact.id), %err, "store rpc failed");
                }
            }
        }
        (key, stored)
    }

    /// Walk the overlay for a value.
    pub async fn iterative_find_value(&self, key: Key) -> Result<Vec<u8>, DhtError> {
        let outcome = self.walk(key, CallKind::FindValue).await;
        match outcome.value {
            Some(value) => Ok(value),
            None if outcome.contacts.is_empty() => Err(DhtError::NoContacts),
            None => Err(DhtError::NotFound),
        }
    }

    /// The iterative α-parallel lookup.
    ///
    /// Waves of up to α unqueried shortlist contacts are dispatched and
    /// fanned back in. Each response refreshes the callee's routing position
    /// and folds its closest contacts into the shortlist; a failed RPC drops
    /// the callee from the shortlist for the rest of the walk, even when a
    /// later response lists it again. When a wave leaves the closest contact
    /// unchanged, one exhaustive pass over the remaining unqueried shortlist
    /// runs before termination.
    ///
    /// A value lookup stops at the first response whose payload matches the
    /// key, but still drains the completions already in flight so no task is
    /// left suspended. A payload that does not hash to the key is discarded
    /// and its sender treated like a timeout for this lookup.
    async fn walk(&self, target: NodeId, kind: CallKind) -> WalkOutcome {
        let mut shortlist = {
            let routing = self.routing.lock().await;
            routing.n_closest(&target, ALPHA)
        };
        let Some(mut closest) = shortlist.first().map(|c| c.id) else {
            return WalkOutcome {
                contacts: Vec::new(),
                value: None,
            };
        };

        let mut sent: HashSet<NodeId> = HashSet::new();
        // Peers that failed this walk stay out of the shortlist even when a
        // later response lists them again.
        let mut failed: HashSet<NodeId> = HashSet::new();
        let mut rest = false;

        loop {
            let width = if rest { usize::MAX } else { ALPHA };
            let wave: Vec<Contact> = shortlist
                .sorted_contacts()
                .into_iter()
                .filter(|c| !sent.contains(&c.id) && c.id != self.me.id)
                .take(width)
                .collect();

            let mut completions = JoinSet::new();
            for contact in wave {
                sent.insert(contact.id);
                let network = Arc::clone(&self.network);
                completions.spawn(async move {
                    let reply = match kind {
                        CallKind::FindNodes => network
                            .find_nodes(target, contact.addr)
                            .await
                            .map(|closer| (None, closer)),
                        CallKind::FindValue => network.find_value(target, contact.addr).await,
                    };
                    (contact, reply)
                });
            }

            let mut found: Option<Vec<u8>> = None;
            while let Some(joined) = completions.join_next().await {
                let Ok((callee, reply)) = joined else {
                    continue;
                };
                match reply {
                    Ok((value, closer)) => {
                        if found.is_some() {
                            // Drain only; the responder still earns its
                            // routing-table refresh.
                            self.observe_contact(callee).await;
                            continue;
                        }
                        if let Some(value) = value {
                            if !verify_key_value(&target, &value) {
                                debug!(
                                    peer = %hexid(&callee.id),
                                    "value digest mismatch, dropping peer for this lookup"
                                );
                                failed.insert(callee.id);
                                shortlist.remove(&callee.id);
                                continue;
                            }
                            self.observe_contact(callee.clone()).await;
                            shortlist.add(closer.into_iter().filter(|c| !failed.contains(&c.id)));
                            found = Some(value);
                            continue;
                        }
                        self.observe_contact(callee.clone()).await;
                        shortlist.add(closer.into_iter().filter(|c| !failed.contains(&c.id)));
                    }
                    Err(err) => {
                        debug!(peer = %hexid(&callee.id), %err, "lookup rpc failed");
                        failed.insert(callee.id);
                        shortlist.remove(&callee.id);
                    }
                }
            }

            if found.is_some() {
                return WalkOutcome {
                    contacts: shortlist.sorted_contacts(),
                    value: found,
                };
            }

            let Some(first) = shortlist.first().map(|c| c.id) else {
                // Every candidate failed us.
                return WalkOutcome {
                    contacts: Vec::new(),
                    value: None,
                };
            };
            if first == closest {
                if !rest {
                    rest = true;
                    continue;
                }
                return WalkOutcome {
                    contacts: shortlist.sorted_contacts(),
                    value: None,
                };
            }
            closest = first;
        }
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// One maintenance pass: evict expired entries, then re-advertise and
    /// republish due values.
    ///
    /// The store lock is released before any network work; each due key is
    /// dispatched as its own task, and only success advances its timestamps,
    /// so a failed pass is retried on the next sweep.
    pub async fn sweep_store(self: Arc<Self>) {
        let plan = {
            let mut db = self.db.lock().await;
            db.sweep(Instant::now())
        };

        for (key, value) in plan.replicate {
            let node = Arc::clone(&self);
            tokio::spawn(async move {
                let (_, stored) = node.iterative_store(value).await;
                if stored.is_empty() {
                    debug!(key = %hexid(&key), "replication reached no peers, retrying next sweep");
                } else {
                    node.db.lock().await.mark_replicated(&key, Instant::now());
                }
            });
        }

        for (key, value) in plan.republish {
            let node = Arc::clone(&self);
            tokio::spawn(async move {
                let (_, stored) = node.iterative_store(value).await;
                if stored.is_empty() {
                    debug!(key = %hexid(&key), "republish reached no peers, retrying next sweep");
                } else {
                    node.db.lock().await.mark_republished(&key, Instant::now());
                }
            });
        }
    }
}
