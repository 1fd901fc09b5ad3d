//! # xordht
//!
//! A Kademlia-style distributed hash table: a peer-to-peer key/value overlay
//! in which nodes cooperate to store and retrieve content-addressed values
//! without central coordination. Each node keeps a routing table of known
//! peers organised by XOR distance, a local expiring key/value store, and an
//! iterative lookup engine that converges on the k nodes closest to any
//! target by querying progressively closer peers, α at a time.
//!
//! The crate is split into a handful of modules that can be reused
//! independently:
//!
//! - [`core`]: the transport-agnostic Kademlia logic — routing table,
//!   shortlist, local store with expire/replicate/republish timers, the
//!   lookup walk and the [`DhtNode`] façade.
//! - [`protocol`]: the serialisable wire messages and the inbound request
//!   channels a transport feeds.
//! - [`net`]: a [`UdpNetwork`] transport speaking session-correlated JSON
//!   datagrams.
//! - [`server`]: [`launch`], which wires the node, its inbound handler loops
//!   and the maintenance sweep together.
//!
//! ## Getting started
//!
//! Bind a transport, launch a node with a few seed contacts, and drive
//! `put`/`get` from your application:
//!
//! ```no_run
//! use anyhow::Result;
//! use xordht::{launch, UdpNetwork};
//!
//! # async fn run(id: xordht::NodeId, seeds: Vec<xordht::Contact>) -> Result<()> {
//! let (network, inbound) = UdpNetwork::bind("0.0.0.0:0".parse()?, id).await?;
//! let node = launch(network.contact(), &seeds, network, inbound)?;
//!
//! let key = node.put(b"hello".to_vec()).await;
//! let value = node.get(key).await?;
//! # Ok(())
//! # }
//! ```
//!
//! The binary in `src/main.rs` wires these pieces into a standalone node
//! that bootstraps from peers given on the command line.

pub mod core;
pub mod net;
pub mod protocol;
pub mod server;

pub use crate::core::{
    bucket_index, distance_cmp, hash_value, verify_key_value, xor_distance, Contact, Database,
    DhtError, DhtNode, Distance, Key, Network, NodeId, RoutingTable, Shortlist, Stats, StoreTimers,
    ALPHA, K,
};
pub use crate::net::UdpNetwork;
pub use crate::protocol::{FindNodesRequest, FindValueRequest, Inbound, SessionId, StoreRequest};
pub use crate::server::{launch, launch_with_timers};
