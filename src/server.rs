//! Node wiring: construction plus the long-lived background tasks.
//!
//! [`launch`] builds a [`DhtNode`] over a transport and spawns:
//!
//! - a bootstrap task that waits for the transport's ready signal and then
//!   joins the overlay by looking up the local identifier,
//! - one handler loop per inbound request kind, so node lookups, value
//!   lookups and stores never wait on each other,
//! - the store sweep ticker driving expiry, replication and republishing.
//!
//! # Usage
//!
//! ```ignore
//! let (network, inbound) = UdpNetwork::bind(bind_addr, id).await?;
//! let node = launch(network.contact(), &seeds, network, inbound)?;
//! let key = node.put(b"hello".to_vec()).await;
//! ```

use std::sync::Arc;

use tokio::time::interval;
use tracing::{debug, warn};

use crate::core::{Contact, DhtError, DhtNode, Network, StoreTimers};
use crate::protocol::Inbound;

/// Build and start a node with the canonical store timers.
///
/// Fails only when the seed set is invalid (contains the local id or a
/// duplicate). Must be called from within a tokio runtime.
pub fn launch<N: Network>(
    me: Contact,
    seeds: &[Contact],
    network: N,
    inbound: Inbound,
) -> Result<Arc<DhtNode<N>>, DhtError> {
    launch_with_timers(me, seeds, network, inbound, StoreTimers::default())
}

/// [`launch`] with custom store timers.
pub fn launch_with_timers<N: Network>(
    me: Contact,
    seeds: &[Contact],
    network: N,
    inbound: Inbound,
    timers: StoreTimers,
) -> Result<Arc<DhtNode<N>>, DhtError> {
    let node = Arc::new(DhtNode::with_timers(me, seeds, network, timers)?);
    let Inbound {
        ready,
        mut find_nodes,
        mut find_value,
        mut store,
    } = inbound;

    let bootstrap = Arc::clone(&node);
    tokio::spawn(async move {
        if ready.await.is_err() {
            warn!("transport went away before signalling ready");
            return;
        }
        bootstrap.join().await;
    });

    let handler = Arc::clone(&node);
    tokio::spawn(async move {
        while let Some(request) = find_nodes.recv().await {
            handler.handle_find_nodes_request(request).await;
        }
        debug!("node lookup channel closed");
    });

    let handler = Arc::clone(&node);
    tokio::spawn(async move {
        while let Some(request) = find_value.recv().await {
            handler.handle_find_value_request(request).await;
        }
        debug!("value lookup channel closed");
    });

    let handler = Arc::clone(&node);
    tokio::spawn(async move {
        while let Some(request) = store.recv().await {
            handler.handle_store_request(request).await;
        }
        debug!("store channel closed");
    });

    let sweeper = Arc::clone(&node);
    tokio::spawn(async move {
        let mut ticker = interval(sweeper.timers().sweep);
        // The first tick fires immediately and would sweep an empty store.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            Arc::clone(&sweeper).sweep_store().await;
        }
    });

    Ok(node)
}
