//! UDP datagram transport implementing the [`Network`] contract.
//!
//! Each outbound RPC sends one envelope and parks a oneshot sender in a
//! pending-session map; the receive loop completes it when a reply with the
//! same session arrives. RPCs that see no reply within [`RPC_TIMEOUT`] fail,
//! which the lookup walk treats as the peer's permanent failure for that
//! lookup.
//!
//! Requests from peers are pushed onto the [`Inbound`] channels for the
//! node's handler loops. Two request kinds never reach the node: PING is
//! answered with PONG straight from the receive loop, and STORE is
//! acknowledged on receipt before the payload is handed over.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, trace, warn};

use crate::core::{hexid, Contact, Key, Network, NodeId};
use crate::protocol::{
    decode, encode, new_session, Envelope, FindNodesRequest, FindValueRequest, Inbound, Message,
    SessionId, StoreRequest, MAX_DATAGRAM,
};

/// Deadline for a single request/reply exchange.
const RPC_TIMEOUT: Duration = Duration::from_secs(3);

/// Capacity of each inbound request channel.
const INBOUND_QUEUE: usize = 256;

type PendingMap = Arc<Mutex<HashMap<SessionId, oneshot::Sender<Message>>>>;

/// A bound UDP socket speaking the overlay protocol.
pub struct UdpNetwork {
    socket: Arc<UdpSocket>,
    me: Contact,
    pending: PendingMap,
}

impl UdpNetwork {
    /// Bind a socket and start the receive loop.
    ///
    /// Returns the network half (outbound RPCs and replies) and the
    /// [`Inbound`] half to hand to [`crate::server::launch`]. The ready
    /// signal fires immediately after the receive loop is running.
    pub async fn bind(bind_addr: SocketAddr, id: NodeId) -> Result<(Self, Inbound)> {
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let local_addr = socket.local_addr()?;
        let me = Contact {
            id,
            addr: local_addr,
        };

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (find_nodes_tx, find_nodes_rx) = mpsc::channel(INBOUND_QUEUE);
        let (find_value_tx, find_value_rx) = mpsc::channel(INBOUND_QUEUE);
        let (store_tx, store_rx) = mpsc::channel(INBOUND_QUEUE);

        tokio::spawn(recv_loop(
            Arc::clone(&socket),
            Arc::clone(&pending),
            find_nodes_tx,
            find_value_tx,
            store_tx,
        ));
        let _ = ready_tx.send(());

        debug!(addr = %local_addr, id = %hexid(&id), "transport bound");
        Ok((
            Self {
                socket,
                me,
                pending,
            },
            Inbound {
                ready: ready_rx,
                find_nodes: find_nodes_rx,
                find_value: find_value_rx,
                store: store_rx,
            },
        ))
    }

    /// The local contact: our id plus the address the socket bound to.
    pub fn contact(&self) -> Contact {
        self.me.clone()
    }

    async fn send(&self, envelope: &Envelope, addr: SocketAddr) -> Result<()> {
        let bytes = encode(envelope)?;
        if bytes.len() > MAX_DATAGRAM {
            bail!("envelope of {} bytes exceeds datagram limit", bytes.len());
        }
        self.socket.send_to(&bytes, addr).await?;
        Ok(())
    }

    /// One request/reply exchange: register the session, send, await the
    /// reply or time out.
    async fn request(&self, message: Message, addr: SocketAddr) -> Result<Message> {
        let session = new_session();
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(session, reply_tx);
        }

        let envelope = Envelope { session, message };
        if let Err(err) = self.send(&envelope, addr).await {
            self.pending.lock().await.remove(&session);
            return Err(err);
        }

        match timeout(RPC_TIMEOUT, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(anyhow!("reply channel closed")),
            Err(_) => {
                self.pending.lock().await.remove(&session);
                Err(anyhow!("request to {addr} timed out"))
            }
        }
    }
}

#[async_trait]
impl Network for UdpNetwork {
    async fn ping(&self, addr: SocketAddr) -> Result<()> {
        let from = self.me.clone();
        match self.request(Message::Ping { from }, addr).await? {
            Message::Pong => Ok(()),
            other => bail!("unexpected reply to ping: {other:?}"),
        }
    }

    async fn find_nodes(&self, target: NodeId, addr: SocketAddr) -> Result<Vec<Contact>> {
        let from = self.me.clone();
        match self.request(Message::FindNodes { from, target }, addr).await? {
            Message::Nodes { closest } => Ok(closest),
            other => bail!("unexpected reply to node lookup: {other:?}"),
        }
    }

    async fn find_value(
        &self,
        key: Key,
        addr: SocketAddr,
    ) -> Result<(Option<Vec<u8>>, Vec<Contact>)> {
        let from = self.me.clone();
        match self.request(Message::FindValue { from, key }, addr).await? {
            Message::Value { value, closest, .. } => Ok((value, closest)),
            other => bail!("unexpected reply to value lookup: {other:?}"),
        }
    }

    async fn store(&self, value: Vec<u8>, addr: SocketAddr) -> Result<()> {
        let from = self.me.clone();
        match self.request(Message::Store { from, value }, addr).await? {
            Message::StoreAck => Ok(()),
            other => bail!("unexpected reply to store: {other:?}"),
        }
    }

    async fn send_nodes(
        &self,
        closest: Vec<Contact>,
        session: SessionId,
        addr: SocketAddr,
    ) -> Result<()> {
        let envelope = Envelope {
            session,
            message: Message::Nodes { closest },
        };
        self.send(&envelope, addr).await
    }

    async fn send_value(
        &self,
        key: Key,
        value: Option<Vec<u8>>,
        closest: Vec<Contact>,
        session: SessionId,
        addr: SocketAddr,
    ) -> Result<()> {
        let envelope = Envelope {
            session,
            message: Message::Value {
                key,
                value,
                closest,
            },
        };
        self.send(&envelope, addr).await
    }
}

/// Drain the socket: complete pending sessions for replies, answer PING and
/// acknowledge STORE in place, and queue requests for the handler loops.
async fn recv_loop(
    socket: Arc<UdpSocket>,
    pending: PendingMap,
    find_nodes_tx: mpsc::Sender<FindNodesRequest>,
    find_value_tx: mpsc::Sender<FindValueRequest>,
    store_tx: mpsc::Sender<StoreRequest>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, peer_addr) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                warn!(%err, "socket receive failed");
                continue;
            }
        };

        let envelope = match decode(&buf[..len]) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(peer = %peer_addr, %err, "dropping undecodable datagram");
                continue;
            }
        };

        let session = envelope.session;
        match envelope.message {
            Message::Ping { from } => {
                trace!(peer = %hexid(&from.id), "ping");
                send_reply(&socket, session, Message::Pong, peer_addr).await;
            }
            Message::FindNodes { from, target } => {
                let request = FindNodesRequest {
                    from,
                    target,
                    session,
                };
                if find_nodes_tx.send(request).await.is_err() {
                    return; // node is gone, stop serving
                }
            }
            Message::FindValue { from, key } => {
                let request = FindValueRequest { from, key, session };
                if find_value_tx.send(request).await.is_err() {
                    return;
                }
            }
            Message::Store { from, value } => {
                send_reply(&socket, session, Message::StoreAck, peer_addr).await;
                let request = StoreRequest {
                    from,
                    value,
                    session,
                };
                if store_tx.send(request).await.is_err() {
                    return;
                }
            }
            reply @ (Message::Pong
            | Message::Nodes { .. }
            | Message::Value { .. }
            | Message::StoreAck) => {
                let waiter = pending.lock().await.remove(&session);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => {
                        trace!(peer = %peer_addr, "reply for unknown or expired session");
                    }
                }
            }
        }
    }
}

async fn send_reply(socket: &UdpSocket, session: SessionId, message: Message, addr: SocketAddr) {
    let envelope = Envelope { session, message };
    match encode(&envelope) {
        Ok(bytes) => {
            if let Err(err) = socket.send_to(&bytes, addr).await {
                debug!(peer = %addr, %err, "failed to send reply");
            }
        }
        Err(err) => warn!(%err, "failed to encode reply"),
    }
}
