//! Wire records exchanged between peers and the inbound channel bundle a
//! transport hands to the node.
//!
//! Every datagram carries an [`Envelope`]: a 256-bit session identifier plus
//! one [`Message`]. Replies echo the session of their request, which is how
//! the transport correlates a response with the task awaiting it.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::core::{Contact, Key, NodeId};

/// Opaque 256-bit request/reply correlation identifier.
pub type SessionId = [u8; 32];

/// A fresh random session identifier.
pub fn new_session() -> SessionId {
    let mut session = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut session);
    session
}

/// Largest datagram the transport will read or write. Values must fit in a
/// single envelope together with their JSON overhead.
pub const MAX_DATAGRAM: usize = 65_536;

/// One datagram: a session identifier and the message it carries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub session: SessionId,
    pub message: Message,
}

/// The RPC vocabulary of the overlay.
///
/// `Ping`/`FindNodes`/`FindValue`/`Store` are requests; `Pong`/`Nodes`/
/// `Value`/`StoreAck` answer them under the same session. A store carries the
/// value only — the receiver derives the key and never trusts one from the
/// wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    Ping { from: Contact },
    Pong,
    FindNodes { from: Contact, target: NodeId },
    Nodes { closest: Vec<Contact> },
    FindValue { from: Contact, key: Key },
    Value {
        key: Key,
        value: Option<Vec<u8>>,
        closest: Vec<Contact>,
    },
    Store { from: Contact, value: Vec<u8> },
    StoreAck,
}

pub fn encode(envelope: &Envelope) -> anyhow::Result<Vec<u8>> {
    Ok(serde_json::to_vec(envelope)?)
}

pub fn decode(bytes: &[u8]) -> anyhow::Result<Envelope> {
    Ok(serde_json::from_slice(bytes)?)
}

/// An inbound node lookup, to be answered with the session it carries.
#[derive(Clone, Debug)]
pub struct FindNodesRequest {
    pub from: Contact,
    pub target: NodeId,
    pub session: SessionId,
}

/// An inbound value lookup.
#[derive(Clone, Debug)]
pub struct FindValueRequest {
    pub from: Contact,
    pub key: Key,
    pub session: SessionId,
}

/// An inbound replication of a value. Acknowledged by the transport on
/// receipt; the node only ingests it.
#[derive(Clone, Debug)]
pub struct StoreRequest {
    pub from: Contact,
    pub value: Vec<u8>,
    pub session: SessionId,
}

/// The receiving half of a transport: a ready signal that fires once the
/// socket can both send and receive, and one channel per request kind so the
/// handler loops never wait on each other.
pub struct Inbound {
    pub ready: oneshot::Receiver<()>,
    pub find_nodes: mpsc::Receiver<FindNodesRequest>,
    pub find_value: mpsc::Receiver<FindValueRequest>,
    pub store: mpsc::Receiver<StoreRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(byte: u8) -> Contact {
        let mut id = [0u8; 32];
        id[0] = byte;
        Contact {
            id,
            addr: ([127, 0, 0, 1], 9000 + byte as u16).into(),
        }
    }

    #[test]
    fn envelope_roundtrips_through_json() {
        let envelope = Envelope {
            session: new_session(),
            message: Message::Store {
                from: contact(0x07),
                value: b"payload".to_vec(),
            },
        };

        let bytes = encode(&envelope).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.session, envelope.session);
        match decoded.message {
            Message::Store { from, value } => {
                assert_eq!(from, contact(0x07));
                assert_eq!(value, b"payload");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn sessions_are_distinct() {
        assert_ne!(new_session(), new_session());
    }
}
