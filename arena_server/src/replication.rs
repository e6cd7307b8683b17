//! Outbound replication queue.
//!
//! The simulation never touches sockets. It encodes packets into immutable
//! [`Datagram`]s here, and the transport drains them after each tick.

use std::net::SocketAddr;

use arena_shared::protocol::{Packet, Payload};
use bytes::Bytes;

/// Session token carried by every server -> client packet.
pub const SERVER_TOKEN: u32 = 0;

/// One encoded packet addressed to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub to: SocketAddr,
    pub bytes: Bytes,
}

#[derive(Debug, Default)]
pub struct Outbox {
    datagrams: Vec<Datagram>,
}

impl Outbox {
    pub fn send(&mut self, to: SocketAddr, payload: Payload) {
        let bytes = Packet::new(SERVER_TOKEN, payload).encode();
        self.datagrams.push(Datagram { to, bytes });
    }

    /// Encodes once and queues a copy for every endpoint.
    pub fn broadcast(&mut self, endpoints: &[SocketAddr], payload: Payload) {
        if endpoints.is_empty() {
            return;
        }
        let bytes = Packet::new(SERVER_TOKEN, payload).encode();
        self.datagrams.extend(endpoints.iter().map(|to| Datagram {
            to: *to,
            bytes: bytes.clone(),
        }));
    }

    pub fn len(&self) -> usize {
        self.datagrams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datagrams.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Datagram> {
        std::mem::take(&mut self.datagrams)
    }
}
