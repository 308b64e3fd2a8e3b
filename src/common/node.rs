//! Struct and implementation of the Node entry in the Kademlia routing table

use std::fmt::{self, Debug, Formatter};
use std::net::SocketAddrV4;

use crate::common::Id;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
/// Node entry in the Kademlia routing table
pub struct Node {
    pub(crate) id: Id,
    pub(crate) address: SocketAddrV4,
}

impl Debug for Node {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Node")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish()
    }
}

impl Node {
    /// Creates a new Node from an id and socket address.
    pub fn new(id: Id, address: SocketAddrV4) -> Node {
        Node { id, address }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn address(&self) -> &SocketAddrV4 {
        &self.address
    }

    /// Creates a node with a random Id for testing purposes.
    pub fn random() -> Node {
        Node {
            id: Id::random(),
            address: SocketAddrV4::new([0, 0, 0, 0].into(), 0),
        }
    }
}
