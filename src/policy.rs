//! Interface to the node-state actor that owns routing decisions.
//!
//! The correlator never touches the routing table directly; it reaches node
//! state only through this trait, so the table's owner can serialize every
//! mutation in its own mailbox.

use crate::common::{Id, Node};

pub trait Policy: Send + Sync + 'static {
    /// This node's id. Must be stable for the life of the process.
    fn node_id(&self) -> Id;

    /// The best nodes known around `target`, closest first.
    fn closest_to(&self, target: &Id) -> Vec<Node>;

    /// A node sent us traffic; consider it for the routing table.
    ///
    /// Called from the correlator's event loop: implementations must hand
    /// the node off (e.g. a channel send) rather than block.
    fn insert_node(&self, node: Node);

    /// A node answered one of our requests.
    ///
    /// Same non-blocking requirement as [Self::insert_node].
    fn request_success(&self, node: Node);
}
