//! Kademlia routing: the bucket table and its liveness metadata.

pub mod meta;
pub mod table;

pub use meta::{InactiveRange, NodeState, RangeState, RoutingMeta};
pub use table::{Range, RoutingTable, K};
