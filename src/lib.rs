#![doc = include_str!("../README.md")]

//! # Warren
//! Kademlia (BEP-5 style) DHT node: routing liveness metadata and a
//! single-socket KRPC correlator.

mod common;
mod error;

pub mod dht;
pub mod messages;
pub mod policy;
pub mod routing;
pub mod rpc;
pub mod store;
pub mod timer;

pub use crate::common::{Id, Node};
pub use dht::Dht;
pub use error::Error;
pub use policy::Policy;

// Alias Result to be the crate Result.
pub type Result<T, E = error::Error> = core::result::Result<T, E>;
