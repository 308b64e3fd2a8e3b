//! Main Crate Error

use std::net::SocketAddrV4;

#[derive(thiserror::Error, Debug)]
/// Warren crate error enum.
pub enum Error {
    /// An outstanding request exceeded its timeout without a reply.
    #[error("request timed out")]
    Timeout,

    /// Ran out of attempts to pick a transaction tag that is not already
    /// in flight to this endpoint.
    #[error("no free transaction tag for {0}")]
    TagExhausted(SocketAddrV4),

    /// The routing table refused the node (full bucket that cannot split).
    #[error("routing table refused the node")]
    NotInserted,

    /// The given range is not a current bucket of the routing table.
    #[error("not a range of the routing table")]
    NotMember,

    /// A remote node answered with a KRPC error message.
    #[error("remote error {code}: {message}")]
    Remote {
        /// KRPC error code.
        code: i32,
        /// Human readable description sent by the remote.
        message: String,
    },

    /// A correlated response did not have the shape the request kind expects.
    #[error("unexpected response shape")]
    UnexpectedResponse,

    /// Indicates that an id argument has the wrong number of bytes.
    #[error("invalid id size: {0}")]
    InvalidIdSize(usize),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    Io(#[from] std::io::Error),

    #[error("failed to parse packet bytes: {0}")]
    Bencode(#[from] serde_bencode::Error),

    /// Codec-level message shape errors.
    #[error("malformed message: {0}")]
    Static(&'static str),
}
