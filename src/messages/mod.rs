//! Typed KRPC messages and their bencode wire form.
//!
//! The wire format follows [BEP_0005](https://www.bittorrent.org/beps/bep_0005.html):
//! the `find_value` and `store` operations of this crate are carried by the
//! `get_peers` and `announce_peer` wire verbs.

mod internal;

use std::convert::TryInto;
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::common::{Id, Node, ID_SIZE};
use crate::{Error, Result};

/// Compact node info is 20 bytes of id followed by 6 bytes of endpoint.
const COMPACT_NODE_SIZE: usize = ID_SIZE + 6;

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    /// The transaction tag correlating a response with its query.
    pub transaction_id: u16,

    /// The version of the requester or responder.
    pub version: Option<[u8; 4]>,

    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),

    Error(ErrorSpecific),
}

#[derive(Debug, PartialEq, Clone)]
pub struct ErrorSpecific {
    pub code: i32,
    pub description: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct RequestSpecific {
    pub requester_id: Id,
    pub request_type: RequestTypeSpecific,
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestTypeSpecific {
    Ping,
    FindNode(FindNodeRequestArguments),
    FindValue(FindValueRequestArguments),
    Store(StoreRequestArguments),
}

#[derive(Debug, PartialEq, Clone)]
pub enum ResponseSpecific {
    /// Also acknowledges a `store`; on the wire the two are identical.
    Ping(PingResponseArguments),
    FindNode(FindNodeResponseArguments),
    FindValue(FindValueResponseArguments),
}

// === PING ===

#[derive(Debug, PartialEq, Clone)]
pub struct PingResponseArguments {
    pub responder_id: Id,
}

// === FIND_NODE ===

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeRequestArguments {
    pub target: Id,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeResponseArguments {
    pub responder_id: Id,
    pub nodes: Vec<Node>,
}

// === FIND_VALUE (wire: get_peers) ===

#[derive(Debug, PartialEq, Clone)]
pub struct FindValueRequestArguments {
    pub target: Id,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindValueResponseArguments {
    pub responder_id: Id,
    pub token: Box<[u8]>,
    pub values: Vec<SocketAddrV4>,
    pub nodes: Option<Vec<Node>>,
}

// === STORE (wire: announce_peer) ===

#[derive(Debug, PartialEq, Clone)]
pub struct StoreRequestArguments {
    pub token: Box<[u8]>,
    pub info_hash: Id,
    pub port: u16,
}

impl Message {
    fn into_serde_message(self) -> internal::KrpcMessage {
        internal::KrpcMessage {
            transaction_id: self.transaction_id.to_be_bytes().to_vec(),
            version: self.version.map(|v| v.to_vec()),
            variant: match self.message_type {
                MessageType::Request(request) => {
                    let id = request.requester_id.to_vec();

                    internal::KrpcVariant::Request(match request.request_type {
                        RequestTypeSpecific::Ping => internal::KrpcRequest::Ping {
                            arguments: internal::PingRequestArgs { id },
                        },
                        RequestTypeSpecific::FindNode(args) => internal::KrpcRequest::FindNode {
                            arguments: internal::FindNodeRequestArgs {
                                id,
                                target: args.target.to_vec(),
                            },
                        },
                        RequestTypeSpecific::FindValue(args) => internal::KrpcRequest::GetPeers {
                            arguments: internal::GetPeersRequestArgs {
                                id,
                                info_hash: args.target.to_vec(),
                            },
                        },
                        RequestTypeSpecific::Store(args) => internal::KrpcRequest::AnnouncePeer {
                            arguments: internal::AnnouncePeerRequestArgs {
                                id,
                                info_hash: args.info_hash.to_vec(),
                                port: args.port,
                                token: args.token.into_vec(),
                            },
                        },
                    })
                }

                MessageType::Response(response) => {
                    internal::KrpcVariant::Response(match response {
                        ResponseSpecific::Ping(args) => internal::KrpcResponse::Ping {
                            arguments: internal::PingResponseArgs {
                                id: args.responder_id.to_vec(),
                            },
                        },
                        ResponseSpecific::FindNode(args) => internal::KrpcResponse::FindNode {
                            arguments: internal::FindNodeResponseArgs {
                                id: args.responder_id.to_vec(),
                                nodes: nodes_to_bytes(&args.nodes),
                            },
                        },
                        ResponseSpecific::FindValue(args) => internal::KrpcResponse::GetPeers {
                            arguments: internal::GetPeersResponseArgs {
                                id: args.responder_id.to_vec(),
                                token: args.token.into_vec(),
                                values: if args.values.is_empty() {
                                    None
                                } else {
                                    Some(
                                        args.values
                                            .iter()
                                            .map(|peer| {
                                                serde_bytes::ByteBuf::from(
                                                    peer_to_bytes(peer).to_vec(),
                                                )
                                            })
                                            .collect(),
                                    )
                                },
                                nodes: args.nodes.map(|nodes| nodes_to_bytes(&nodes)),
                            },
                        },
                    })
                }

                MessageType::Error(error) => {
                    internal::KrpcVariant::Error(internal::KrpcError {
                        error_info: vec![
                            serde_bencode::value::Value::Int(error.code.into()),
                            serde_bencode::value::Value::Bytes(error.description.into()),
                        ],
                    })
                }
            },
        }
    }

    fn from_serde_message(message: internal::KrpcMessage) -> Result<Message> {
        Ok(Message {
            transaction_id: transaction_id(&message.transaction_id)?,
            version: message
                .version
                .and_then(|v| v.as_slice().try_into().ok()),

            message_type: match message.variant {
                internal::KrpcVariant::Request(request) => MessageType::Request(match request {
                    internal::KrpcRequest::Ping { arguments } => RequestSpecific {
                        requester_id: Id::from_bytes(&arguments.id)?,
                        request_type: RequestTypeSpecific::Ping,
                    },
                    internal::KrpcRequest::FindNode { arguments } => RequestSpecific {
                        requester_id: Id::from_bytes(&arguments.id)?,
                        request_type: RequestTypeSpecific::FindNode(FindNodeRequestArguments {
                            target: Id::from_bytes(&arguments.target)?,
                        }),
                    },
                    internal::KrpcRequest::GetPeers { arguments } => RequestSpecific {
                        requester_id: Id::from_bytes(&arguments.id)?,
                        request_type: RequestTypeSpecific::FindValue(FindValueRequestArguments {
                            target: Id::from_bytes(&arguments.info_hash)?,
                        }),
                    },
                    internal::KrpcRequest::AnnouncePeer { arguments } => RequestSpecific {
                        requester_id: Id::from_bytes(&arguments.id)?,
                        request_type: RequestTypeSpecific::Store(StoreRequestArguments {
                            token: arguments.token.into_boxed_slice(),
                            info_hash: Id::from_bytes(&arguments.info_hash)?,
                            port: arguments.port,
                        }),
                    },
                }),

                internal::KrpcVariant::Response(response) => MessageType::Response(match response {
                    internal::KrpcResponse::Ping { arguments } => {
                        ResponseSpecific::Ping(PingResponseArguments {
                            responder_id: Id::from_bytes(&arguments.id)?,
                        })
                    }
                    internal::KrpcResponse::FindNode { arguments } => {
                        ResponseSpecific::FindNode(FindNodeResponseArguments {
                            responder_id: Id::from_bytes(&arguments.id)?,
                            nodes: bytes_to_nodes(&arguments.nodes)?,
                        })
                    }
                    internal::KrpcResponse::GetPeers { arguments } => {
                        ResponseSpecific::FindValue(FindValueResponseArguments {
                            responder_id: Id::from_bytes(&arguments.id)?,
                            token: arguments.token.into_boxed_slice(),
                            values: arguments
                                .values
                                .unwrap_or_default()
                                .iter()
                                .map(|bytes| bytes_to_peer(bytes))
                                .collect::<Result<Vec<_>>>()?,
                            nodes: arguments
                                .nodes
                                .map(|bytes| bytes_to_nodes(&bytes))
                                .transpose()?,
                        })
                    }
                }),

                internal::KrpcVariant::Error(error) => {
                    if error.error_info.len() < 2 {
                        return Err(Error::Static(
                            "error packet should have at least 2 elements",
                        ));
                    }
                    MessageType::Error(ErrorSpecific {
                        code: match error.error_info[0] {
                            serde_bencode::value::Value::Int(code) => code
                                .try_into()
                                .map_err(|_| Error::Static("error code out of range"))?,
                            _ => return Err(Error::Static("expected error code as first element")),
                        },
                        description: match &error.error_info[1] {
                            serde_bencode::value::Value::Bytes(description) => {
                                String::from_utf8_lossy(description).into_owned()
                            }
                            _ => {
                                return Err(Error::Static(
                                    "expected error description as second element",
                                ))
                            }
                        },
                    })
                }
            },
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.clone().into_serde_message().to_bytes()
    }

    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message> {
        Message::from_serde_message(internal::KrpcMessage::from_bytes(bytes)?)
    }
}

/// Transaction tags are exactly two bytes on the wire; anything else came
/// from a foreign implementation we cannot correlate with.
fn transaction_id(bytes: &[u8]) -> Result<u16> {
    let bytes: [u8; 2] = bytes
        .try_into()
        .map_err(|_| Error::Static("expected a 2 byte transaction id"))?;

    Ok(u16::from_be_bytes(bytes))
}

fn nodes_to_bytes(nodes: &[Node]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(nodes.len() * COMPACT_NODE_SIZE);

    for node in nodes {
        bytes.extend_from_slice(&node.id().0);
        bytes.extend_from_slice(&peer_to_bytes(node.address()));
    }

    bytes
}

fn bytes_to_nodes(bytes: &[u8]) -> Result<Vec<Node>> {
    if bytes.len() % COMPACT_NODE_SIZE != 0 {
        return Err(Error::Static("wrong number of bytes for nodes"));
    }

    let mut nodes = Vec::with_capacity(bytes.len() / COMPACT_NODE_SIZE);
    for chunk in bytes.chunks_exact(COMPACT_NODE_SIZE) {
        let id = Id::from_bytes(&chunk[..ID_SIZE])?;
        let address = bytes_to_peer(&chunk[ID_SIZE..])?;
        nodes.push(Node::new(id, address));
    }

    Ok(nodes)
}

fn peer_to_bytes(peer: &SocketAddrV4) -> [u8; 6] {
    let mut bytes = [0_u8; 6];
    bytes[..4].copy_from_slice(&peer.ip().octets());
    bytes[4..].copy_from_slice(&peer.port().to_be_bytes());

    bytes
}

fn bytes_to_peer(bytes: &[u8]) -> Result<SocketAddrV4> {
    let bytes: [u8; 6] = bytes
        .try_into()
        .map_err(|_| Error::Static("wrong number of bytes for peer"))?;

    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);

    Ok(SocketAddrV4::new(ip, port))
}
