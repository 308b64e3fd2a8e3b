use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct KrpcMessage {
    #[serde(rename = "t", with = "serde_bytes")]
    pub transaction_id: Vec<u8>,

    #[serde(default)]
    #[serde(rename = "v", with = "serde_bytes")]
    pub version: Option<Vec<u8>>,

    #[serde(flatten)]
    pub variant: KrpcVariant,
}

impl KrpcMessage {
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<KrpcMessage> {
        let obj = serde_bencode::from_bytes(bytes.as_ref())?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_bencode::to_bytes(self).map_err(Error::Bencode)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "y")]
pub(crate) enum KrpcVariant {
    #[serde(rename = "q")]
    Request(KrpcRequest),

    #[serde(rename = "r")]
    Response(KrpcResponse),

    #[serde(rename = "e")]
    Error(KrpcError),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "q")]
pub(crate) enum KrpcRequest {
    #[serde(rename = "ping")]
    Ping {
        #[serde(rename = "a")]
        arguments: PingRequestArgs,
    },

    #[serde(rename = "find_node")]
    FindNode {
        #[serde(rename = "a")]
        arguments: FindNodeRequestArgs,
    },

    #[serde(rename = "get_peers")]
    GetPeers {
        #[serde(rename = "a")]
        arguments: GetPeersRequestArgs,
    },

    #[serde(rename = "announce_peer")]
    AnnouncePeer {
        #[serde(rename = "a")]
        arguments: AnnouncePeerRequestArgs,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)] // This means order matters! Order these from most to least detailed
pub(crate) enum KrpcResponse {
    GetPeers {
        #[serde(rename = "r")]
        arguments: GetPeersResponseArgs,
    },

    FindNode {
        #[serde(rename = "r")]
        arguments: FindNodeResponseArgs,
    },

    Ping {
        #[serde(rename = "r")]
        arguments: PingResponseArgs,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct KrpcError {
    #[serde(rename = "e")]
    pub error_info: Vec<serde_bencode::value::Value>,
}

// === Request arguments ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct PingRequestArgs {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct FindNodeRequestArgs {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    #[serde(with = "serde_bytes")]
    pub target: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct GetPeersRequestArgs {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    #[serde(with = "serde_bytes")]
    pub info_hash: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct AnnouncePeerRequestArgs {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    #[serde(with = "serde_bytes")]
    pub info_hash: Vec<u8>,

    pub port: u16,

    #[serde(with = "serde_bytes")]
    pub token: Vec<u8>,
}

// === Response arguments ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct PingResponseArgs {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct FindNodeResponseArgs {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    #[serde(with = "serde_bytes")]
    pub nodes: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct GetPeersResponseArgs {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    #[serde(with = "serde_bytes")]
    pub token: Vec<u8>,

    #[serde(default)]
    pub values: Option<Vec<serde_bytes::ByteBuf>>,

    #[serde(default)]
    #[serde(with = "serde_bytes")]
    pub nodes: Option<Vec<u8>>,
}
