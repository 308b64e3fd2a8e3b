//! Handlers turning inbound queries into responses.
//!
//! Handlers are pure with respect to the correlator: they see a snapshot of
//! the token secrets taken at dispatch time and reach routing state only
//! through the [Policy] trait, so they can run on fire-and-forget sub-tasks.

use std::net::SocketAddrV4;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::common::{Id, Node};
use crate::messages::{
    FindNodeResponseArguments, FindValueResponseArguments, PingResponseArguments,
    RequestSpecific, RequestTypeSpecific, ResponseSpecific,
};
use crate::policy::Policy;
use crate::rpc::tokens::Tokens;
use crate::store::PeerStore;

pub(crate) fn handle_query(
    request: &RequestSpecific,
    from: SocketAddrV4,
    own_id: Id,
    tokens: &Tokens,
    policy: &dyn Policy,
    store: &Mutex<PeerStore>,
) -> ResponseSpecific {
    match &request.request_type {
        RequestTypeSpecific::Ping => ResponseSpecific::Ping(PingResponseArguments {
            responder_id: own_id,
        }),

        RequestTypeSpecific::FindNode(arguments) => {
            ResponseSpecific::FindNode(FindNodeResponseArguments {
                responder_id: own_id,
                nodes: closest_excluding(policy, &arguments.target, from),
            })
        }

        RequestTypeSpecific::FindValue(arguments) => {
            let values = lock(store).find(&arguments.target);
            let token: Box<[u8]> = tokens.issue(from).into();

            if values.is_empty() {
                ResponseSpecific::FindValue(FindValueResponseArguments {
                    responder_id: own_id,
                    token,
                    values,
                    nodes: Some(closest_excluding(policy, &arguments.target, from)),
                })
            } else {
                ResponseSpecific::FindValue(FindValueResponseArguments {
                    responder_id: own_id,
                    token,
                    values,
                    nodes: None,
                })
            }
        }

        RequestTypeSpecific::Store(arguments) => {
            if tokens.validate(from, &arguments.token) {
                let peer = SocketAddrV4::new(*from.ip(), arguments.port);
                lock(store).store(arguments.info_hash, peer);
            } else {
                // No error goes back to the peer; a stale token only means
                // the announce is not recorded.
                debug!(?from, "store with an invalid token, ignoring");
            }

            ResponseSpecific::Ping(PingResponseArguments {
                responder_id: own_id,
            })
        }
    }
}

/// The asking peer never appears in its own answer; matching is by endpoint
/// only, the id it claims is irrelevant here.
fn closest_excluding(policy: &dyn Policy, target: &Id, from: SocketAddrV4) -> Vec<Node> {
    policy
        .closest_to(target)
        .into_iter()
        .filter(|node| *node.address() != from)
        .collect()
}

fn lock(store: &Mutex<PeerStore>) -> MutexGuard<'_, PeerStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
