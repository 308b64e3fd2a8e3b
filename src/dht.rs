//! Dht node: wires the state actor, the correlator, and the refresh worker.
//!
//! The state actor is the sole owner of [RoutingMeta]; everything else
//! reaches it through its mailbox. Range-refresh timers land in the same
//! mailbox stream, so every routing mutation is serialized.

use std::net::SocketAddrV4;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use flume::{Receiver, RecvError, Selector, Sender};
use tracing::{debug, info, trace};

use crate::common::{Id, Node};
use crate::policy::Policy;
use crate::routing::meta::{InactiveRange, NodeState, RangeState, RoutingMeta};
use crate::routing::table::{Range, RoutingTable};
use crate::rpc::{Config, Rpc};
use crate::store::PeerStore;
use crate::timer::Timers;
use crate::{Error, Result};

// Server-side storage bounds.
const MAX_INFO_HASHES: usize = 2000;
const MAX_PEERS: usize = 500;

/// A DHT node: a routing-state actor plus the KRPC correlator.
#[derive(Debug)]
pub struct Dht {
    id: Id,
    rpc: Rpc,
    state: Sender<StateMessage>,
    refresh: Sender<Id>,
    handle: Option<JoinHandle<()>>,
}

impl Dht {
    pub fn new(config: Config) -> Result<Dht> {
        Self::with_id(config, Id::random())
    }

    /// Start a node with an explicit id.
    pub fn with_id(config: Config, id: Id) -> Result<Dht> {
        let (mailbox_sender, mailbox) = flume::unbounded();
        let (range_sender, range_events) = flume::unbounded();
        let (refresh_sender, refresh_events) = flume::unbounded();

        let table = RoutingTable::new(id);
        let (own_id, meta) = RoutingMeta::new(table, Timers::new(range_sender));

        let policy = Arc::new(StateHandle {
            id: own_id,
            sender: mailbox_sender.clone(),
        });

        let store = Arc::new(Mutex::new(PeerStore::new(
            NonZeroUsize::new(MAX_INFO_HASHES).expect("nonzero"),
            NonZeroUsize::new(MAX_PEERS).expect("nonzero"),
        )));

        let rpc = Rpc::spawn(&config, policy.clone(), store)?;

        let actor = StateActor {
            meta,
            mailbox,
            range_events,
            refresh: refresh_sender.clone(),
        };
        let handle = thread::Builder::new()
            .name("dht-state".into())
            .spawn(move || actor.run())?;

        spawn_refresh_worker(refresh_events, policy, rpc.clone())?;

        info!(?own_id, local_addr = ?rpc.local_addr(), "DHT node started");

        Ok(Dht {
            id: own_id,
            rpc,
            state: mailbox_sender,
            refresh: refresh_sender,
            handle: Some(handle),
        })
    }

    // === Getters ===

    pub fn id(&self) -> Id {
        self.id
    }

    /// Returns the address the node is listening on.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.rpc.local_addr()
    }

    /// The correlator handle, for issuing raw RPCs.
    pub fn rpc(&self) -> &Rpc {
        &self.rpc
    }

    // === Public Methods ===

    /// Ping the given routers and walk one lookup round toward our own id
    /// to seed the routing table.
    pub fn bootstrap(&self, routers: &[SocketAddrV4]) {
        for router in routers {
            match self.rpc.ping(*router) {
                Ok(Some(id)) => {
                    let _ = self
                        .state
                        .send(StateMessage::RequestSuccess(Node::new(id, *router)));
                }
                Ok(None) => debug!(?router, "Bootstrap router did not answer"),
                Err(error) => debug!(?error, ?router, "Bootstrap ping failed"),
            }
        }

        // The refresh worker queries the closest known nodes for our own
        // neighborhood and inserts whatever comes back.
        let _ = self.refresh.send(self.id);
    }

    /// A snapshot of the nodes currently in the routing table.
    pub fn routing_table(&self) -> Vec<Node> {
        let (reply, receiver) = flume::bounded(1);
        if self.state.send(StateMessage::Export(reply)).is_err() {
            return Vec::new();
        }
        receiver.recv().unwrap_or_default()
    }

    /// Ask the state actor to stop, then the correlator.
    pub fn shutdown(&self) {
        let _ = self.state.send(StateMessage::Shutdown);
        self.rpc.shutdown();
    }

    /// [Self::shutdown] and wait for the state actor to exit.
    pub fn block_until_shutdown(mut self) {
        self.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Dht {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum StateMessage {
    InsertNode(Node),
    RequestSuccess(Node),
    RequestTimeout(Node),
    ClosestTo(Id, Sender<Vec<Node>>),
    Export(Sender<Vec<Node>>),
    Shutdown,
}

/// The correlator's and refresh worker's view of the state actor.
struct StateHandle {
    id: Id,
    sender: Sender<StateMessage>,
}

impl StateHandle {
    fn request_timeout(&self, node: Node) {
        let _ = self.sender.send(StateMessage::RequestTimeout(node));
    }
}

impl Policy for StateHandle {
    fn node_id(&self) -> Id {
        self.id
    }

    fn closest_to(&self, target: &Id) -> Vec<Node> {
        let (reply, receiver) = flume::bounded(1);
        if self
            .sender
            .send(StateMessage::ClosestTo(*target, reply))
            .is_err()
        {
            return Vec::new();
        }
        receiver.recv().unwrap_or_default()
    }

    fn insert_node(&self, node: Node) {
        let _ = self.sender.send(StateMessage::InsertNode(node));
    }

    fn request_success(&self, node: Node) {
        let _ = self.sender.send(StateMessage::RequestSuccess(node));
    }
}

struct StateActor {
    meta: RoutingMeta,
    mailbox: Receiver<StateMessage>,
    range_events: Receiver<InactiveRange>,
    refresh: Sender<Id>,
}

enum StateEvent {
    Message(std::result::Result<StateMessage, RecvError>),
    Range(std::result::Result<InactiveRange, RecvError>),
}

impl StateActor {
    fn run(mut self) {
        loop {
            let event = Selector::new()
                .recv(&self.mailbox, StateEvent::Message)
                .recv(&self.range_events, StateEvent::Range)
                .wait();

            match event {
                StateEvent::Message(Ok(message)) => {
                    if self.handle_message(message) {
                        break;
                    }
                }
                StateEvent::Message(Err(_)) => break,
                StateEvent::Range(Ok(InactiveRange(range))) => self.handle_inactive_range(range),
                StateEvent::Range(Err(_)) => break,
            }
        }
    }

    /// Returns true on shutdown.
    fn handle_message(&mut self, message: StateMessage) -> bool {
        match message {
            StateMessage::InsertNode(node) => self.admit(node, false),
            StateMessage::RequestSuccess(node) => self.admit(node, true),
            StateMessage::RequestTimeout(node) => self.meta.node_timeout(&node),
            StateMessage::ClosestTo(target, reply) => {
                let _ = reply.send(self.meta.closest_to(&target));
            }
            StateMessage::Export(reply) => {
                let _ = reply.send(self.meta.node_list());
            }
            StateMessage::Shutdown => return true,
        }

        false
    }

    /// Admit a node we heard from: touch it if known, insert it otherwise,
    /// and fall back to replacing a bad neighbor when its bucket is full.
    fn admit(&mut self, node: Node, reachable: bool) {
        if self.meta.is_member(&node) {
            self.meta.node_touch(&node, reachable);
            return;
        }

        match self.meta.insert(node) {
            Ok(()) => {
                if reachable {
                    self.meta.node_touch(&node, true);
                }
            }
            Err(_) => {
                let range = self.meta.range_of(node.id());
                let bad = self
                    .meta
                    .range_members(&range)
                    .into_iter()
                    .find(|member| {
                        matches!(self.meta.node_state(member), Some(NodeState::Bad))
                    });

                match bad {
                    Some(old) => {
                        trace!(?old, new = ?node, "Replacing a bad node");
                        if self.meta.replace(&old, node).is_ok() && reachable {
                            self.meta.node_touch(&node, true);
                        }
                    }
                    None => trace!(?node, "Routing table refused node"),
                }
            }
        }
    }

    fn handle_inactive_range(&mut self, range: Range) {
        match self.meta.range_state(&range) {
            Ok(RangeState::Ok) => self.meta.reset_range_timer(&range, false),
            Ok(RangeState::Empty) => self.meta.reset_range_timer(&range, true),
            Ok(RangeState::NeedsRefresh(target)) => {
                debug!(?range, "Range went stale, refreshing");
                self.meta.reset_range_timer(&range, true);
                let _ = self.refresh.send(target);
            }
            Err(Error::NotMember) => {
                // The range vanished in a split and this is the late firing
                // of a cancelled timer.
                trace!(?range, "Timer fired for a vanished range");
            }
            Err(error) => debug!(?error, ?range, "range_state failed"),
        }
    }
}

/// Refresh lookups run on their own thread so a slow peer never stalls the
/// state actor.
fn spawn_refresh_worker(
    targets: Receiver<Id>,
    state: Arc<StateHandle>,
    rpc: Rpc,
) -> Result<()> {
    thread::Builder::new()
        .name("dht-refresh".into())
        .spawn(move || {
            for target in targets.iter() {
                let candidates = state.closest_to(&target);
                if candidates.is_empty() {
                    debug!(?target, "No candidates to refresh toward");
                    continue;
                }

                for node in candidates {
                    match rpc.find_node(node) {
                        Ok((_, found)) => {
                            for fresh in found {
                                state.insert_node(fresh);
                            }
                        }
                        Err(Error::Timeout) => state.request_timeout(node),
                        Err(error) => debug!(?error, ?node, "Refresh lookup failed"),
                    }
                }
            }
        })?;

    Ok(())
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    fn config() -> Config {
        Config {
            port: Some(0),
            request_timeout: Duration::from_millis(300),
            ..Default::default()
        }
    }

    fn local(dht: &Dht) -> SocketAddrV4 {
        SocketAddrV4::new([127, 0, 0, 1].into(), dht.local_addr().port())
    }

    #[test]
    fn shutdown() {
        let dht = Dht::new(config()).unwrap();

        let clone_state = dht.state.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let _ = clone_state.send(StateMessage::Shutdown);
        });

        dht.block_until_shutdown();
    }

    #[test]
    fn two_nodes_learn_about_each_other() {
        let a = Dht::new(config()).unwrap();
        let b = Dht::new(config()).unwrap();

        a.bootstrap(&[local(&b)]);

        // The ping seeded b into a's table; serving it taught b about a.
        let sees = |dht: &Dht, other: &Dht| {
            dht.routing_table()
                .iter()
                .any(|node| *node.id() == other.id())
        };

        assert!(sees(&a, &b));

        // b learns a from the inbound traffic; give its actor a moment.
        for _ in 0..50 {
            if sees(&b, &a) {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("b never learned about a");
    }
}
