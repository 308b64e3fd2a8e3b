//! Single-socket KRPC correlator.
//!
//! One actor thread owns the UDP socket, the outstanding-request table, and
//! the rotating token secrets, serializing caller commands, inbound
//! datagrams, and timer expiries into a total order. Callers block on a
//! per-call reply channel and receive exactly one terminal answer: the
//! response, an error, or a timeout.

mod config;
mod outstanding;
mod server;
mod socket;
mod tokens;

use std::net::SocketAddrV4;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, RecvError, Sender};
use tracing::{debug, error, trace};

use crate::common::{Id, Node};
use crate::messages::{
    FindNodeRequestArguments, FindValueRequestArguments, Message, MessageType, RequestSpecific,
    RequestTypeSpecific, ResponseSpecific, StoreRequestArguments,
};
use crate::policy::Policy;
use crate::store::PeerStore;
use crate::timer::{TimerRef, Timers};
use crate::{Error, Result};

use outstanding::Outstanding;
use socket::{KrpcSocket, VERSION};

pub use config::Config;
pub use socket::{DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT, UDP_MAILBOX_SIZE};
pub use tokens::{Tokens, TOKEN_LIFETIME};

/// Answer to a [Rpc::find_value] call.
#[derive(Debug, Clone, PartialEq)]
pub enum FindValueResult {
    /// The queried node had endpoints stored for the target.
    Values {
        responder_id: Id,
        token: Box<[u8]>,
        peers: Vec<SocketAddrV4>,
    },
    /// Nothing stored; the closest nodes it knows instead.
    Nodes {
        responder_id: Id,
        token: Box<[u8]>,
        nodes: Vec<Node>,
    },
}

/// Handle to the correlator actor.
///
/// Cheap to clone; all clones talk to the same actor. The operations block
/// the calling thread until the actor delivers a terminal answer.
#[derive(Debug)]
pub struct Rpc {
    commands: Sender<Command>,
    local_addr: SocketAddrV4,
    handle: Option<JoinHandle<()>>,
}

impl Clone for Rpc {
    fn clone(&self) -> Self {
        Rpc {
            commands: self.commands.clone(),
            local_addr: self.local_addr,
            handle: None,
        }
    }
}

impl Rpc {
    /// Bind the socket and start the correlator actor.
    pub fn spawn(
        config: &Config,
        policy: Arc<dyn Policy>,
        store: Arc<Mutex<PeerStore>>,
    ) -> Result<Rpc> {
        let socket = KrpcSocket::bind(config)?;
        let local_addr = socket.local_addr();

        let (inbound_sender, inbound) = flume::bounded(UDP_MAILBOX_SIZE);
        socket.spawn_reader(inbound_sender)?;

        let (timer_sender, timer_events) = flume::unbounded();
        let (command_sender, commands) = flume::unbounded();

        let actor = Actor {
            own_id: policy.node_id(),
            socket,
            policy,
            store,
            tokens: Tokens::new(),
            outstanding: Outstanding::new(),
            timers: Timers::new(timer_sender),
            timer_events,
            commands,
            inbound,
            request_timeout: config.request_timeout,
            token_lifetime: config.token_lifetime,
        };

        let handle = thread::Builder::new()
            .name("krpc-correlator".into())
            .spawn(move || actor.run())?;

        Ok(Rpc {
            commands: command_sender,
            local_addr,
            handle: Some(handle),
        })
    }

    // === Getters ===

    /// Returns the address the server is listening on.
    #[inline]
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    // === Public Methods ===

    /// Ping a node. `Ok(None)` means no answer within the request timeout.
    pub fn ping(&self, to: SocketAddrV4) -> Result<Option<Id>> {
        self.call(|reply| Command::Ping { to, reply })?
    }

    /// Ask `peer` for the nodes closest to its own id. On success the
    /// policy actor is notified that the peer is alive.
    pub fn find_node(&self, peer: Node) -> Result<(Id, Vec<Node>)> {
        self.call(|reply| Command::FindNode { peer, reply })?
    }

    /// Ask the node at `to` for endpoints stored under `target`.
    pub fn find_value(&self, to: SocketAddrV4, target: Id) -> Result<FindValueResult> {
        self.call(|reply| Command::FindValue { to, target, reply })?
    }

    /// Announce to the node at `to` that we serve `info_hash` on `port`,
    /// echoing a `token` it previously gave us.
    pub fn store(
        &self,
        to: SocketAddrV4,
        token: Box<[u8]>,
        info_hash: Id,
        port: u16,
    ) -> Result<Id> {
        self.call(|reply| Command::Store {
            to,
            token,
            info_hash,
            port,
            reply,
        })?
    }

    /// Barrier: returns once every message submitted before it has been
    /// processed by the actor.
    pub fn sync(&self) -> Result<()> {
        self.call(Command::Sync)
    }

    /// Number of requests currently awaiting a reply or a timeout.
    pub fn pending_requests(&self) -> Result<usize> {
        self.call(Command::PendingRequests)
    }

    /// Ask the actor to stop. Pending waiters are dropped.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// [Self::shutdown] and wait for the actor thread to exit.
    pub fn block_until_shutdown(mut self) {
        self.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    // === Private Methods ===

    fn call<T>(&self, command: impl FnOnce(Sender<T>) -> Command) -> Result<T> {
        let (reply, receiver) = flume::bounded(1);

        self.commands
            .send(command(reply))
            .map_err(|_| Error::Static("correlator stopped"))?;

        receiver
            .recv()
            .map_err(|_| Error::Static("correlator stopped"))
    }
}

enum Command {
    Ping {
        to: SocketAddrV4,
        reply: Sender<Result<Option<Id>>>,
    },
    FindNode {
        peer: Node,
        reply: Sender<Result<(Id, Vec<Node>)>>,
    },
    FindValue {
        to: SocketAddrV4,
        target: Id,
        reply: Sender<Result<FindValueResult>>,
    },
    Store {
        to: SocketAddrV4,
        token: Box<[u8]>,
        info_hash: Id,
        port: u16,
        reply: Sender<Result<Id>>,
    },
    PendingRequests(Sender<usize>),
    Sync(Sender<()>),
    Shutdown,
}

enum TimerEvent {
    RequestTimeout { to: SocketAddrV4, tag: u16 },
    RotateTokens,
}

/// The caller blocked on one outgoing request, tagged with what it asked
/// for so the decoded response can be checked against the expected shape.
enum Waiter {
    Ping(Sender<Result<Option<Id>>>),
    FindNode {
        peer: Node,
        reply: Sender<Result<(Id, Vec<Node>)>>,
    },
    FindValue(Sender<Result<FindValueResult>>),
    Store(Sender<Result<Id>>),
}

impl Waiter {
    /// Deliver a terminal error. For a ping, a timeout is not an error but
    /// the regular "no pong" answer.
    fn fail(self, error: Error) {
        match self {
            Waiter::Ping(reply) => {
                let result = match error {
                    Error::Timeout => Ok(None),
                    other => Err(other),
                };
                let _ = reply.send(result);
            }
            Waiter::FindNode { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Waiter::FindValue(reply) => {
                let _ = reply.send(Err(error));
            }
            Waiter::Store(reply) => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

struct Pending {
    waiter: Waiter,
    timer: TimerRef,
}

struct Actor {
    own_id: Id,
    socket: KrpcSocket,
    policy: Arc<dyn Policy>,
    store: Arc<Mutex<PeerStore>>,
    tokens: Tokens,
    outstanding: Outstanding<Pending>,
    timers: Timers<TimerEvent>,
    timer_events: Receiver<TimerEvent>,
    commands: Receiver<Command>,
    inbound: Receiver<(Message, SocketAddrV4)>,
    request_timeout: Duration,
    token_lifetime: Duration,
}

enum Event {
    Command(Result<Command, RecvError>),
    Timer(Result<TimerEvent, RecvError>),
    Inbound(Result<(Message, SocketAddrV4), RecvError>),
}

impl Actor {
    fn run(mut self) {
        self.timers.arm(self.token_lifetime, TimerEvent::RotateTokens);

        loop {
            let event = flume::Selector::new()
                .recv(&self.commands, Event::Command)
                .recv(&self.timer_events, Event::Timer)
                .recv(&self.inbound, Event::Inbound)
                .wait();

            match event {
                Event::Command(Ok(command)) => {
                    if self.handle_command(command) {
                        break;
                    }
                }
                Event::Command(Err(_)) => {
                    // Every handle is gone; nobody can reach us anymore.
                    break;
                }
                Event::Timer(Ok(timer_event)) => self.handle_timer(timer_event),
                Event::Inbound(Ok((message, from))) => self.handle_inbound(message, from),
                Event::Timer(Err(_)) | Event::Inbound(Err(_)) => {
                    error!("correlator worker channel closed unexpectedly");
                    break;
                }
            }
        }
    }

    /// Returns true on shutdown.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Ping { to, reply } => {
                self.send_query(to, RequestTypeSpecific::Ping, Waiter::Ping(reply));
            }
            Command::FindNode { peer, reply } => {
                self.send_query(
                    *peer.address(),
                    RequestTypeSpecific::FindNode(FindNodeRequestArguments {
                        target: *peer.id(),
                    }),
                    Waiter::FindNode { peer, reply },
                );
            }
            Command::FindValue { to, target, reply } => {
                self.send_query(
                    to,
                    RequestTypeSpecific::FindValue(FindValueRequestArguments { target }),
                    Waiter::FindValue(reply),
                );
            }
            Command::Store {
                to,
                token,
                info_hash,
                port,
                reply,
            } => {
                self.send_query(
                    to,
                    RequestTypeSpecific::Store(StoreRequestArguments {
                        token,
                        info_hash,
                        port,
                    }),
                    Waiter::Store(reply),
                );
            }
            Command::PendingRequests(reply) => {
                let _ = reply.send(self.outstanding.len());
            }
            Command::Sync(reply) => {
                let _ = reply.send(());
            }
            Command::Shutdown => return true,
        }

        false
    }

    fn send_query(&mut self, to: SocketAddrV4, request_type: RequestTypeSpecific, waiter: Waiter) {
        let tag = match self.outstanding.allocate_tag(to, &mut rand::thread_rng()) {
            Ok(tag) => tag,
            Err(error) => {
                waiter.fail(error);
                return;
            }
        };

        let message = Message {
            transaction_id: tag,
            version: Some(VERSION),
            message_type: MessageType::Request(RequestSpecific {
                requester_id: self.own_id,
                request_type,
            }),
        };

        if let Err(error) = self.socket.send(to, &message) {
            debug!(?error, ?to, "Error sending request message");
            waiter.fail(error);
            return;
        }

        let timer = self
            .timers
            .arm(self.request_timeout, TimerEvent::RequestTimeout { to, tag });

        self.outstanding.insert(to, tag, Pending { waiter, timer });
    }

    fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::RequestTimeout { to, tag } => {
                // A miss means the reply won the race with the timer.
                if let Some(pending) = self.outstanding.remove(to, tag) {
                    trace!(?to, tag, "Request timed out");
                    pending.waiter.fail(Error::Timeout);
                }
            }
            TimerEvent::RotateTokens => {
                self.tokens.rotate();
                self.timers.arm(self.token_lifetime, TimerEvent::RotateTokens);
            }
        }
    }

    fn handle_inbound(&mut self, message: Message, from: SocketAddrV4) {
        match self.outstanding.remove(from, message.transaction_id) {
            Some(pending) => {
                self.timers.cancel(pending.timer);

                match message.message_type {
                    MessageType::Request(_) => {
                        // Only responses and errors may correlate with a
                        // request of ours.
                        panic!(
                            "incoming query from {from} matched in-flight request tag {}",
                            message.transaction_id
                        );
                    }
                    MessageType::Response(response) => self.deliver(pending.waiter, response),
                    MessageType::Error(remote) => pending.waiter.fail(Error::Remote {
                        code: remote.code,
                        message: remote.description,
                    }),
                }
            }
            None => match message.message_type {
                MessageType::Request(request) => {
                    self.handle_query(from, message.transaction_id, request)
                }
                _ => {
                    trace!(
                        ?from,
                        tag = message.transaction_id,
                        "Unsolicited response, dropping"
                    );
                }
            },
        }
    }

    fn deliver(&self, waiter: Waiter, response: ResponseSpecific) {
        match waiter {
            Waiter::Ping(reply) => {
                let result = match response {
                    ResponseSpecific::Ping(arguments) => Ok(Some(arguments.responder_id)),
                    _ => Err(Error::UnexpectedResponse),
                };
                let _ = reply.send(result);
            }

            Waiter::FindNode { peer, reply } => match response {
                ResponseSpecific::FindNode(arguments) => {
                    // The peer we addressed is reported alive, whatever id
                    // the response claims.
                    self.policy.request_success(peer);
                    let _ = reply.send(Ok((arguments.responder_id, arguments.nodes)));
                }
                _ => {
                    let _ = reply.send(Err(Error::UnexpectedResponse));
                }
            },

            Waiter::FindValue(reply) => {
                let result = match response {
                    ResponseSpecific::FindValue(arguments) => {
                        if arguments.values.is_empty() {
                            Ok(FindValueResult::Nodes {
                                responder_id: arguments.responder_id,
                                token: arguments.token,
                                nodes: arguments.nodes.unwrap_or_default(),
                            })
                        } else {
                            Ok(FindValueResult::Values {
                                responder_id: arguments.responder_id,
                                token: arguments.token,
                                peers: arguments.values,
                            })
                        }
                    }
                    _ => Err(Error::UnexpectedResponse),
                };
                let _ = reply.send(result);
            }

            Waiter::Store(reply) => {
                let result = match response {
                    ResponseSpecific::Ping(arguments) => Ok(arguments.responder_id),
                    _ => Err(Error::UnexpectedResponse),
                };
                let _ = reply.send(result);
            }
        }
    }

    /// Serve an unsolicited query off the critical path.
    fn handle_query(&self, from: SocketAddrV4, tag: u16, request: RequestSpecific) {
        // The sender is a live node; hand it to the policy actor. This is a
        // channel send and cannot block or fail into this loop.
        self.policy
            .insert_node(Node::new(request.requester_id, from));

        let own_id = self.own_id;
        let tokens = self.tokens.clone();
        let policy = self.policy.clone();
        let store = self.store.clone();
        let socket = match self.socket.try_clone() {
            Ok(socket) => socket,
            Err(error) => {
                debug!(?error, "Could not clone socket for response sub-task");
                return;
            }
        };

        let spawned = thread::Builder::new()
            .name("krpc-responder".into())
            .spawn(move || {
                let response =
                    server::handle_query(&request, from, own_id, &tokens, policy.as_ref(), &store);

                let message = Message {
                    transaction_id: tag,
                    version: Some(VERSION),
                    message_type: MessageType::Response(response),
                };

                if let Err(error) = socket.send(from, &message) {
                    debug!(?error, ?from, "Error sending response message");
                }
            });

        if let Err(error) = spawned {
            debug!(?error, "Could not spawn response sub-task");
        }
    }
}
