//! One-shot timers delivered as mailbox messages.
//!
//! Actors in this crate never take callbacks from a timer facility; instead a
//! timer enqueues a message on the owning actor's channel so that expiries
//! are processed in the same serial stream as every other event. A
//! cancellation that loses the race with delivery results in one late
//! message, which the owner identifies (and drops) by the absence of its key
//! in whatever table the timer belonged to.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::trace;

/// Handle to a pending one-shot timer, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRef(u64);

enum Command<M> {
    Arm {
        id: u64,
        deadline: Instant,
        message: M,
    },
    Cancel(u64),
}

/// A facility arming one-shot timers that deliver messages of type `M` on a
/// [flume] channel.
///
/// Each facility owns one worker thread; the worker exits once every handle
/// and the output receiver are gone.
#[derive(Debug)]
pub struct Timers<M> {
    commands: Sender<Command<M>>,
    next_id: Arc<AtomicU64>,
}

impl<M> Clone for Timers<M> {
    fn clone(&self) -> Self {
        Timers {
            commands: self.commands.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<M: Send + 'static> Timers<M> {
    /// Create a facility delivering expired timers' messages to `output`.
    pub fn new(output: Sender<M>) -> Self {
        let (commands, receiver) = flume::unbounded();

        // The worker is detached; it stops on its own when the command
        // channel and the output receiver are both dropped.
        let _ = thread::Builder::new()
            .name("timers".into())
            .spawn(move || run(receiver, output));

        Timers {
            commands,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Arm a timer firing `delay` from now.
    pub fn arm(&self, delay: Duration, message: M) -> TimerRef {
        self.arm_at(Instant::now() + delay, message)
    }

    /// Arm a timer firing at `deadline`. A deadline already in the past
    /// fires immediately.
    pub fn arm_at(&self, deadline: Instant, message: M) -> TimerRef {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.commands.send(Command::Arm {
            id,
            deadline,
            message,
        });

        TimerRef(id)
    }

    /// Cancel a pending timer. Cancelling a timer that already fired is a
    /// no-op; the late message is the owner's to drop.
    pub fn cancel(&self, timer: TimerRef) {
        let _ = self.commands.send(Command::Cancel(timer.0));
    }
}

fn run<M>(commands: Receiver<Command<M>>, output: Sender<M>) {
    // Pending timers ordered by deadline; the id breaks ties between timers
    // armed for the same instant.
    let mut queue: BTreeMap<(Instant, u64), M> = BTreeMap::new();
    let mut deadlines: HashMap<u64, Instant> = HashMap::new();

    loop {
        let now = Instant::now();

        loop {
            let due = match queue.keys().next() {
                Some(key) if key.0 <= now => *key,
                _ => break,
            };

            if let Some(message) = queue.remove(&due) {
                deadlines.remove(&due.1);
                if output.send(message).is_err() {
                    trace!("timer output receiver gone, stopping worker");
                    return;
                }
            }
        }

        let command = match queue.keys().next() {
            Some((deadline, _)) => match commands.recv_deadline(*deadline) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => return,
            },
        };

        match command {
            Some(Command::Arm {
                id,
                deadline,
                message,
            }) => {
                queue.insert((deadline, id), message);
                deadlines.insert(id, deadline);
            }
            Some(Command::Cancel(id)) => {
                if let Some(deadline) = deadlines.remove(&id) {
                    queue.remove(&(deadline, id));
                }
            }
            None => {}
        }
    }
}
