//! Timer-backed cancellation sources.
//!
//! A single background driver thread owns every armed timeout: a heap of
//! deadlines plus a map from [`TimerId`] to the token state it should
//! cancel. The driver holds only weak references, so an armed timer never
//! keeps otherwise-unreferenced token state alive, and a token dropped
//! before its deadline simply expires into nothing.

mod timeout;

pub use timeout::{timeout, TimeoutSource};

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use once_cell::sync::Lazy;
use tracing::trace;

use crate::reason::Reason;
use crate::token::Inner;

/// A unique identifier for an armed timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

static TIMER_COUNTER: AtomicU64 = AtomicU64::new(1);

impl TimerId {
    fn next() -> TimerId {
        TimerId(TIMER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

enum Command {
    Arm {
        id: TimerId,
        deadline: Instant,
        target: Weak<Inner>,
    },
    Disarm(TimerId),
}

struct Driver {
    commands: Sender<Command>,
}

static DRIVER: Lazy<Driver> = Lazy::new(Driver::start);

impl Driver {
    fn start() -> Driver {
        let (commands, mailbox) = unbounded();
        thread::Builder::new()
            .name("cancel-timer".into())
            .spawn(move || drive(mailbox))
            .expect("failed to spawn timer driver thread");
        Driver { commands }
    }
}

/// Arm the driver to cancel `target` with [`Reason::TimedOut`] at `deadline`.
pub(crate) fn arm(deadline: Instant, target: Weak<Inner>) -> TimerId {
    let id = TimerId::next();
    trace!(?id, "arming timeout");
    let _ = DRIVER.commands.send(Command::Arm {
        id,
        deadline,
        target,
    });
    id
}

/// Drop an armed timer. Idempotent; disarming a fired timer is a no-op.
pub(crate) fn disarm(id: TimerId) {
    trace!(?id, "disarming timeout");
    let _ = DRIVER.commands.send(Command::Disarm(id));
}

fn drive(mailbox: Receiver<Command>) {
    let mut deadlines: BinaryHeap<Reverse<(Instant, TimerId)>> = BinaryHeap::new();
    let mut armed: HashMap<TimerId, Weak<Inner>> = HashMap::new();

    loop {
        let now = Instant::now();
        while let Some(Reverse((deadline, id))) = deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            deadlines.pop();
            // Disarmed entries linger in the heap; the map is authoritative.
            if let Some(target) = armed.remove(&id) {
                if let Some(inner) = target.upgrade() {
                    trace!(?id, "timeout expired");
                    inner.cancel(Reason::TimedOut);
                }
            }
        }

        let command = match deadlines.peek().copied() {
            Some(Reverse((deadline, _))) => match mailbox.recv_deadline(deadline) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match mailbox.recv() {
                Ok(command) => command,
                Err(_) => return,
            },
        };

        match command {
            Command::Arm {
                id,
                deadline,
                target,
            } => {
                deadlines.push(Reverse((deadline, id)));
                armed.insert(id, target);
            }
            Command::Disarm(id) => {
                armed.remove(&id);
            }
        }
    }
}
