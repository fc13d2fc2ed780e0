//! Token state machine, listener registry, and the privileged `Source` side.
//!
//! A [`Source`] owns exactly one token's state. [`Token`] is the cheaply
//! cloneable read-only view handed to consumers. Cancellation is a one-shot,
//! monotonic transition: once cancelled, a token stays cancelled and its
//! reason is fixed by the first `cancel` call.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::warn;

use crate::reason::Reason;

/// Error raised at guard points when the observed token has been cancelled.
///
/// This is the expected, catchable signal that an operation was abandoned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("operation cancelled: {reason}")]
pub struct CancelledError {
    /// The reason the token was cancelled with.
    pub reason: Reason,
}

/// Error raised when reading [`Token::reason`] before cancellation.
///
/// Unlike [`CancelledError`] this indicates a programming error, not an
/// abandoned operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cancellation reason read before the token was cancelled")]
pub struct StateError;

type Listener = Box<dyn FnOnce(&Reason) + Send>;

enum State {
    /// Cancellation has not happened yet; registered listeners wait here.
    Pending {
        listeners: Vec<(u64, Listener)>,
        next_id: u64,
    },
    /// Cancelled with a fixed reason; the registry has been drained.
    Cancelled { reason: Reason },
    /// Will never cancel: the never-sentinel, or disposed while pending.
    Inert,
}

pub(crate) struct Inner {
    state: Mutex<State>,
}

impl Inner {
    fn pending() -> Self {
        Inner {
            state: Mutex::new(State::Pending {
                listeners: Vec::new(),
                next_id: 0,
            }),
        }
    }

    fn inert() -> Self {
        Inner {
            state: Mutex::new(State::Inert),
        }
    }

    fn cancelled(reason: Reason) -> Self {
        Inner {
            state: Mutex::new(State::Cancelled { reason }),
        }
    }

    /// Transition to cancelled and broadcast to every registered listener.
    ///
    /// Returns whether this call performed the transition. The registry is
    /// drained under the lock but listeners run with the lock released, so a
    /// listener may reenter `cancel`, `on_cancelled`, or `unregister`.
    pub(crate) fn cancel(&self, reason: Reason) -> bool {
        let drained = {
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                State::Pending { listeners, .. } => {
                    let drained = std::mem::take(listeners);
                    *state = State::Cancelled {
                        reason: reason.clone(),
                    };
                    drained
                }
                _ => return false,
            }
        };
        for (_, listener) in drained {
            // One failing listener must not block delivery to the rest.
            if catch_unwind(AssertUnwindSafe(|| listener(&reason))).is_err() {
                warn!(%reason, "cancellation listener panicked during broadcast");
            }
        }
        true
    }

    fn dispose(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, State::Pending { .. }) {
            *state = State::Inert;
        }
    }
}

/// Read-only view of a cancellation signal.
///
/// Tokens are cheap to clone; every clone observes the same state. Consumers
/// poll [`is_cancelled`](Token::is_cancelled), register a listener with
/// [`on_cancelled`](Token::on_cancelled), or wrap work with the guard points
/// ([`check`](Token::check), `CancellableFutureExt::cancellable`).
#[derive(Clone)]
pub struct Token {
    inner: Arc<Inner>,
}

static NEVER: Lazy<Token> = Lazy::new(|| Token {
    inner: Arc::new(Inner::inert()),
});

impl Token {
    /// The shared sentinel token that can never be cancelled.
    ///
    /// Listener registration on it is a permanent no-op.
    pub fn never() -> Token {
        NEVER.clone()
    }

    /// A fresh token that is already cancelled with `reason`.
    pub fn cancelled(reason: impl Into<Reason>) -> Token {
        Token {
            inner: Arc::new(Inner::cancelled(reason.into())),
        }
    }

    /// Whether cancellation has fired. Monotonic: never reverts to `false`.
    pub fn is_cancelled(&self) -> bool {
        matches!(*self.inner.state.lock().unwrap(), State::Cancelled { .. })
    }

    /// Whether this token can still deliver (or has delivered) a cancellation.
    ///
    /// `false` only for the never-sentinel and for tokens disposed while
    /// pending. A cancelled token reports `true`: it did get cancelled, and
    /// late listener registration still fires.
    pub fn can_be_cancelled(&self) -> bool {
        !matches!(*self.inner.state.lock().unwrap(), State::Inert)
    }

    /// The reason this token was cancelled with.
    ///
    /// Fails with [`StateError`] while the token is not cancelled.
    pub fn reason(&self) -> Result<Reason, StateError> {
        match &*self.inner.state.lock().unwrap() {
            State::Cancelled { reason } => Ok(reason.clone()),
            _ => Err(StateError),
        }
    }

    /// Synchronous guard point: fails with [`CancelledError`] once cancelled.
    pub fn check(&self) -> Result<(), CancelledError> {
        match &*self.inner.state.lock().unwrap() {
            State::Cancelled { reason } => Err(CancelledError {
                reason: reason.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Register a listener invoked exactly once with the final reason.
    ///
    /// Listeners fire in registration order when `cancel` runs. Registering
    /// on an already-cancelled token invokes `listener` synchronously before
    /// this method returns. Registering on a token that can never be
    /// cancelled does nothing. In both of those cases the returned handle is
    /// a no-op.
    pub fn on_cancelled<F>(&self, listener: F) -> Registration
    where
        F: FnOnce(&Reason) + Send + 'static,
    {
        let reason = {
            let mut state = self.inner.state.lock().unwrap();
            match &mut *state {
                State::Inert => return Registration::noop(),
                State::Cancelled { reason } => reason.clone(),
                State::Pending { listeners, next_id } => {
                    let id = *next_id;
                    *next_id += 1;
                    listeners.push((id, Box::new(listener)));
                    return Registration {
                        target: Arc::downgrade(&self.inner),
                        id,
                    };
                }
            }
        };
        // Already cancelled: deliver synchronously, with the lock released.
        listener(&reason);
        Registration::noop()
    }

    /// Whether two tokens are views of the same underlying state.
    pub fn ptr_eq(&self, other: &Token) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("is_cancelled", &self.is_cancelled())
            .field("can_be_cancelled", &self.can_be_cancelled())
            .finish()
    }
}

/// The privileged side of a cancellation signal.
///
/// Holds the only capability to cancel or dispose its token. Dropping a
/// `Source` does not cancel: outstanding tokens simply stay pending.
#[derive(Clone)]
pub struct Source {
    inner: Arc<Inner>,
}

impl Source {
    /// Create a fresh, uncancelled source.
    pub fn new() -> Source {
        Source {
            inner: Arc::new(Inner::pending()),
        }
    }

    /// The token this source controls.
    pub fn token(&self) -> Token {
        Token {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Cancel the owned token.
    ///
    /// Idempotent: only the first call transitions the state and fixes the
    /// reason; later calls have no effect. Listeners run in registration
    /// order; a panicking listener is isolated and logged, never propagated
    /// to the caller.
    pub fn cancel(&self, reason: impl Into<Reason>) {
        self.inner.cancel(reason.into());
    }

    /// Mark a never-cancelled token as permanently uncancellable and release
    /// its listener registry. No-op after cancellation or prior disposal.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    #[cfg(feature = "timer")]
    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }
}

impl Default for Source {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("is_cancelled", &self.token().is_cancelled())
            .field("can_be_cancelled", &self.token().can_be_cancelled())
            .finish()
    }
}

/// Handle for removing a listener registered with [`Token::on_cancelled`].
///
/// `unregister` is idempotent; removing a listener that already fired or was
/// already removed is a no-op. Dropping the handle without calling it leaves
/// the listener registered.
#[derive(Debug)]
pub struct Registration {
    target: Weak<Inner>,
    id: u64,
}

impl Registration {
    fn noop() -> Registration {
        Registration {
            target: Weak::new(),
            id: 0,
        }
    }

    /// Remove the listener if it is still registered.
    pub fn unregister(&self) {
        if let Some(inner) = self.target.upgrade() {
            let mut state = inner.state.lock().unwrap();
            if let State::Pending { listeners, .. } = &mut *state {
                listeners.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fresh_token_is_pending() {
        let source = Source::new();
        let token = source.token();
        assert!(!token.is_cancelled());
        assert!(token.can_be_cancelled());
        assert_eq!(token.reason(), Err(StateError));
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancel_fixes_state_and_reason() {
        let source = Source::new();
        let token = source.token();
        source.cancel("stop");
        assert!(token.is_cancelled());
        assert_eq!(token.reason().unwrap(), Reason::from("stop"));
        assert_eq!(
            token.check(),
            Err(CancelledError {
                reason: Reason::from("stop")
            })
        );
    }

    #[test]
    fn first_cancel_wins() {
        let source = Source::new();
        source.cancel("first");
        source.cancel("second");
        assert_eq!(source.token().reason().unwrap(), Reason::from("first"));
    }

    #[test]
    fn listeners_fire_once_in_registration_order() {
        let source = Source::new();
        let token = source.token();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            token.on_cancelled(move |reason| {
                order.lock().unwrap().push((tag, reason.clone()));
            });
        }
        source.cancel("done");
        source.cancel("again");

        let seen = order.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ("a", Reason::from("done")),
                ("b", Reason::from("done")),
                ("c", Reason::from("done")),
            ]
        );
    }

    #[test]
    fn late_registration_fires_synchronously() {
        let source = Source::new();
        source.cancel("gone");
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        source.token().on_cancelled(move |reason| {
            assert_eq!(*reason, Reason::from("gone"));
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_prevents_delivery() {
        let source = Source::new();
        let token = source.token();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let registration = token.on_cancelled(move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        registration.unregister();
        registration.unregister();
        source.cancel("too late");
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_listener_does_not_block_broadcast() {
        let source = Source::new();
        let token = source.token();
        let fired = Arc::new(AtomicUsize::new(0));

        token.on_cancelled(|_| panic!("listener failure"));
        let fired_clone = Arc::clone(&fired);
        token.on_cancelled(move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        source.cancel("boom");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(token.is_cancelled());
    }

    #[test]
    fn dispose_makes_token_inert() {
        let source = Source::new();
        let token = source.token();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired_clone = Arc::clone(&fired);
        token.on_cancelled(move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        source.dispose();

        assert!(!token.is_cancelled());
        assert!(!token.can_be_cancelled());

        // Cancellation is no longer possible and registration is a no-op.
        source.cancel("ignored");
        let fired_clone = Arc::clone(&fired);
        token.on_cancelled(move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!token.is_cancelled());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispose_after_cancel_is_noop() {
        let source = Source::new();
        source.cancel("first");
        source.dispose();
        assert!(source.token().is_cancelled());
        assert_eq!(source.token().reason().unwrap(), Reason::from("first"));
    }

    #[test]
    fn never_sentinel_is_inert() {
        let token = Token::never();
        assert!(!token.is_cancelled());
        assert!(!token.can_be_cancelled());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        token.on_cancelled(move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(Token::never().ptr_eq(&token));
    }

    #[test]
    fn cancelled_sentinel_reports_reason() {
        let token = Token::cancelled("already done");
        assert!(token.is_cancelled());
        assert!(token.can_be_cancelled());
        assert_eq!(token.reason().unwrap(), Reason::from("already done"));
    }

    #[test]
    fn reentrant_cancel_from_listener_is_noop() {
        let source = Source::new();
        let token = source.token();
        let reentrant = source.clone();
        token.on_cancelled(move |_| {
            reentrant.cancel("reentrant");
        });
        source.cancel("outer");
        assert_eq!(token.reason().unwrap(), Reason::from("outer"));
    }

    #[test]
    fn listener_can_register_during_broadcast() {
        let source = Source::new();
        let token = source.token();
        let late = Arc::new(AtomicUsize::new(0));

        let inner_token = token.clone();
        let late_clone = Arc::clone(&late);
        token.on_cancelled(move |_| {
            let late_clone = Arc::clone(&late_clone);
            inner_token.on_cancelled(move |reason| {
                assert_eq!(*reason, Reason::from("outer"));
                late_clone.fetch_add(1, Ordering::SeqCst);
            });
        });
        source.cancel("outer");
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_state() {
        let source = Source::new();
        let a = source.token();
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        source.cancel("shared");
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }
}
