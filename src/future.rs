//! Future integration: the asynchronous guard point and the cancellation
//! future.
//!
//! [`Cancellable`] races a future against a token: the future's own outcome
//! wins if it settles first, a [`CancelledError`] wins if the token fires
//! first. [`WaitCancelled`] is the future view of a token's cancellation,
//! derived from the listener primitive.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use pin_project::{pin_project, pinned_drop};

use crate::reason::Reason;
use crate::token::{CancelledError, Registration, Token};

/// Wake handshake between a registered listener and the polling side.
struct WakeState {
    waker: Option<Waker>,
}

/// A future that loses to cancellation.
///
/// Resolves with `Ok(output)` if the inner future settles first, or
/// `Err(CancelledError)` carrying the cancellation reason if the token
/// fires first. The wake-up listener is unregistered as soon as the inner
/// future settles (and on drop), so a cancellation arriving after the
/// outcome was produced has no observable effect and nothing leaks.
///
/// For a token that can never be cancelled no listener is registered and no
/// cancellation check runs; the adaptor just polls the inner future.
#[pin_project(PinnedDrop)]
pub struct Cancellable<F> {
    #[pin]
    inner: F,
    token: Token,
    registration: Option<Registration>,
    wake: Option<Arc<Mutex<WakeState>>>,
}

impl<F: Future> Cancellable<F> {
    fn new(inner: F, token: Token) -> Cancellable<F> {
        if !token.can_be_cancelled() {
            return Cancellable {
                inner,
                token,
                registration: None,
                wake: None,
            };
        }
        let wake = Arc::new(Mutex::new(WakeState { waker: None }));
        let handle = Arc::clone(&wake);
        let registration = token.on_cancelled(move |_| {
            let woken = handle.lock().unwrap().waker.take();
            if let Some(waker) = woken {
                waker.wake();
            }
        });
        Cancellable {
            inner,
            token,
            registration: Some(registration),
            wake: Some(wake),
        }
    }
}

impl<F: Future> Future for Cancellable<F> {
    type Output = Result<F::Output, CancelledError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let Some(wake) = this.wake {
            // Publish the waker before checking, so a cancel landing
            // between the check and the return still finds it.
            wake.lock().unwrap().waker = Some(cx.waker().clone());
            if let Err(cancelled) = this.token.check() {
                if let Some(registration) = this.registration.take() {
                    registration.unregister();
                }
                return Poll::Ready(Err(cancelled));
            }
        }

        match this.inner.poll(cx) {
            Poll::Ready(output) => {
                // Settled first: release the listener before forwarding.
                if let Some(registration) = this.registration.take() {
                    registration.unregister();
                }
                Poll::Ready(Ok(output))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[pinned_drop]
impl<F> PinnedDrop for Cancellable<F> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if let Some(registration) = this.registration.take() {
            registration.unregister();
        }
    }
}

/// Extension trait wrapping any future with a cancellation token.
pub trait CancellableFutureExt: Future + Sized {
    /// Race this future against `token`.
    fn cancellable(self, token: Token) -> Cancellable<Self> {
        Cancellable::new(self, token)
    }
}

impl<F: Future> CancellableFutureExt for F {}

struct WaitState {
    reason: Option<Reason>,
    waker: Option<Waker>,
}

/// Future resolving with the [`Reason`] once its token cancels.
///
/// Pending forever on a token that can never be cancelled. Dropping it
/// unregisters the underlying listener.
pub struct WaitCancelled {
    state: Arc<Mutex<WaitState>>,
    registration: Option<Registration>,
}

impl Token {
    /// A future view of this token's cancellation.
    ///
    /// Already-cancelled tokens produce an immediately-ready future.
    pub fn wait_cancelled(&self) -> WaitCancelled {
        let state = Arc::new(Mutex::new(WaitState {
            reason: None,
            waker: None,
        }));
        let handle = Arc::clone(&state);
        let registration = self.on_cancelled(move |reason| {
            let woken = {
                let mut state = handle.lock().unwrap();
                state.reason = Some(reason.clone());
                state.waker.take()
            };
            if let Some(waker) = woken {
                waker.wake();
            }
        });
        WaitCancelled {
            state,
            registration: Some(registration),
        }
    }
}

impl Future for WaitCancelled {
    type Output = Reason;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.lock().unwrap();
        match state.reason.clone() {
            Some(reason) => Poll::Ready(reason),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl Drop for WaitCancelled {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            registration.unregister();
        }
    }
}
