//! The timer-backed source variant.

use std::fmt;
use std::time::{Duration, Instant};

use crate::reason::Reason;
use crate::token::{Source, Token};

use super::TimerId;

/// A [`Source`] whose token cancels automatically once a duration elapses.
///
/// Manual [`cancel`](TimeoutSource::cancel) and
/// [`dispose`](TimeoutSource::dispose) both disarm the timer before
/// delegating, so cancelling ahead of the deadline prevents the timer-driven
/// cancellation from ever firing, and disposal releases the timer entry
/// deterministically. A manual cancel racing the expiry is resolved by
/// cancel idempotency: whichever reaches the token first wins.
pub struct TimeoutSource {
    source: Source,
    timer: TimerId,
}

/// Create a source that cancels itself with [`Reason::TimedOut`] after
/// `duration`.
pub fn timeout(duration: Duration) -> TimeoutSource {
    let source = Source::new();
    let timer = super::arm(Instant::now() + duration, source.downgrade());
    TimeoutSource { source, timer }
}

impl TimeoutSource {
    /// The token this source controls.
    pub fn token(&self) -> Token {
        self.source.token()
    }

    /// Disarm the timer, then cancel with `reason`.
    pub fn cancel(&self, reason: impl Into<Reason>) {
        super::disarm(self.timer);
        self.source.cancel(reason);
    }

    /// Disarm the timer and mark the token permanently uncancellable.
    pub fn dispose(&self) {
        super::disarm(self.timer);
        self.source.dispose();
    }
}

impl fmt::Debug for TimeoutSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutSource")
            .field("timer", &self.timer)
            .field("is_cancelled", &self.token().is_cancelled())
            .finish()
    }
}
