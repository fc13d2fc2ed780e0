//! cancel-token: a cooperative cancellation signal
//!
//! This crate provides a one-shot, immutable-once-fired cancellation token:
//! - A [`Source`] holds the privileged capability to cancel (and dispose)
//! - A [`Token`] is the cheaply cloneable view consumers observe
//! - Listeners registered with [`Token::on_cancelled`] fire exactly once,
//!   in registration order, with the final [`Reason`]
//! - [`all`] and [`race`] compose tokens algebraically (AND/OR)
//! - [`timer::timeout`] builds a source that cancels itself at a deadline
//! - Guard points adapt tokens to synchronous loops ([`Token::check`]) and
//!   to asynchronous operations ([`CancellableFutureExt::cancellable`])
//!
//! Cancellation flows one way: from `cancel()` outward to every registered
//! listener and into every combinator built on top. The transition is
//! monotonic and idempotent; the first `cancel` fixes the reason.
//!
//! # Observing cancellation
//!
//! ```rust
//! use cancel_token::{Reason, Source};
//! use std::sync::mpsc;
//!
//! let source = Source::new();
//! let token = source.token();
//!
//! let (seen_tx, seen_rx) = mpsc::channel();
//! token.on_cancelled(move |reason| {
//!     let _ = seen_tx.send(reason.clone());
//! });
//!
//! source.cancel("operator pressed stop");
//! assert!(token.is_cancelled());
//! assert_eq!(seen_rx.recv().unwrap(), Reason::from("operator pressed stop"));
//! ```
//!
//! # Guarding a long computation
//!
//! ```rust
//! use cancel_token::{CancelledError, Token};
//!
//! fn crunch(token: &Token) -> Result<u64, CancelledError> {
//!     let mut acc = 0;
//!     for chunk in 0..1_000 {
//!         token.check()?;
//!         acc += chunk;
//!     }
//!     Ok(acc)
//! }
//!
//! assert!(crunch(&Token::never()).is_ok());
//! assert!(crunch(&Token::cancelled("shutdown")).is_err());
//! ```
//!
//! # Timeouts
//!
//! ```rust,no_run
//! use cancel_token::timer::timeout;
//! use std::time::Duration;
//!
//! let guard = timeout(Duration::from_millis(250));
//! let token = guard.token();
//! // Hand `token` to the operation; after 250ms it cancels with
//! // `Reason::TimedOut` unless `guard.cancel(..)` ran first.
//! ```

#![deny(warnings)]

pub mod combine;
pub mod future;
pub mod reason;
pub mod token;

#[cfg(feature = "timer")]
pub mod timer;

// Re-export core types
pub use combine::{all, race};
pub use future::{Cancellable, CancellableFutureExt, WaitCancelled};
pub use reason::Reason;
pub use token::{CancelledError, Registration, Source, StateError, Token};

#[cfg(feature = "timer")]
pub use timer::{timeout, TimeoutSource};
