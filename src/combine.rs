//! Algebraic combinators deriving one token from many.
//!
//! Both combinators are built entirely on the public listener contract
//! ([`Token::on_cancelled`] and [`Registration::unregister`]); neither
//! reaches into another token's registry.

use std::sync::{Arc, Mutex};

use crate::reason::Reason;
use crate::token::{Registration, Source, Token};

struct AllState {
    reasons: Vec<Option<Reason>>,
    remaining: usize,
}

/// A token cancelled once **every** input token is cancelled.
///
/// The combined reason is [`Reason::Joined`] with each input's reason in
/// input order, regardless of the order the inputs fired in. If any input
/// can never be cancelled (and is not already cancelled), "all cancelled"
/// is unreachable and the never-sentinel is returned with no wiring at all.
/// Inputs already cancelled at call time are counted immediately.
///
/// `all` of no tokens is vacuously cancelled with an empty `Joined` reason.
pub fn all<I>(tokens: I) -> Token
where
    I: IntoIterator<Item = Token>,
{
    let tokens: Vec<Token> = tokens.into_iter().collect();
    if tokens.is_empty() {
        return Token::cancelled(Reason::Joined(Vec::new()));
    }
    if tokens
        .iter()
        .any(|token| !token.is_cancelled() && !token.can_be_cancelled())
    {
        return Token::never();
    }

    let source = Source::new();
    let combined = source.token();
    let state = Arc::new(Mutex::new(AllState {
        reasons: vec![None; tokens.len()],
        remaining: tokens.len(),
    }));

    for (index, token) in tokens.iter().enumerate() {
        let state = Arc::clone(&state);
        let source = source.clone();
        token.on_cancelled(move |reason| {
            let complete = {
                let mut state = state.lock().unwrap();
                state.reasons[index] = Some(reason.clone());
                state.remaining -= 1;
                if state.remaining == 0 {
                    Some(state.reasons.iter_mut().filter_map(Option::take).collect())
                } else {
                    None
                }
            };
            if let Some(reasons) = complete {
                source.cancel(Reason::Joined(reasons));
            }
        });
    }
    combined
}

/// A token cancelled as soon as **any** input token is cancelled, adopting
/// that input's reason.
///
/// Fast path: if an input is already cancelled at call time, that exact
/// token is returned (identity, not a wrapper). Inputs that can never be
/// cancelled take no part in the race; if every input is such a token the
/// never-sentinel is returned. The first input to fire unregisters the
/// listeners on every other input before propagating, so losing inputs do
/// not retain the combined state.
pub fn race<I>(tokens: I) -> Token
where
    I: IntoIterator<Item = Token>,
{
    let tokens: Vec<Token> = tokens.into_iter().collect();
    if let Some(winner) = tokens.iter().find(|token| token.is_cancelled()) {
        return winner.clone();
    }
    let live: Vec<Token> = tokens
        .iter()
        .filter(|token| token.can_be_cancelled())
        .cloned()
        .collect();
    if live.is_empty() {
        return Token::never();
    }

    let source = Source::new();
    let combined = source.token();
    let registrations: Arc<Mutex<Option<Vec<Registration>>>> = Arc::new(Mutex::new(None));

    let mut wired = Vec::with_capacity(live.len());
    for token in &live {
        let source = source.clone();
        let registrations = Arc::clone(&registrations);
        wired.push(token.on_cancelled(move |reason| {
            // Release every co-listener before propagating; unregistering
            // the winner's own (already fired) entry is a no-op.
            if let Some(others) = registrations.lock().unwrap().take() {
                for registration in others {
                    registration.unregister();
                }
            }
            source.cancel(reason.clone());
        }));
    }
    *registrations.lock().unwrap() = Some(wired);
    combined
}
