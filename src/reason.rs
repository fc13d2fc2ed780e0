//! Cancellation reasons.
//!
//! Every cancellation carries a [`Reason`]. The reason is fixed by the first
//! successful `cancel` call and observable through `Token::reason`, guard
//! errors, and listener callbacks.

use std::fmt;

/// Why a token was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// A caller-supplied description.
    Message(String),
    /// The deadline of a timer-backed source elapsed.
    TimedOut,
    /// The reasons of every input to an `all` combinator, in input order.
    Joined(Vec<Reason>),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Message(message) => f.write_str(message),
            Reason::TimedOut => f.write_str("timed out"),
            Reason::Joined(reasons) => {
                f.write_str("[")?;
                for (i, reason) in reasons.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", reason)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Reason {
    fn from(message: &str) -> Self {
        Reason::Message(message.to_owned())
    }
}

impl From<String> for Reason {
    fn from(message: String) -> Self {
        Reason::Message(message)
    }
}
