//! Two-party protocol plumbing: roles, transitions and the wire vocabulary.

pub mod driver;
pub mod message;
pub mod session;

pub use driver::{drive, run_lockstep};
pub use message::Message;
pub use session::{QkdSession, SessionInput};

use crate::errors::Result;

/// Which side of the exchange a party plays. The initiator (Alice) always
/// speaks first in a round.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    Initiator,
    Responder,
}

/// What a party wants its caller to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<T> {
    /// Deliver this message, then wait for the peer's next one.
    Send(Message),
    /// Nothing to send; wait for the peer's next message.
    Await,
    /// The phase is over. `last` is a final message the peer still needs.
    Finish { last: Option<Message>, outcome: T },
}

impl<T> Transition<T> {
    pub fn finish(outcome: T) -> Self {
        Transition::Finish { last: None, outcome }
    }

    pub fn finish_with(last: Message, outcome: T) -> Self {
        Transition::Finish {
            last: Some(last),
            outcome,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Transition<U> {
        match self {
            Transition::Send(message) => Transition::Send(message),
            Transition::Await => Transition::Await,
            Transition::Finish { last, outcome } => Transition::Finish {
                last,
                outcome: f(outcome),
            },
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Transition::Finish { .. })
    }
}

/// One role of a request/response protocol, driven one message at a time.
pub trait Party {
    type Outcome;

    /// Called once, before any message is received.
    fn start(&mut self) -> Result<Transition<Self::Outcome>>;

    /// Feeds the peer's next message.
    fn advance(&mut self, message: Message) -> Result<Transition<Self::Outcome>>;
}
