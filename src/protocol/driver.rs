//! Running parties to completion.

use std::collections::VecDeque;

use log::trace;

use crate::auth::channel::{AuthenticatedChannel, Transport};
use crate::errors::{QkdError, Result};
use crate::protocol::{Message, Party, Transition};

/// Drives one party over an authenticated channel until it finishes.
/// Blocks on the transport whenever the party waits for its peer.
pub fn drive<P, T>(party: &mut P, channel: &mut AuthenticatedChannel<T>) -> Result<P::Outcome>
where
    P: Party,
    T: Transport,
{
    let mut transition = party.start()?;
    loop {
        transition = match transition {
            Transition::Send(message) => {
                channel.send(&message)?;
                party.advance(channel.receive()?)?
            }
            Transition::Await => party.advance(channel.receive()?)?,
            Transition::Finish { last, outcome } => {
                if let Some(message) = last {
                    channel.send(&message)?;
                }
                return Ok(outcome);
            }
        };
    }
}

struct Slot<O> {
    outcome: Option<O>,
    waiting: bool,
}

impl<O> Slot<O> {
    fn new() -> Self {
        Slot {
            outcome: None,
            waiting: false,
        }
    }

    fn done(&self) -> bool {
        self.outcome.is_some()
    }

    /// Applies a transition: queues any outgoing message for the peer and
    /// records whether this party now needs input.
    fn apply(&mut self, transition: Transition<O>, outbox: &mut VecDeque<Message>) {
        match transition {
            Transition::Send(message) => {
                outbox.push_back(message);
                self.waiting = true;
            }
            Transition::Await => self.waiting = true,
            Transition::Finish { last, outcome } => {
                outbox.extend(last);
                self.waiting = false;
                self.outcome = Some(outcome);
            }
        }
    }
}

/// Runs two parties against each other in one thread, with plain in-memory
/// mailboxes and no authentication. Used by tests and benchmarks.
pub fn run_lockstep<A, B>(a: &mut A, b: &mut B) -> Result<(A::Outcome, B::Outcome)>
where
    A: Party,
    B: Party,
{
    let mut to_a: VecDeque<Message> = VecDeque::new();
    let mut to_b: VecDeque<Message> = VecDeque::new();
    let mut slot_a = Slot::new();
    let mut slot_b = Slot::new();

    slot_a.apply(a.start()?, &mut to_b);
    slot_b.apply(b.start()?, &mut to_a);

    while !(slot_a.done() && slot_b.done()) {
        let mut progressed = false;
        if slot_a.waiting {
            if let Some(message) = to_a.pop_front() {
                trace!("lockstep b -> a: {}", message.header());
                slot_a.apply(a.advance(message)?, &mut to_b);
                progressed = true;
            }
        }
        if slot_b.waiting {
            if let Some(message) = to_b.pop_front() {
                trace!("lockstep a -> b: {}", message.header());
                slot_b.apply(b.advance(message)?, &mut to_a);
                progressed = true;
            }
        }
        if !progressed {
            return Err(QkdError::protocol("parties deadlocked waiting for each other"));
        }
    }

    if let Some(message) = to_a.front().or_else(|| to_b.front()) {
        return Err(QkdError::protocol(format!(
            "{} left undelivered after both parties finished",
            message.header()
        )));
    }
    match (slot_a.outcome, slot_b.outcome) {
        (Some(outcome_a), Some(outcome_b)) => Ok((outcome_a, outcome_b)),
        _ => Err(QkdError::protocol("a party stopped without an outcome")),
    }
}
