//! Interactive Cascade error reconciliation.
//!
//! Each pass permutes the key indices with a shared seed, cuts them into
//! blocks and exchanges all block parities in one round. Every block whose
//! parity differs is bisected: the parity of the first half of the remaining
//! range is exchanged per round until a single index is left, which the
//! initiator flips. Both sides count the error. Block size doubles per pass.
//!
//! There is no backtracking into earlier passes. A block holding an even
//! number of errors passes its parity check, so residual mismatches are
//! possible and must be caught by the verification phase.

use std::collections::VecDeque;

use log::{debug, trace};

use crate::bits::parity_at;
use crate::errors::{ParameterError, QkdError, Result};
use crate::protocol::message::{Message, SearchProbe};
use crate::protocol::{Party, Role, Transition};
use crate::reconciliation::blocks::{initial_block_size, pass_blocks};

pub const DEFAULT_NUM_PASSES: usize = 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CascadeParams {
    pub seed: u64,
    pub num_passes: usize,
    pub initial_block_size: usize,
}

impl CascadeParams {
    pub fn new(seed: u64, num_passes: usize, initial_block_size: usize) -> Self {
        CascadeParams {
            seed,
            num_passes,
            initial_block_size,
        }
    }

    /// Picks the first-pass block size from a QBER estimate or an explicit override.
    pub fn for_key(
        key_len: usize,
        seed: u64,
        num_passes: usize,
        qber_estimate: Option<f64>,
        block_size_override: Option<usize>,
    ) -> std::result::Result<Self, ParameterError> {
        let size = initial_block_size(key_len, qber_estimate, block_size_override)?;
        Ok(CascadeParams::new(seed, num_passes, size))
    }
}

/// Where a session is in the exchange.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CascadeState {
    Idle,
    /// Waiting for the peer's block parities.
    BlockCheck,
    /// Bisecting `blocks[block][left..right]`.
    BinarySearch { block: usize, left: usize, right: usize },
    /// The error is located at `index`; waiting for the closing round.
    SearchComplete { index: usize },
    PassSync,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub key: Vec<bool>,
    pub leakage_bits: usize,
    pub errors_corrected: usize,
}

pub struct CascadeSession {
    role: Role,
    key: Vec<bool>,
    params: CascadeParams,
    pass: usize,
    block_size: usize,
    blocks: Vec<Vec<usize>>,
    pending: VecDeque<usize>,
    leakage_bits: usize,
    errors_corrected: usize,
    state: CascadeState,
}

impl CascadeSession {
    pub fn new(role: Role, key: Vec<bool>, params: CascadeParams) -> std::result::Result<Self, ParameterError> {
        if key.is_empty() {
            return Err(ParameterError::Empty("Key"));
        }
        if params.initial_block_size == 0 {
            return Err(ParameterError::OutOfRange {
                name: "initial_block_size",
                range: "[1, inf)",
                value: 0.0,
            });
        }
        Ok(CascadeSession {
            role,
            key,
            params,
            pass: 0,
            block_size: params.initial_block_size,
            blocks: Vec::new(),
            pending: VecDeque::new(),
            leakage_bits: 0,
            errors_corrected: 0,
            state: CascadeState::Idle,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn key(&self) -> &[bool] {
        &self.key
    }

    pub fn pass(&self) -> usize {
        self.pass
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn leakage_bits(&self) -> usize {
        self.leakage_bits
    }

    pub fn errors_corrected(&self) -> usize {
        self.errors_corrected
    }

    pub fn state(&self) -> CascadeState {
        self.state
    }

    fn outcome(&self) -> CascadeOutcome {
        CascadeOutcome {
            key: self.key.clone(),
            leakage_bits: self.leakage_bits,
            errors_corrected: self.errors_corrected,
        }
    }

    fn begin_pass(&mut self) {
        self.blocks = pass_blocks(self.key.len(), self.params.seed, self.pass, self.block_size);
        self.pending.clear();
        self.state = CascadeState::BlockCheck;
    }

    fn block_parities(&self) -> Vec<bool> {
        self.blocks.iter().map(|block| parity_at(&self.key, block)).collect()
    }

    /// Only the initiator owns the canonical value of a located bit.
    fn correct(&mut self, index: usize) {
        if self.role == Role::Initiator {
            self.key[index] = !self.key[index];
        }
        self.errors_corrected += 1;
    }

    /// Compares parities, corrects single-bit blocks in place and queues the
    /// rest for bisection.
    fn absorb_parities(&mut self, pass: usize, theirs: &[bool]) -> Result<()> {
        self.expect_pass(pass)?;
        if theirs.len() != self.blocks.len() {
            return Err(QkdError::protocol(format!(
                "pass {}: peer sent {} block parities, expected {}",
                self.pass,
                theirs.len(),
                self.blocks.len()
            )));
        }
        self.leakage_bits += self.blocks.len();

        let mismatched: Vec<usize> = self
            .block_parities()
            .iter()
            .zip(theirs)
            .enumerate()
            .filter_map(|(i, (ours, theirs))| (ours != theirs).then_some(i))
            .collect();
        debug!(
            "pass {}: {} of {} blocks (size {}) disagree",
            self.pass,
            mismatched.len(),
            self.blocks.len(),
            self.block_size
        );

        for block in mismatched {
            if self.blocks[block].len() == 1 {
                let index = self.blocks[block][0];
                self.correct(index);
            } else {
                self.pending.push_back(block);
            }
        }
        Ok(())
    }

    /// Moves to the next queued search, or to the end-of-pass sync.
    fn next_search(&mut self) {
        self.state = match self.pending.pop_front() {
            Some(block) => CascadeState::BinarySearch {
                block,
                left: 0,
                right: self.blocks[block].len(),
            },
            None => CascadeState::PassSync,
        };
    }

    fn probe(&self, block: usize, left: usize, right: usize) -> SearchProbe {
        let mid = (left + right) / 2;
        let indices = self.blocks[block][left..mid].to_vec();
        let parity = parity_at(&self.key, &indices);
        SearchProbe { indices, parity }
    }

    /// Checks the peer probed the same half we did, charges one leaked bit
    /// and narrows the range. Returns our own probe for the same half.
    fn bisect(&mut self, block: usize, left: usize, right: usize, theirs: &SearchProbe) -> Result<SearchProbe> {
        let ours = self.probe(block, left, right);
        if ours.indices != theirs.indices {
            return Err(QkdError::protocol(format!(
                "pass {}: search indices diverged in block {}",
                self.pass, block
            )));
        }
        self.leakage_bits += 1;

        let mid = (left + right) / 2;
        let (left, right) = if ours.parity != theirs.parity {
            (left, mid)
        } else {
            (mid, right)
        };
        self.state = if right - left == 1 {
            let index = self.blocks[block][left];
            trace!("pass {}: error located at index {}", self.pass, index);
            CascadeState::SearchComplete { index }
        } else {
            CascadeState::BinarySearch { block, left, right }
        };
        Ok(ours)
    }

    fn expect_pass(&self, pass: usize) -> Result<()> {
        if pass != self.pass {
            return Err(QkdError::protocol(format!(
                "peer is in pass {}, we are in pass {}",
                pass, self.pass
            )));
        }
        Ok(())
    }

    fn expect_index(&self, expected: usize, got: usize) -> Result<()> {
        if expected != got {
            return Err(QkdError::protocol(format!(
                "pass {}: search closed at index {}, expected {}",
                self.pass, got, expected
            )));
        }
        Ok(())
    }

    fn end_pass(&mut self) {
        debug!(
            "pass {} done: leakage {} bits, {} errors corrected so far",
            self.pass, self.leakage_bits, self.errors_corrected
        );
        self.pass += 1;
        self.block_size = self.block_size.saturating_mul(2);
    }

    fn is_last_pass_done(&self) -> bool {
        self.pass >= self.params.num_passes
    }

    fn unexpected(&self, message: &Message) -> QkdError {
        QkdError::protocol(format!(
            "unexpected {} while in {:?} (pass {})",
            message.header(),
            self.state,
            self.pass
        ))
    }

    /// The initiator's next request after a block search or a parity round.
    fn initiator_next(&mut self) -> Transition<CascadeOutcome> {
        self.next_search();
        match self.state {
            CascadeState::BinarySearch { block, left, right } => {
                Transition::Send(Message::CascadeSearch(self.probe(block, left, right)))
            }
            _ => Transition::Send(Message::CascadeSync { pass: self.pass }),
        }
    }

    fn advance_initiator(&mut self, message: Message) -> Result<Transition<CascadeOutcome>> {
        match (self.state, message) {
            (CascadeState::BlockCheck, Message::CascadeParities { pass, parities }) => {
                self.absorb_parities(pass, &parities)?;
                Ok(self.initiator_next())
            }
            (CascadeState::BinarySearch { block, left, right }, Message::CascadeResponse(theirs)) => {
                self.bisect(block, left, right, &theirs)?;
                match self.state {
                    CascadeState::SearchComplete { index } => {
                        self.correct(index);
                        Ok(Transition::Send(Message::CascadeDone { index }))
                    }
                    CascadeState::BinarySearch { block, left, right } => {
                        Ok(Transition::Send(Message::CascadeSearch(self.probe(block, left, right))))
                    }
                    _ => Err(QkdError::protocol("binary search left an inconsistent state")),
                }
            }
            (CascadeState::SearchComplete { index }, Message::CascadeDone { index: got }) => {
                self.expect_index(index, got)?;
                Ok(self.initiator_next())
            }
            (CascadeState::PassSync, Message::CascadeSync { pass }) => {
                self.expect_pass(pass)?;
                self.end_pass();
                if self.is_last_pass_done() {
                    self.state = CascadeState::Done;
                    return Ok(Transition::finish(self.outcome()));
                }
                self.begin_pass();
                Ok(Transition::Send(Message::CascadeParities {
                    pass: self.pass,
                    parities: self.block_parities(),
                }))
            }
            (_, message) => Err(self.unexpected(&message)),
        }
    }

    fn advance_responder(&mut self, message: Message) -> Result<Transition<CascadeOutcome>> {
        match (self.state, message) {
            (CascadeState::BlockCheck, Message::CascadeParities { pass, parities }) => {
                let reply = Message::CascadeParities {
                    pass,
                    parities: self.block_parities(),
                };
                self.absorb_parities(pass, &parities)?;
                self.next_search();
                Ok(Transition::Send(reply))
            }
            (CascadeState::BinarySearch { block, left, right }, Message::CascadeSearch(theirs)) => {
                let ours = self.bisect(block, left, right, &theirs)?;
                Ok(Transition::Send(Message::CascadeResponse(ours)))
            }
            (CascadeState::SearchComplete { index }, Message::CascadeDone { index: got }) => {
                self.expect_index(index, got)?;
                self.correct(index);
                self.next_search();
                Ok(Transition::Send(Message::CascadeDone { index }))
            }
            (CascadeState::PassSync, Message::CascadeSync { pass }) => {
                self.expect_pass(pass)?;
                let reply = Message::CascadeSync { pass };
                self.end_pass();
                if self.is_last_pass_done() {
                    self.state = CascadeState::Done;
                    return Ok(Transition::finish_with(reply, self.outcome()));
                }
                self.begin_pass();
                Ok(Transition::Send(reply))
            }
            (_, message) => Err(self.unexpected(&message)),
        }
    }
}

impl Party for CascadeSession {
    type Outcome = CascadeOutcome;

    fn start(&mut self) -> Result<Transition<CascadeOutcome>> {
        if self.state != CascadeState::Idle {
            return Err(QkdError::protocol("cascade session already started"));
        }
        if self.params.num_passes == 0 {
            self.state = CascadeState::Done;
            return Ok(Transition::finish(self.outcome()));
        }
        self.begin_pass();
        match self.role {
            Role::Initiator => Ok(Transition::Send(Message::CascadeParities {
                pass: self.pass,
                parities: self.block_parities(),
            })),
            Role::Responder => Ok(Transition::Await),
        }
    }

    fn advance(&mut self, message: Message) -> Result<Transition<CascadeOutcome>> {
        match self.role {
            Role::Initiator => self.advance_initiator(message),
            Role::Responder => self.advance_responder(message),
        }
    }
}
