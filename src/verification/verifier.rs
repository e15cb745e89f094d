//! Two-party key equality check.
//!
//! The initiator draws a fresh non-zero salt, hashes its key and sends
//! `VERIFY_HASH {salt, tag}`. The responder hashes its own key with the same
//! salt and answers `VERIFY_RESULT {matched}`. Each side charges the tag size
//! to its leakage. A mismatch is an ordinary `false` outcome.

use log::{debug, warn};
use rand::Rng;

use crate::errors::{ParameterError, QkdError, Result};
use crate::galois::FieldSize;
use crate::protocol::message::Message;
use crate::protocol::{Party, Role, Transition};
use crate::verification::polynomial_hash::{collision_probability, generate_hash_salt, polynomial_hash};

/// Result of hashing two keys that are both held locally.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub success: bool,
    pub salt: u128,
    pub local_tag: u128,
    pub remote_tag: Option<u128>,
    pub collision_prob: f64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub matched: bool,
    pub leakage_bits: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum VerifierState {
    Idle,
    AwaitingResult,
    AwaitingHash,
    Done,
}

pub struct KeyVerifier {
    role: Role,
    key: Vec<bool>,
    field: FieldSize,
    salt: Option<u128>,
    leakage_bits: usize,
    state: VerifierState,
}

impl KeyVerifier {
    /// The salt is drawn here, once per verification round.
    pub fn initiator<R: Rng + ?Sized>(key: Vec<bool>, field: FieldSize, rng: &mut R) -> std::result::Result<Self, ParameterError> {
        Self::check_key(&key)?;
        Ok(KeyVerifier {
            role: Role::Initiator,
            key,
            field,
            salt: Some(generate_hash_salt(field, rng)),
            leakage_bits: 0,
            state: VerifierState::Idle,
        })
    }

    pub fn responder(key: Vec<bool>, field: FieldSize) -> std::result::Result<Self, ParameterError> {
        Self::check_key(&key)?;
        Ok(KeyVerifier {
            role: Role::Responder,
            key,
            field,
            salt: None,
            leakage_bits: 0,
            state: VerifierState::Idle,
        })
    }

    fn check_key(key: &[bool]) -> std::result::Result<(), ParameterError> {
        if key.is_empty() {
            return Err(ParameterError::Empty("Key"));
        }
        Ok(())
    }

    pub fn tag_bits(&self) -> usize {
        self.field.bits() as usize
    }

    pub fn leakage_bits(&self) -> usize {
        self.leakage_bits
    }

    pub fn collision_probability(&self) -> f64 {
        collision_probability(self.key.len(), self.field)
    }

    pub fn into_key(self) -> Vec<bool> {
        self.key
    }

    fn outcome(&self, matched: bool) -> VerificationOutcome {
        VerificationOutcome {
            matched,
            leakage_bits: self.leakage_bits,
        }
    }

    fn report(&self, matched: bool) {
        if matched {
            debug!(
                "keys match ({} bits, collision probability {:.3e})",
                self.key.len(),
                self.collision_probability()
            );
        } else {
            warn!("key verification failed: {} bit keys differ", self.key.len());
        }
    }
}

impl Party for KeyVerifier {
    type Outcome = VerificationOutcome;

    fn start(&mut self) -> Result<Transition<VerificationOutcome>> {
        if self.state != VerifierState::Idle {
            return Err(QkdError::protocol("verification already started"));
        }
        match (self.role, self.salt) {
            (Role::Initiator, Some(salt)) => {
                let tag = polynomial_hash(&self.key, salt, self.field)?;
                self.leakage_bits += self.tag_bits();
                self.state = VerifierState::AwaitingResult;
                Ok(Transition::Send(Message::VerifyHash { salt, tag }))
            }
            (Role::Initiator, None) => Err(QkdError::protocol("initiator has no verification salt")),
            (Role::Responder, _) => {
                self.state = VerifierState::AwaitingHash;
                Ok(Transition::Await)
            }
        }
    }

    fn advance(&mut self, message: Message) -> Result<Transition<VerificationOutcome>> {
        match (self.state, message) {
            (VerifierState::AwaitingResult, Message::VerifyResult { matched }) => {
                self.state = VerifierState::Done;
                self.report(matched);
                Ok(Transition::finish(self.outcome(matched)))
            }
            (VerifierState::AwaitingHash, Message::VerifyHash { salt, tag }) => {
                let local = polynomial_hash(&self.key, salt, self.field)
                    .map_err(|e| QkdError::protocol(format!("peer sent unusable verification salt: {e}")))?;
                let matched = local == tag;
                self.salt = Some(salt);
                self.leakage_bits += self.tag_bits();
                self.state = VerifierState::Done;
                self.report(matched);
                Ok(Transition::finish_with(
                    Message::VerifyResult { matched },
                    self.outcome(matched),
                ))
            }
            (state, message) => Err(QkdError::protocol(format!(
                "unexpected {} during verification ({:?})",
                message.header(),
                state
            ))),
        }
    }
}

/// Hashes two local keys under one salt (drawn from `rng` unless given).
pub fn verify_local<R: Rng + ?Sized>(
    key_a: &[bool],
    key_b: &[bool],
    field: FieldSize,
    salt: Option<u128>,
    rng: &mut R,
) -> std::result::Result<VerificationResult, ParameterError> {
    let salt = salt.unwrap_or_else(|| generate_hash_salt(field, rng));
    let tag_a = polynomial_hash(key_a, salt, field)?;
    let tag_b = polynomial_hash(key_b, salt, field)?;
    Ok(VerificationResult {
        success: tag_a == tag_b,
        salt,
        local_tag: tag_a,
        remote_tag: Some(tag_b),
        collision_prob: collision_probability(key_a.len(), field),
    })
}

pub fn verify_keys_match(key_a: &[bool], key_b: &[bool], field: FieldSize) -> std::result::Result<bool, ParameterError> {
    Ok(verify_local(key_a, key_b, field, None, &mut rand::thread_rng())?.success)
}
