//! One party's view of a complete post-processing session.
//!
//! Policy checks, Cascade reconciliation, equality verification and privacy
//! amplification run back to back as a single [`Party`]. Alice initiates
//! every round and draws all public randomness (verification salt and
//! Toeplitz seed); Bob answers.

use log::{debug, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::config::PostProcessingConfig;
use crate::errors::{ParameterError, QkdError, Result};
use crate::privacy::amplifier::PrivacyAmplifier;
use crate::privacy::estimation::estimate_qber_from_cascade;
use crate::protocol::message::Message;
use crate::protocol::{Party, Role, Transition};
use crate::reconciliation::cascade::{CascadeOutcome, CascadeParams, CascadeSession};
use crate::results::{FailureCode, QkdResult};
use crate::verification::verifier::{KeyVerifier, VerificationOutcome};

/// What the quantum and sifting stages hand over. Both parties see the same
/// public sample statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInput {
    pub sifted_key: Vec<bool>,
    /// QBER measured on the disclosed test bits.
    pub sample_qber: f64,
    /// Number of disclosed test bits behind `sample_qber`.
    pub num_test_bits: usize,
}

impl SessionInput {
    /// Rejects a sample QBER that is not a probability.
    pub fn validate(&self) -> std::result::Result<(), ParameterError> {
        if !(0.0..=1.0).contains(&self.sample_qber) {
            return Err(ParameterError::OutOfRange {
                name: "sample_qber",
                range: "[0, 1]",
                value: self.sample_qber,
            });
        }
        Ok(())
    }
}

enum Phase {
    Pending,
    Reconciling(CascadeSession),
    Verifying {
        verifier: KeyVerifier,
        cascade: CascadeOutcome,
    },
    /// Bob, waiting for Alice's Toeplitz seed.
    AwaitingSeed {
        key: Vec<bool>,
        output_length: usize,
        qber: f64,
        leakage: usize,
        errors_corrected: usize,
    },
    Finished,
}

pub struct QkdSession {
    role: Role,
    config: PostProcessingConfig,
    amplifier: PrivacyAmplifier,
    input: SessionInput,
    rng: ChaCha20Rng,
    phase: Phase,
}

impl QkdSession {
    pub fn alice(config: PostProcessingConfig, input: SessionInput) -> Result<Self> {
        Self::new(Role::Initiator, config, input)
    }

    pub fn bob(config: PostProcessingConfig, input: SessionInput) -> Result<Self> {
        Self::new(Role::Responder, config, input)
    }

    pub fn new(role: Role, config: PostProcessingConfig, input: SessionInput) -> Result<Self> {
        let amplifier = config.amplifier()?;
        config.validate()?;
        input.validate()?;
        Ok(QkdSession {
            role,
            config,
            amplifier,
            input,
            rng: ChaCha20Rng::from_entropy(),
            phase: Phase::Pending,
        })
    }

    /// Makes Alice's salt and seed draws reproducible.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha20Rng::seed_from_u64(seed);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished)
    }

    fn abort(&mut self, code: FailureCode, message: String) -> QkdResult {
        warn!("{:?} aborting session: {} ({})", self.role, code, message);
        self.phase = Phase::Finished;
        QkdResult::failure(code, message)
    }

    /// Joins the last message of a finished phase with the opening move of
    /// the next one. A phase may end by sending, but then the next one must
    /// open by waiting.
    fn chain(pending: Option<Message>, next: Transition<QkdResult>) -> Result<Transition<QkdResult>> {
        match (pending, next) {
            (None, next) => Ok(next),
            (Some(message), Transition::Await) => Ok(Transition::Send(message)),
            (Some(message), Transition::Finish { last: None, outcome }) => Ok(Transition::finish_with(message, outcome)),
            (Some(message), _) => Err(QkdError::protocol(format!(
                "{} would be followed by a second message in the same round",
                message.header()
            ))),
        }
    }

    fn on_cascade(&mut self, transition: Transition<CascadeOutcome>) -> Result<Transition<QkdResult>> {
        let (last, cascade) = match transition {
            Transition::Send(message) => return Ok(Transition::Send(message)),
            Transition::Await => return Ok(Transition::Await),
            Transition::Finish { last, outcome } => (last, outcome),
        };
        info!(
            "{:?} reconciliation complete: {} errors corrected, {} bits leaked",
            self.role, cascade.errors_corrected, cascade.leakage_bits
        );

        let field = self.config.verification_field;
        let mut verifier = match self.role {
            Role::Initiator => KeyVerifier::initiator(cascade.key.clone(), field, &mut self.rng)?,
            Role::Responder => KeyVerifier::responder(cascade.key.clone(), field)?,
        };
        let opening = verifier.start()?;
        self.phase = Phase::Verifying { verifier, cascade };
        let next = self.on_verify(opening)?;
        Self::chain(last, next)
    }

    fn on_verify(&mut self, transition: Transition<VerificationOutcome>) -> Result<Transition<QkdResult>> {
        let (last, verification) = match transition {
            Transition::Send(message) => return Ok(Transition::Send(message)),
            Transition::Await => return Ok(Transition::Await),
            Transition::Finish { last, outcome } => (last, outcome),
        };
        let cascade = match std::mem::replace(&mut self.phase, Phase::Finished) {
            Phase::Verifying { cascade, .. } => cascade,
            _ => return Err(QkdError::protocol("verification finished outside the verification phase")),
        };
        let leakage = cascade.leakage_bits + verification.leakage_bits;

        if !verification.matched {
            let result = self
                .abort(
                    FailureCode::VerificationFailed,
                    "Keys do not match after reconciliation".to_string(),
                )
                .with_leakage(leakage, cascade.errors_corrected);
            return Self::chain(last, Transition::finish(result));
        }
        info!("{:?} key verification successful", self.role);

        let raw_length = self.input.sifted_key.len();
        let sample_errors = (self.input.sample_qber * self.input.num_test_bits as f64).floor() as usize;
        let qber = estimate_qber_from_cascade(raw_length, sample_errors, cascade.errors_corrected)?;
        debug!(
            "key length inputs: reconciled={} qber={:.4} leakage_ec={} leakage_ver={} epsilon={}",
            cascade.key.len(),
            qber,
            cascade.leakage_bits,
            verification.leakage_bits,
            self.config.epsilon_sec
        );
        let output_length = self.amplifier.compute_output_length(
            cascade.key.len(),
            qber,
            cascade.leakage_bits,
            verification.leakage_bits,
        )?;

        if output_length == 0 {
            let result = self
                .abort(
                    FailureCode::InsufficientSecrecy,
                    format!("Cannot extract a secure key from {} bits at QBER {:.4}", cascade.key.len(), qber),
                )
                .with_qber(qber)
                .with_leakage(leakage, cascade.errors_corrected);
            return Self::chain(last, Transition::finish(result));
        }
        info!("{:?} target final key length: {}", self.role, output_length);

        match self.role {
            Role::Initiator => {
                let seed = self
                    .amplifier
                    .generate_seed(cascade.key.len(), output_length, &mut self.rng)?
                    .into_bits();
                let secret = self.amplifier.amplify(&cascade.key, &seed, output_length)?;
                let result = QkdResult::success(secret, qber, leakage, cascade.errors_corrected);
                info!(
                    "{:?} protocol complete: {}-bit key, QBER {:.4}, leakage {}",
                    self.role, result.key_length, qber, leakage
                );
                Self::chain(last, Transition::finish_with(Message::PaSeed { seed }, result))
            }
            Role::Responder => {
                self.phase = Phase::AwaitingSeed {
                    key: cascade.key,
                    output_length,
                    qber,
                    leakage,
                    errors_corrected: cascade.errors_corrected,
                };
                Self::chain(last, Transition::Await)
            }
        }
    }

    fn on_seed(&mut self, message: Message) -> Result<Transition<QkdResult>> {
        let seed = match message {
            Message::PaSeed { seed } => seed,
            other => {
                return Err(QkdError::protocol(format!(
                    "expected PA_SEED, got {}",
                    other.header()
                )))
            }
        };
        let (key, output_length, qber, leakage, errors_corrected) =
            match std::mem::replace(&mut self.phase, Phase::Finished) {
                Phase::AwaitingSeed {
                    key,
                    output_length,
                    qber,
                    leakage,
                    errors_corrected,
                } => (key, output_length, qber, leakage, errors_corrected),
                _ => return Err(QkdError::protocol("PA_SEED outside the amplification phase")),
            };
        if seed.len() != key.len() + output_length - 1 {
            return Err(QkdError::protocol(format!(
                "PA_SEED carries {} bits, expected {}",
                seed.len(),
                key.len() + output_length - 1
            )));
        }
        let secret = self.amplifier.amplify(&key, &seed, output_length)?;
        let result = QkdResult::success(secret, qber, leakage, errors_corrected);
        info!(
            "{:?} protocol complete: {}-bit key, QBER {:.4}, leakage {}",
            self.role, result.key_length, qber, leakage
        );
        Ok(Transition::finish(result))
    }
}

impl Party for QkdSession {
    type Outcome = QkdResult;

    fn start(&mut self) -> Result<Transition<QkdResult>> {
        if !matches!(self.phase, Phase::Pending) {
            return Err(QkdError::protocol("session already started"));
        }
        let raw_length = self.input.sifted_key.len();
        info!(
            "{:?} starting post-processing: raw key {} bits, sample QBER {:.4}",
            self.role, raw_length, self.input.sample_qber
        );

        if self.input.sample_qber > self.config.qber_threshold {
            let message = format!(
                "QBER {:.4} > {}",
                self.input.sample_qber, self.config.qber_threshold
            );
            let qber = self.input.sample_qber;
            return Ok(Transition::finish(
                self.abort(FailureCode::QberTooHigh, message).with_qber(qber),
            ));
        }
        if raw_length < self.config.min_key_length {
            let message = format!("Raw key length {raw_length} insufficient");
            return Ok(Transition::finish(self.abort(FailureCode::KeyTooShort, message)));
        }

        let params = CascadeParams::for_key(
            raw_length,
            self.config.cascade_seed,
            self.config.num_passes,
            Some(self.input.sample_qber),
            self.config.initial_block_size,
        )?;
        let mut cascade = CascadeSession::new(self.role, self.input.sifted_key.clone(), params)?;
        debug!("{:?} cascade initial block size {}", self.role, params.initial_block_size);
        let opening = cascade.start()?;
        self.phase = Phase::Reconciling(cascade);
        self.on_cascade(opening)
    }

    fn advance(&mut self, message: Message) -> Result<Transition<QkdResult>> {
        match &mut self.phase {
            Phase::Reconciling(cascade) => {
                let transition = cascade.advance(message)?;
                self.on_cascade(transition)
            }
            Phase::Verifying { verifier, .. } => {
                let transition = verifier.advance(message)?;
                self.on_verify(transition)
            }
            Phase::AwaitingSeed { .. } => self.on_seed(message),
            Phase::Pending | Phase::Finished => Err(QkdError::protocol(format!(
                "unexpected {} outside an active session",
                message.header()
            ))),
        }
    }
}
