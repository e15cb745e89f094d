//! End-to-end simulation harness: a noisy quantum link stand-in, public
//! error sampling and two parties running over an authenticated in-memory
//! link on separate threads.

use std::env;

use log::{debug, info};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::auth::channel::{AuthenticatedChannel, MemoryLink};
use crate::auth::wegman_carter::AuthKey;
use crate::bits::hamming_distance;
use crate::config::PostProcessingConfig;
use crate::errors::{ParameterError, QkdError, Result};
use crate::protocol::driver::drive;
use crate::protocol::session::{QkdSession, SessionInput};
use crate::reconciliation::cascade::DEFAULT_NUM_PASSES;
use crate::results::QkdResult;

/// Sifted key material as produced by the quantum and sifting stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiftedKeys {
    pub alice: Vec<bool>,
    pub bob: Vec<bool>,
}

pub trait QuantumLink {
    /// Produces `length` sifted bits for each party.
    fn sift<R: Rng + ?Sized>(&self, length: usize, rng: &mut R) -> SiftedKeys;
}

/// Flips each of Bob's bits independently with probability `qber`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BinarySymmetricLink {
    qber: f64,
}

impl BinarySymmetricLink {
    pub fn new(qber: f64) -> std::result::Result<Self, ParameterError> {
        if !(0.0..=0.5).contains(&qber) {
            return Err(ParameterError::OutOfRange {
                name: "qber",
                range: "[0, 0.5]",
                value: qber,
            });
        }
        Ok(BinarySymmetricLink { qber })
    }

    pub fn qber(&self) -> f64 {
        self.qber
    }
}

impl QuantumLink for BinarySymmetricLink {
    fn sift<R: Rng + ?Sized>(&self, length: usize, rng: &mut R) -> SiftedKeys {
        let alice: Vec<bool> = (0..length).map(|_| rng.gen()).collect();
        let bob = alice.iter().map(|&bit| bit ^ rng.gen_bool(self.qber)).collect();
        SiftedKeys { alice, bob }
    }
}

/// Discloses `sample_size` randomly chosen positions, measures the error
/// rate on them and strips them from both keys.
pub fn disclose_sample<R: Rng + ?Sized>(
    keys: SiftedKeys,
    sample_size: usize,
    rng: &mut R,
) -> std::result::Result<(SessionInput, SessionInput), ParameterError> {
    if keys.alice.len() != keys.bob.len() {
        return Err(ParameterError::LengthMismatch {
            what: "sifted keys",
            expected: keys.alice.len(),
            got: keys.bob.len(),
        });
    }
    if sample_size == 0 || sample_size >= keys.alice.len() {
        return Err(ParameterError::OutOfRange {
            name: "sample_size",
            range: "[1, key length)",
            value: sample_size as f64,
        });
    }

    let mut disclosed = vec![false; keys.alice.len()];
    for index in sample(rng, keys.alice.len(), sample_size) {
        disclosed[index] = true;
    }
    let pick = |key: &[bool], want: bool| -> Vec<bool> {
        key.iter()
            .zip(&disclosed)
            .filter(|&(_, &d)| d == want)
            .map(|(&bit, _)| bit)
            .collect()
    };

    let errors = hamming_distance(&pick(&keys.alice, true), &pick(&keys.bob, true));
    let sample_qber = errors as f64 / sample_size as f64;
    debug!("sampled {} bits, {} errors, QBER {:.4}", sample_size, errors, sample_qber);

    let input = |key: Vec<bool>| SessionInput {
        sifted_key: key,
        sample_qber,
        num_test_bits: sample_size,
    };
    Ok((input(pick(&keys.alice, false)), input(pick(&keys.bob, false))))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub runs: usize,
    /// Sifted bits per run, before sampling.
    pub key_length: usize,
    pub noise: f64,
    pub sample_size: usize,
    pub num_passes: usize,
    /// Seeds the link, the sampling and the Cascade permutations. Public.
    pub seed: u64,
    /// Pre-shared Wegman–Carter key, never derived from `seed`.
    #[serde(with = "crate::config::auth_key_hex")]
    pub auth_key: AuthKey,
}

fn env_var<T: std::str::FromStr>(name: &str) -> std::result::Result<Option<T>, ParameterError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ParameterError::Config(format!("{name}={value:?} is not valid"))),
        Err(_) => Ok(None),
    }
}

impl SimulationConfig {
    pub fn new(auth_key: AuthKey) -> Self {
        SimulationConfig {
            runs: 8,
            key_length: 10_000,
            noise: 0.02,
            sample_size: 1000,
            num_passes: DEFAULT_NUM_PASSES,
            seed: 42,
            auth_key,
        }
    }

    /// `QKD_AUTH_KEY` (hex) is mandatory. Defaults are overridden
    /// by `QKD_RUNS`, `QKD_KEY_LENGTH`, `QKD_NOISE`, `QKD_SAMPLE_SIZE`,
    /// `QKD_PASSES` and `QKD_SEED`.
    pub fn from_env() -> std::result::Result<Self, ParameterError> {
        let auth_key = match env_var::<String>("QKD_AUTH_KEY")? {
            Some(key) => AuthKey::from_hex(&key)?,
            None => return Err(ParameterError::Config("QKD_AUTH_KEY must be set".into())),
        };
        let mut config = SimulationConfig::new(auth_key);
        if let Some(runs) = env_var("QKD_RUNS")? {
            config.runs = runs;
        }
        if let Some(length) = env_var("QKD_KEY_LENGTH")? {
            config.key_length = length;
        }
        if let Some(noise) = env_var("QKD_NOISE")? {
            config.noise = noise;
        }
        if let Some(size) = env_var("QKD_SAMPLE_SIZE")? {
            config.sample_size = size;
        }
        if let Some(passes) = env_var("QKD_PASSES")? {
            config.num_passes = passes;
        }
        if let Some(seed) = env_var("QKD_SEED")? {
            config.seed = seed;
        }
        Ok(config)
    }

    /// Post-processing configuration for one run.
    pub fn post_processing(&self, run: usize) -> std::result::Result<PostProcessingConfig, ParameterError> {
        let mut config = PostProcessingConfig::new(self.auth_key.clone(), self.seed.wrapping_add(run as u64));
        config.num_passes = self.num_passes;
        config.validate()?;
        Ok(config)
    }
}

/// Runs Alice and Bob on two threads connected by an authenticated
/// in-memory link.
pub fn run_session(
    config: &PostProcessingConfig,
    alice_input: SessionInput,
    bob_input: SessionInput,
) -> Result<(QkdResult, QkdResult)> {
    let (alice_link, bob_link) = MemoryLink::pair();
    let mut alice_channel = AuthenticatedChannel::new(alice_link, config.auth_key.clone(), config.auth_tag_bits)?;
    let mut bob_channel = AuthenticatedChannel::new(bob_link, config.auth_key.clone(), config.auth_tag_bits)?;
    let mut alice = QkdSession::alice(config.clone(), alice_input)?;
    let mut bob = QkdSession::bob(config.clone(), bob_input)?;

    let (alice_result, bob_result) = std::thread::scope(|s| {
        let bob_thread = s.spawn(move || drive(&mut bob, &mut bob_channel));
        let alice_result = drive(&mut alice, &mut alice_channel);
        // unblocks Bob if Alice aborted mid-exchange
        drop(alice_channel);
        let bob_result = bob_thread
            .join()
            .unwrap_or_else(|_| Err(QkdError::Channel("responder thread panicked".into())));
        (alice_result, bob_result)
    });
    Ok((alice_result?, bob_result?))
}

/// One full run: sift over the link, disclose a sample, post-process.
pub fn simulate_run<L: QuantumLink + Sync>(
    link: &L,
    config: &SimulationConfig,
    run: usize,
) -> Result<(QkdResult, QkdResult)> {
    let mut rng = ChaCha20Rng::seed_from_u64(config.seed.wrapping_add(run as u64));
    let keys = link.sift(config.key_length, &mut rng);
    let (alice_input, bob_input) = disclose_sample(keys, config.sample_size, &mut rng)?;
    let post_processing = config.post_processing(run)?;
    run_session(&post_processing, alice_input, bob_input)
}

/// Alice's outcome for each of `config.runs` independent runs, executed in
/// parallel. Aborted runs are reported as `protocol_error` results.
pub fn run_batch<L: QuantumLink + Sync>(link: &L, config: &SimulationConfig) -> Vec<QkdResult> {
    let results: Vec<QkdResult> = (0..config.runs)
        .into_par_iter()
        .map(|run| match simulate_run(link, config, run) {
            Ok((alice, bob)) => {
                if alice.success && alice.secret_key != bob.secret_key {
                    return QkdResult::from_error(&QkdError::protocol("final keys disagree"));
                }
                alice
            }
            Err(err) => QkdResult::from_error(&err),
        })
        .collect();
    let succeeded = results.iter().filter(|r| r.success).count();
    info!("batch complete: {}/{} runs produced a key", succeeded, results.len());
    results
}
