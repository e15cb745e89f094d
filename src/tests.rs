use crate::auth::channel::{AuthenticatedChannel, Frame, MemoryLink, Transport};
use crate::auth::wegman_carter::AuthKey;
use crate::config::PostProcessingConfig;
use crate::errors::{QkdError, Result};
use crate::protocol::{drive, run_lockstep, QkdSession, SessionInput};
use crate::results::{FailureCode, QkdResult};
use crate::simulation::{run_batch, run_session, BinarySymmetricLink, SimulationConfig};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn config() -> PostProcessingConfig {
        PostProcessingConfig::new(AuthKey::new(vec![0x5a; 32]).unwrap(), 2024)
    }

    /// Identical random keys, with Bob's copy flipped at `errors`.
    fn inputs(n: usize, errors: &[usize]) -> (SessionInput, SessionInput) {
        let mut rng = ChaCha20Rng::seed_from_u64(n as u64);
        let alice: Vec<bool> = (0..n).map(|_| rng.gen()).collect();
        let mut bob = alice.clone();
        for &i in errors {
            bob[i] = !bob[i];
        }
        let input = |key| SessionInput {
            sifted_key: key,
            sample_qber: 0.0,
            num_test_bits: 500,
        };
        (input(alice), input(bob))
    }

    /// Flips the payload of the `at`-th frame this side receives.
    struct Tamper<T> {
        inner: T,
        at: usize,
        received: usize,
    }

    impl<T: Transport> Transport for Tamper<T> {
        fn send(&mut self, frame: Frame) -> Result<()> {
            self.inner.send(frame)
        }

        fn receive(&mut self) -> Result<Frame> {
            let mut frame = self.inner.receive()?;
            if self.received == self.at {
                frame.payload.push(' ');
            }
            self.received += 1;
            Ok(frame)
        }
    }

    fn run_with_tampering(
        config: &PostProcessingConfig,
        alice_input: SessionInput,
        bob_input: SessionInput,
        at: usize,
    ) -> (Result<QkdResult>, Result<QkdResult>) {
        let (alice_link, bob_link) = MemoryLink::pair();
        let tampered = Tamper {
            inner: bob_link,
            at,
            received: 0,
        };
        let mut alice_channel = AuthenticatedChannel::new(alice_link, config.auth_key.clone(), 64).unwrap();
        let mut bob_channel = AuthenticatedChannel::new(tampered, config.auth_key.clone(), 64).unwrap();
        let mut alice = QkdSession::alice(config.clone(), alice_input).unwrap();
        let mut bob = QkdSession::bob(config.clone(), bob_input).unwrap();

        std::thread::scope(|s| {
            let bob_thread = s.spawn(move || drive(&mut bob, &mut bob_channel));
            let alice_result = drive(&mut alice, &mut alice_channel);
            drop(alice_channel);
            (alice_result, bob_thread.join().unwrap())
        })
    }

    #[test]
    fn single_error_is_corrected_and_keys_agree() {
        init_logging();
        let (a, b) = inputs(4000, &[123]);
        let mut alice = QkdSession::alice(config(), a).unwrap().with_rng_seed(9);
        let mut bob = QkdSession::bob(config(), b).unwrap();
        let (ra, rb) = run_lockstep(&mut alice, &mut bob).unwrap();

        assert!(ra.success, "{:?}", ra.failure);
        assert!(rb.success, "{:?}", rb.failure);
        assert_eq!(ra.secret_key, rb.secret_key);
        assert_eq!(ra.errors_corrected, 1);
        assert_eq!(rb.errors_corrected, 1);
        assert_eq!(ra.qber, 1.0 / 4000.0);
        // 8 block parities, one bisection of a 1000-bit block, a 128-bit tag
        assert!((8 + 9 + 128..=8 + 10 + 128).contains(&ra.leakage), "leakage {}", ra.leakage);
        assert_eq!(ra.leakage, rb.leakage);
    }

    #[test]
    fn threaded_session_over_authenticated_link() {
        init_logging();
        let (a, b) = inputs(3000, &[7]);
        let (ra, rb) = run_session(&config(), a, b).unwrap();
        assert!(ra.success && rb.success);
        assert_eq!(ra.secret_key, rb.secret_key);
        assert_eq!(ra.key_length, ra.secret_key.len());
    }

    #[test]
    fn undetected_errors_are_caught_by_verification() {
        let (a, b) = inputs(3000, &[100, 200]);
        let mut config = config();
        config.num_passes = 1;
        config.initial_block_size = Some(3000);
        let (ra, rb) = run_session(&config, a, b).unwrap();
        assert_eq!(ra.failure_code(), Some(FailureCode::VerificationFailed));
        assert_eq!(rb.failure_code(), Some(FailureCode::VerificationFailed));
        assert!(ra.secret_key.is_empty() && rb.secret_key.is_empty());
    }

    #[test]
    fn tampered_frame_aborts_the_session() {
        init_logging();
        let (a, b) = inputs(2000, &[]);
        let (ra, rb) = run_with_tampering(&config(), a, b, 0);
        let bob_err = rb.unwrap_err();
        assert!(bob_err.is_security_failure(), "{bob_err}");
        assert!(matches!(ra, Err(QkdError::Channel(_))));
    }

    #[test]
    fn tampered_seed_aborts_the_session() {
        let (a, b) = inputs(2000, &[]);
        let (ra, rb) = run_with_tampering(&config(), a, b, usize::MAX);
        assert!(ra.unwrap().success && rb.unwrap().success);

        // Bob's last inbound frame is PA_SEED
        let (a, b) = inputs(2000, &[]);
        let frames_to_bob = count_frames_to_bob(&config(), a.clone(), b.clone());
        let (ra, rb) = run_with_tampering(&config(), a, b, frames_to_bob - 1);
        assert!(rb.unwrap_err().is_security_failure());
        // Alice already finished before Bob opened the seed
        assert!(ra.unwrap().success);
    }

    fn count_frames_to_bob(config: &PostProcessingConfig, a: SessionInput, b: SessionInput) -> usize {
        let (alice_link, bob_link) = MemoryLink::pair();
        let counted = Tamper {
            inner: bob_link,
            at: usize::MAX,
            received: 0,
        };
        let mut alice_channel = AuthenticatedChannel::new(alice_link, config.auth_key.clone(), 64).unwrap();
        let mut bob_channel = AuthenticatedChannel::new(counted, config.auth_key.clone(), 64).unwrap();
        let mut alice = QkdSession::alice(config.clone(), a).unwrap();
        let mut bob = QkdSession::bob(config.clone(), b).unwrap();
        std::thread::scope(|s| {
            let bob_thread = s.spawn(move || {
                drive(&mut bob, &mut bob_channel).unwrap();
                bob_channel.into_transport().received
            });
            drive(&mut alice, &mut alice_channel).unwrap();
            bob_thread.join().unwrap()
        })
    }

    #[test]
    fn mismatched_auth_keys_never_agree() {
        let (a, b) = inputs(2000, &[]);
        let (alice_link, bob_link) = MemoryLink::pair();
        let mut alice_channel = AuthenticatedChannel::new(alice_link, AuthKey::new(vec![1u8; 32]).unwrap(), 64).unwrap();
        let mut bob_channel = AuthenticatedChannel::new(bob_link, AuthKey::new(vec![2u8; 32]).unwrap(), 64).unwrap();
        let mut alice = QkdSession::alice(config(), a).unwrap();
        let mut bob = QkdSession::bob(config(), b).unwrap();
        let (ra, rb) = std::thread::scope(|s| {
            let bob_thread = s.spawn(move || drive(&mut bob, &mut bob_channel));
            let ra = drive(&mut alice, &mut alice_channel);
            drop(alice_channel);
            (ra, bob_thread.join().unwrap())
        });
        assert!(rb.unwrap_err().is_security_failure());
        assert!(ra.is_err());
    }

    #[test]
    fn noiseless_batch_always_produces_keys() {
        let config = SimulationConfig {
            runs: 4,
            key_length: 3000,
            noise: 0.0,
            sample_size: 300,
            ..SimulationConfig::new(AuthKey::new(vec![0x3c; 32]).unwrap())
        };
        let link = BinarySymmetricLink::new(0.0).unwrap();
        let results = run_batch(&link, &config);
        assert_eq!(results.len(), 4);
        for result in &results {
            assert!(result.success, "{:?}", result.failure);
            assert_eq!(result.qber, 0.0);
            assert_eq!(result.errors_corrected, 0);
        }
    }

    #[test]
    fn noisy_batch_reports_policy_outcomes_only() {
        let config = SimulationConfig {
            runs: 4,
            key_length: 6000,
            noise: 0.02,
            sample_size: 600,
            ..SimulationConfig::new(AuthKey::new(vec![0x3c; 32]).unwrap())
        };
        let link = BinarySymmetricLink::new(config.noise).unwrap();
        for result in run_batch(&link, &config) {
            match result.failure_code() {
                None => assert!(result.key_length > 0),
                Some(code) => assert!(
                    matches!(code, FailureCode::VerificationFailed | FailureCode::InsufficientSecrecy),
                    "unexpected {code}"
                ),
            }
        }
    }

    #[test]
    fn eavesdropped_batch_is_rejected_on_sampling() {
        let config = SimulationConfig {
            runs: 3,
            key_length: 4000,
            noise: 0.25,
            sample_size: 1000,
            ..SimulationConfig::new(AuthKey::new(vec![0x3c; 32]).unwrap())
        };
        let link = BinarySymmetricLink::new(config.noise).unwrap();
        for result in run_batch(&link, &config) {
            assert_eq!(result.failure_code(), Some(FailureCode::QberTooHigh));
            assert!(result.qber > 0.11);
        }
    }

    #[test]
    fn results_serialize_for_reporting() {
        let (a, b) = inputs(2000, &[5]);
        let (ra, _) = run_session(&config(), a, b).unwrap();
        let json = serde_json::to_string(&ra).unwrap();
        let back: QkdResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ra);
    }
}
