//! # bb84_postprocessing
//!
//! Classical post-processing for BB84 quantum key distribution. Takes the
//! sifted keys Alice and Bob hold after the quantum exchange and turns them
//! into identical, information-theoretically secret keys:
//!
//! ```text
//! sifted key (+ sampled QBER)
//!   ↓ Cascade reconciliation (parity exchange, binary search)
//! reconciled key
//!   ↓ polynomial-hash equality check over GF(2^64) / GF(2^128)
//! verified key
//!   ↓ Devetak–Winter length, Toeplitz universal hashing
//! secret key
//! ```
//!
//! Every public message is carried over a Wegman–Carter authenticated channel
//! keyed with a pre-shared secret.
//!
//! ## Security bound
//!
//! The final length is `n·(1 − h(Q)) − leak_EC − leak_ver − 2·log2(1/ε)`,
//! which is positive only below the 11% Shor–Preskill QBER threshold.

pub mod auth;
pub mod bits;
pub mod config;
pub mod errors;
pub mod galois;
pub mod privacy;
pub mod protocol;
pub mod reconciliation;
pub mod results;
pub mod simulation;
pub mod toeplitz;
pub mod verification;

pub mod prelude {
    pub use crate::auth::{AuthKey, AuthenticatedChannel, MemoryLink, Transport};
    pub use crate::config::PostProcessingConfig;
    pub use crate::errors::{AuthError, ParameterError, QkdError, Result};
    pub use crate::galois::FieldSize;
    pub use crate::privacy::PrivacyAmplifier;
    pub use crate::protocol::{drive, run_lockstep, Message, Party, QkdSession, Role, SessionInput, Transition};
    pub use crate::reconciliation::{CascadeParams, CascadeSession};
    pub use crate::results::{FailureCode, QkdResult};
    pub use crate::simulation::{BinarySymmetricLink, QuantumLink, SimulationConfig};
    pub use crate::verification::KeyVerifier;
}

#[cfg(test)]
mod tests;
