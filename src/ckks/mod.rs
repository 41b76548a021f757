//! The CKKS scheme layer: parameters, encoding, keys and the homomorphic
//! evaluator the higher-level circuits are built from.

pub mod chebyshev;
pub mod ciphertext;
pub mod client_key;
pub mod encoding;
pub mod evaluator;
pub mod parameters;
pub mod server_key;

pub use ciphertext::{Ciphertext, Plaintext, Scale};
pub use client_key::ClientKey;
pub use encoding::Encoder;
pub use evaluator::Evaluator;
pub use parameters::{CkksParameters, CkksParametersLiteral, RingType};
pub use server_key::EvaluationKeys;
