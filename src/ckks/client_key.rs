//! The secret key of the client, with encryption and decryption.
//!
//! Decryption exists so tests and callers can close the loop; the
//! homomorphic layer never touches it.

use rand::Rng;

use crate::core_crypto::rlwe::{truncated, RlweSecretKey};

use super::ciphertext::{Ciphertext, Plaintext};
use super::parameters::CkksParameters;

pub struct ClientKey {
    pub(crate) secret: RlweSecretKey,
    params: CkksParameters,
}

impl ClientKey {
    pub fn generate<R: Rng>(params: &CkksParameters, rng: &mut R) -> Self {
        let secret = RlweSecretKey::generate(params.ring(), None, rng);
        Self {
            secret,
            params: params.clone(),
        }
    }

    /// A secret of fixed Hamming weight. Bootstrapping parameters bound
    /// the coefficient wrap by K, which only holds for sparse secrets.
    pub fn generate_sparse<R: Rng>(
        params: &CkksParameters,
        hamming_weight: usize,
        rng: &mut R,
    ) -> Self {
        let secret = RlweSecretKey::generate(params.ring(), Some(hamming_weight), rng);
        Self {
            secret,
            params: params.clone(),
        }
    }

    pub fn params(&self) -> &CkksParameters {
        &self.params
    }

    pub(crate) fn secret(&self) -> &RlweSecretKey {
        &self.secret
    }

    /// Encrypts a plaintext at the plaintext's level and scale.
    pub fn encrypt<R: Rng>(&self, plaintext: &Plaintext, rng: &mut R) -> Ciphertext {
        let ring = self.params.ring();
        let q_rows = plaintext.poly.q_rows();
        let c1 = ring.sample_uniform(q_rows, 0, rng);
        let mut c0 = ring.poly_from_signed(&ring.sample_gaussian_coeffs(rng), q_rows, 0);
        ring.ntt_assign(&mut c0);
        ring.add_assign(&mut c0, &plaintext.poly);
        let mut c1_s = ring.mul(&c1, &truncated(&self.secret.poly, q_rows));
        ring.neg_assign(&mut c1_s);
        ring.add_assign(&mut c0, &c1_s);
        Ciphertext::new(vec![c0, c1], plaintext.scale.clone(), plaintext.log_slots)
    }

    /// Decrypts a ciphertext of any degree by evaluating its parts at the
    /// powers of the secret.
    pub fn decrypt(&self, ciphertext: &Ciphertext) -> Plaintext {
        let ring = self.params.ring();
        let q_rows = ciphertext.level() + 1;
        let s = truncated(&self.secret.poly, q_rows);
        let mut acc = ciphertext.parts[0].clone();
        let mut s_pow = s.clone();
        for part in &ciphertext.parts[1..] {
            let term = ring.mul(part, &s_pow);
            ring.add_assign(&mut acc, &term);
            ring.mul_assign(&mut s_pow, &s);
        }
        Plaintext::new(acc, ciphertext.scale.clone(), ciphertext.log_slots)
    }
}
