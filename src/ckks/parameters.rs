//! The cryptographic parameter set of the scheme layer.
//!
//! A [`CkksParametersLiteral`] is the serializable description (ring degree,
//! prime bit sizes, default scale); [`CkksParameters`] is the materialized
//! form holding the generated prime chains and the shared ring. Failing to
//! pick secure parameters yields correct but insecure computation; the
//! literals used by the tests in this crate are toy-sized on purpose.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core_crypto::modulus::generate_ntt_primes;
use crate::core_crypto::ring::RnsRing;
use crate::error::{Error, Result};

use super::ciphertext::Scale;

/// Default arbitrary-precision float width for scales and approximation
/// arithmetic, in bits.
pub const DEFAULT_FLOAT_PRECISION: u32 = 256;

/// Whether the residual ring is the full negacyclic ring (N/2 complex
/// slots) or carries real-only payload (the conjugate-invariant domain).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RingType {
    Standard,
    ConjugateInvariant,
}

/// A serializable description of a CKKS parameter set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CkksParametersLiteral {
    pub log_n: usize,
    /// Bit sizes of the Q-chain primes, bottom first.
    pub log_q: Vec<usize>,
    /// Bit sizes of the auxiliary P-chain primes.
    pub log_p: Vec<usize>,
    pub log_default_scale: usize,
    pub ring_type: RingType,
    /// Arbitrary-precision float width threaded through all scale and
    /// approximation arithmetic. Defaults to 256 bits.
    #[serde(default)]
    pub float_precision: Option<u32>,
}

/// The materialized parameter set.
#[derive(Clone)]
pub struct CkksParameters {
    log_n: usize,
    q_primes: Vec<u64>,
    p_primes: Vec<u64>,
    log_default_scale: usize,
    ring_type: RingType,
    float_precision: u32,
    ring: Arc<RnsRing>,
}

impl CkksParameters {
    pub fn from_literal(literal: &CkksParametersLiteral) -> Result<Self> {
        if literal.log_q.is_empty() {
            return Err(Error::InvalidParameters("empty Q chain".into()));
        }
        if literal.log_n < 4 || literal.log_n > 17 {
            return Err(Error::InvalidParameters(format!(
                "unsupported ring degree 2^{}",
                literal.log_n
            )));
        }
        let all_sizes: Vec<usize> = literal
            .log_q
            .iter()
            .chain(literal.log_p.iter())
            .copied()
            .collect();
        let primes = generate_ntt_primes(literal.log_n, &all_sizes).ok_or_else(|| {
            Error::InvalidParameters("could not generate the requested prime chain".into())
        })?;
        let (q_primes, p_primes) = primes.split_at(literal.log_q.len());
        let ring = Arc::new(RnsRing::new(literal.log_n, q_primes, p_primes));
        Ok(Self {
            log_n: literal.log_n,
            q_primes: q_primes.to_vec(),
            p_primes: p_primes.to_vec(),
            log_default_scale: literal.log_default_scale,
            ring_type: literal.ring_type,
            float_precision: literal.float_precision.unwrap_or(DEFAULT_FLOAT_PRECISION),
            ring,
        })
    }

    /// Builds a parameter set over explicit prime chains. Used to derive
    /// residual parameters sharing the bottom of a bootstrapping chain
    /// (valid because q = 1 mod 2N2 implies q = 1 mod 2N1).
    pub fn from_primes(
        log_n: usize,
        q_primes: Vec<u64>,
        p_primes: Vec<u64>,
        log_default_scale: usize,
        ring_type: RingType,
        float_precision: u32,
    ) -> Result<Self> {
        if q_primes.is_empty() {
            return Err(Error::InvalidParameters("empty Q chain".into()));
        }
        for &q in q_primes.iter().chain(p_primes.iter()) {
            if (q - 1) % (2u64 << log_n) != 0 {
                return Err(Error::InvalidParameters(format!(
                    "prime {q} is not NTT-friendly for ring degree 2^{log_n}"
                )));
            }
        }
        let ring = Arc::new(RnsRing::new(log_n, &q_primes, &p_primes));
        Ok(Self {
            log_n,
            q_primes,
            p_primes,
            log_default_scale,
            ring_type,
            float_precision,
            ring,
        })
    }

    #[inline]
    pub fn log_n(&self) -> usize {
        self.log_n
    }

    #[inline]
    pub fn n(&self) -> usize {
        1 << self.log_n
    }

    #[inline]
    pub fn ring(&self) -> &RnsRing {
        &self.ring
    }

    pub(crate) fn ring_arc(&self) -> Arc<RnsRing> {
        Arc::clone(&self.ring)
    }

    #[inline]
    pub fn max_level(&self) -> usize {
        self.q_primes.len() - 1
    }

    #[inline]
    pub fn q_primes(&self) -> &[u64] {
        &self.q_primes
    }

    #[inline]
    pub fn p_primes(&self) -> &[u64] {
        &self.p_primes
    }

    #[inline]
    pub fn ring_type(&self) -> RingType {
        self.ring_type
    }

    #[inline]
    pub fn float_precision(&self) -> u32 {
        self.float_precision
    }

    #[inline]
    pub fn log_default_scale(&self) -> usize {
        self.log_default_scale
    }

    pub fn default_scale(&self) -> Scale {
        Scale::from_log2(self.log_default_scale as f64, self.float_precision)
    }

    /// Largest slot count a ciphertext can carry.
    #[inline]
    pub fn max_log_slots(&self) -> usize {
        self.log_n - 1
    }

    /// Galois element of the automorphism rotating the slot vector left by
    /// `k` (slot i receives the value of slot i + k).
    pub fn galois_element(&self, k: i64) -> u64 {
        let two_n = 2u64 << self.log_n;
        let order = 1u64 << (self.log_n - 1);
        let exp = k.rem_euclid(order as i64) as u64;
        let mut g = 1u64;
        let mut base = 5u64 % two_n;
        let mut e = exp;
        while e > 0 {
            if e & 1 == 1 {
                g = (g as u128 * base as u128 % two_n as u128) as u64;
            }
            base = (base as u128 * base as u128 % two_n as u128) as u64;
            e >>= 1;
        }
        g
    }

    /// Galois element of complex conjugation.
    pub fn galois_element_conjugation(&self) -> u64 {
        (2u64 << self.log_n) - 1
    }
}

impl std::fmt::Debug for CkksParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CkksParameters")
            .field("log_n", &self.log_n)
            .field("q_primes", &self.q_primes)
            .field("p_primes", &self.p_primes)
            .field("log_default_scale", &self.log_default_scale)
            .field("ring_type", &self.ring_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_roundtrips_through_serde() {
        let literal = CkksParametersLiteral {
            log_n: 10,
            log_q: vec![55, 45, 45, 45, 45, 45, 45],
            log_p: vec![56],
            log_default_scale: 45,
            ring_type: RingType::Standard,
            float_precision: None,
        };
        let json = serde_json::to_string(&literal).unwrap();
        let back: CkksParametersLiteral = serde_json::from_str(&json).unwrap();
        assert_eq!(literal, back);

        let bytes = bincode::serialize(&literal).unwrap();
        let back: CkksParametersLiteral = bincode::deserialize(&bytes).unwrap();
        assert_eq!(literal, back);
        assert_eq!(bytes, bincode::serialize(&back).unwrap());
    }

    #[test]
    fn galois_elements_are_odd_and_distinct() {
        let literal = CkksParametersLiteral {
            log_n: 8,
            log_q: vec![40, 30],
            log_p: vec![41],
            log_default_scale: 30,
            ring_type: RingType::Standard,
            float_precision: None,
        };
        let params = CkksParameters::from_literal(&literal).unwrap();
        let mut seen = std::collections::HashSet::new();
        for k in -8i64..=8 {
            let g = params.galois_element(k);
            assert_eq!(g % 2, 1);
            if k != 0 {
                assert!(seen.insert(g), "duplicate element for rotation {k}");
            }
        }
        assert_eq!(params.galois_element(0), 1);
        assert_eq!(params.galois_element_conjugation(), 2 * params.n() as u64 - 1);
    }
}
