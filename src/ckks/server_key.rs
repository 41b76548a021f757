//! Public evaluation key material.
//!
//! The bundle the server computes with: the relinearization key, one Galois
//! key per automorphism the circuits rotate by, and the conjugation key for
//! standard rings. Generation fans out across rotations with rayon; every
//! key is derived from an independent stream of a seeded CSPRNG.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::core_crypto::rlwe::KeySwitchKey;
use crate::error::{Error, Result};

use super::client_key::ClientKey;
use super::parameters::CkksParameters;

pub struct EvaluationKeys {
    pub(crate) relin: Option<KeySwitchKey>,
    pub(crate) galois: HashMap<u64, KeySwitchKey>,
}

impl EvaluationKeys {
    /// Generates the relinearization key plus Galois keys for the given
    /// slot rotations (and conjugation when requested).
    pub fn generate<R: Rng>(
        params: &CkksParameters,
        client_key: &ClientKey,
        rotations: &[i64],
        with_conjugation: bool,
        rng: &mut R,
    ) -> Self {
        let mut galois_elements: Vec<u64> = rotations
            .iter()
            .map(|&k| params.galois_element(k))
            .filter(|&g| g != 1)
            .collect();
        if with_conjugation {
            galois_elements.push(params.galois_element_conjugation());
        }
        galois_elements.sort_unstable();
        galois_elements.dedup();
        Self::generate_for_elements(params, client_key, &galois_elements, rng)
    }

    /// Generates keys for an explicit set of Galois elements.
    pub fn generate_for_elements<R: Rng>(
        params: &CkksParameters,
        client_key: &ClientKey,
        galois_elements: &[u64],
        rng: &mut R,
    ) -> Self {
        let ring = params.ring();
        let secret = client_key.secret();

        let mut relin_rng = ChaCha8Rng::seed_from_u64(rng.gen());
        let relin = KeySwitchKey::generate(ring, &secret.square(ring), secret, &mut relin_rng);

        let seeds: Vec<(u64, u64)> = galois_elements.iter().map(|&g| (g, rng.gen())).collect();
        let galois = seeds
            .par_iter()
            .map(|&(g, seed)| {
                let mut key_rng = ChaCha8Rng::seed_from_u64(seed);
                let image = secret.automorphism_image(ring, g);
                (g, KeySwitchKey::generate(ring, &image, secret, &mut key_rng))
            })
            .collect();

        Self {
            relin: Some(relin),
            galois,
        }
    }

    pub fn relin_key(&self) -> Result<&KeySwitchKey> {
        self.relin
            .as_ref()
            .ok_or_else(|| Error::MissingKey("relinearization key".into()))
    }

    pub fn galois_key(&self, galois_element: u64) -> Result<&KeySwitchKey> {
        self.galois
            .get(&galois_element)
            .ok_or_else(|| Error::MissingKey(format!("Galois key for element {galois_element}")))
    }

    pub fn has_galois_key(&self, galois_element: u64) -> bool {
        self.galois.contains_key(&galois_element)
    }

    pub fn galois_elements(&self) -> Vec<u64> {
        self.galois.keys().copied().collect()
    }
}
