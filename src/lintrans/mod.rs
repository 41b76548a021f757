//! Slot-space linear transformations.
//!
//! A transformation is stored as its non-zero diagonals, each pre-encoded
//! into a plaintext. Evaluation is either naive (one hoisted decomposition,
//! one rotation per diagonal) or baby-step/giant-step: diagonals are grouped
//! by residue modulo the baby count, inner sums need no key switch, and only
//! group bases are rotated - O(sqrt d) Galois keys instead of O(d).
//!
//! Neither path rescales; the output scale is diag_scale * ct_scale and the
//! caller spends the rescale (the DFT stages bake the level's prime into
//! diag_scale so the original scale returns).

use std::collections::{HashMap, HashSet};

use log::trace;
use rug::Complex;

use crate::ckks::ciphertext::{Ciphertext, Plaintext, Scale};
use crate::ckks::encoding::Encoder;
use crate::ckks::evaluator::Evaluator;
use crate::ckks::parameters::CkksParameters;
use crate::error::{Error, Result};

/// Baby count N1 = 2^ceil((log_slots - log_ratio) / 2); diagonals are
/// grouped by their residue modulo N1.
pub(crate) fn bsgs_split(log_slots: usize, log_ratio: usize) -> usize {
    let log = log_slots.saturating_sub(log_ratio);
    1 << ((log + 1) / 2)
}

/// A diagonal-encoded matrix over 2^log_slots slots.
pub struct LinearTransformation {
    pub(crate) log_slots: usize,
    pub(crate) level: usize,
    pub(crate) scale: Scale,
    /// Diagonal index (normalized to [0, slots)) -> encoded plaintext. In
    /// BSGS form the vector is pre-rotated by minus its group base.
    pub(crate) diagonals: HashMap<usize, Plaintext>,
    /// None for the naive strategy, Some(baby count) for BSGS.
    pub(crate) n1: Option<usize>,
}

impl LinearTransformation {
    /// Encodes the non-zero diagonals of a matrix at the given level and
    /// scale. `bsgs_log_ratio` selects BSGS grouping; `None` keeps the
    /// naive strategy.
    pub fn new(
        encoder: &Encoder,
        diagonals: &HashMap<i64, Vec<Complex>>,
        level: usize,
        scale: &Scale,
        log_slots: usize,
        bsgs_log_ratio: Option<usize>,
    ) -> Self {
        let slots = 1usize << log_slots;
        let n1 = bsgs_log_ratio.map(|r| bsgs_split(log_slots, r));

        let mut encoded = HashMap::with_capacity(diagonals.len());
        for (&d, diag) in diagonals {
            debug_assert_eq!(diag.len(), slots);
            let idx = d.rem_euclid(slots as i64) as usize;
            let values: Vec<Complex> = match n1 {
                None => diag.clone(),
                Some(n1) => {
                    // pre-rotate by -g so the giant rotation restores it
                    let g = idx - idx % n1;
                    (0..slots)
                        .map(|i| diag[(i + slots - g % slots) % slots].clone())
                        .collect()
                }
            };
            encoded.insert(idx, encoder.encode(&values, level, scale, log_slots));
        }

        Self {
            log_slots,
            level,
            scale: scale.clone(),
            diagonals: encoded,
            n1,
        }
    }

    pub fn log_slots(&self) -> usize {
        self.log_slots
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn scale(&self) -> &Scale {
        &self.scale
    }

    /// The rotations this transformation needs, derivable from the diagonal
    /// index list alone.
    pub fn rotations_for(
        diag_indices: &[i64],
        log_slots: usize,
        bsgs_log_ratio: Option<usize>,
    ) -> Vec<i64> {
        let slots = 1usize << log_slots;
        let mut set = HashSet::new();
        match bsgs_log_ratio {
            None => {
                for &d in diag_indices {
                    let idx = d.rem_euclid(slots as i64);
                    if idx != 0 {
                        set.insert(idx);
                    }
                }
            }
            Some(r) => {
                let n1 = bsgs_split(log_slots, r);
                for &d in diag_indices {
                    let idx = d.rem_euclid(slots as i64) as usize;
                    let (g, j) = (idx - idx % n1, idx % n1);
                    if j != 0 {
                        set.insert(j as i64);
                    }
                    if g != 0 {
                        set.insert(g as i64);
                    }
                }
            }
        }
        let mut out: Vec<i64> = set.into_iter().collect();
        out.sort_unstable();
        out
    }

    /// The Galois elements backing [`Self::rotations_for`].
    pub fn galois_elements(
        params: &CkksParameters,
        diag_indices: &[i64],
        log_slots: usize,
        bsgs_log_ratio: Option<usize>,
    ) -> Vec<u64> {
        Self::rotations_for(diag_indices, log_slots, bsgs_log_ratio)
            .into_iter()
            .map(|k| params.galois_element(k))
            .collect()
    }
}

/// Cached baby-step rotations of one ciphertext, reusable across repeated
/// BSGS applications with the same rotation set.
#[derive(Default)]
pub struct PreRotatedCiphertext {
    rotations: HashMap<i64, Ciphertext>,
}

impl PreRotatedCiphertext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rotations.is_empty()
    }

    /// Drops entries outside the current rotation set.
    fn prune(&mut self, keep: &HashSet<i64>) {
        self.rotations.retain(|k, _| keep.contains(k));
    }
}

pub struct LinearTransformationEvaluator<'a> {
    eval: &'a Evaluator,
}

impl<'a> LinearTransformationEvaluator<'a> {
    pub fn new(eval: &'a Evaluator) -> Self {
        Self { eval }
    }

    pub fn evaluate(&self, ct: &Ciphertext, lt: &LinearTransformation) -> Result<Ciphertext> {
        let mut cache = PreRotatedCiphertext::new();
        self.evaluate_with_cache(ct, lt, &mut cache)
    }

    /// Evaluation reusing (and refreshing) a pre-rotated ciphertext cache.
    /// The cache must have been built from the same input ciphertext.
    pub fn evaluate_with_cache(
        &self,
        ct: &Ciphertext,
        lt: &LinearTransformation,
        cache: &mut PreRotatedCiphertext,
    ) -> Result<Ciphertext> {
        match lt.n1 {
            None => self.evaluate_naive(ct, lt),
            Some(n1) => self.evaluate_bsgs(ct, lt, n1, cache),
        }
    }

    /// One hoisted decomposition, one rotation and plaintext product per
    /// diagonal.
    fn evaluate_naive(&self, ct: &Ciphertext, lt: &LinearTransformation) -> Result<Ciphertext> {
        trace!("naive linear transformation: {} diagonals", lt.diagonals.len());
        let decomp = self.eval.decompose(ct);
        let mut acc: Option<Ciphertext> = None;
        for (&idx, pt) in &lt.diagonals {
            let rotated = if idx == 0 {
                ct.clone()
            } else {
                self.eval.rotate_from_decomposition(ct, &decomp, idx as i64)?
            };
            let term = self.eval.mul_plain(&rotated, pt);
            acc = Some(match acc {
                None => term,
                Some(a) => self.eval.add(&a, &term)?,
            });
        }
        acc.ok_or_else(|| Error::InvalidParameters("empty linear transformation".into()))
    }

    /// Double hoisting: the input is decomposed once for all baby
    /// rotations, inner sums accumulate without key switching, and each
    /// group base costs a single rotation.
    fn evaluate_bsgs(
        &self,
        ct: &Ciphertext,
        lt: &LinearTransformation,
        n1: usize,
        cache: &mut PreRotatedCiphertext,
    ) -> Result<Ciphertext> {
        // group diagonals by base
        let mut groups: HashMap<usize, Vec<(usize, &Plaintext)>> = HashMap::new();
        for (&idx, pt) in &lt.diagonals {
            groups.entry(idx - idx % n1).or_default().push((idx % n1, pt));
        }
        trace!(
            "bsgs linear transformation: {} diagonals in {} groups",
            lt.diagonals.len(),
            groups.len()
        );

        let baby_set: HashSet<i64> = lt
            .diagonals
            .keys()
            .map(|&idx| (idx % n1) as i64)
            .filter(|&j| j != 0)
            .collect();
        cache.prune(&baby_set);
        let missing: Vec<i64> = baby_set
            .iter()
            .copied()
            .filter(|j| !cache.rotations.contains_key(j))
            .collect();
        if !missing.is_empty() {
            let decomp = self.eval.decompose(ct);
            for j in missing {
                let rotated = self.eval.rotate_from_decomposition(ct, &decomp, j)?;
                cache.rotations.insert(j, rotated);
            }
        }

        let mut acc: Option<Ciphertext> = None;
        for (&g, entries) in &groups {
            let mut inner: Option<Ciphertext> = None;
            for &(j, pt) in entries {
                let rotated = if j == 0 { ct } else { &cache.rotations[&(j as i64)] };
                let term = self.eval.mul_plain(rotated, pt);
                inner = Some(match inner {
                    None => term,
                    Some(a) => self.eval.add(&a, &term)?,
                });
            }
            let mut inner = inner.expect("group is non-empty");
            if g != 0 {
                inner = self.eval.rotate(&inner, g as i64)?;
            }
            acc = Some(match acc {
                None => inner,
                Some(a) => self.eval.add(&a, &inner)?,
            });
        }
        acc.ok_or_else(|| Error::InvalidParameters("empty linear transformation".into()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use itertools::Itertools;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use crate::ckks::parameters::{CkksParametersLiteral, RingType};
    use crate::ckks::{ClientKey, EvaluationKeys};

    use super::*;

    fn setup(
        diag_indices: &[i64],
        log_slots: usize,
        ratio: Option<usize>,
    ) -> (CkksParameters, ClientKey, Evaluator, ChaCha8Rng) {
        let params = CkksParameters::from_literal(&CkksParametersLiteral {
            log_n: 9,
            log_q: vec![50, 40, 40],
            log_p: vec![51],
            log_default_scale: 40,
            ring_type: RingType::Standard,
            float_precision: None,
        })
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let ck = ClientKey::generate(&params, &mut rng);
        let rotations = LinearTransformation::rotations_for(diag_indices, log_slots, ratio);
        let keys = EvaluationKeys::generate(&params, &ck, &rotations, false, &mut rng);
        let evaluator = Evaluator::new(&params, Arc::new(keys));
        (params, ck, evaluator, rng)
    }

    fn reference_apply(
        diagonals: &HashMap<i64, Vec<Complex>>,
        v: &[Complex],
        prec: u32,
    ) -> Vec<Complex> {
        let slots = v.len();
        let mut out = vec![Complex::with_val(prec, (0, 0)); slots];
        for (&d, diag) in diagonals {
            let d = d.rem_euclid(slots as i64) as usize;
            for i in 0..slots {
                out[i] += Complex::with_val(prec, &diag[i] * &v[(i + d) % slots]);
            }
        }
        out
    }

    fn run_transform(ratio: Option<usize>) {
        let log_slots = 5;
        let slots = 1usize << log_slots;
        let diag_indices: Vec<i64> = vec![-15, -4, -1, 0, 1, 2, 3, 4, 15];
        let (params, ck, eval, mut rng) = setup(&diag_indices, log_slots, ratio);
        let prec = params.float_precision();

        // all-ones diagonals: output slot i is the sum of the input slots at
        // the union of rotation offsets
        let mut diagonals = HashMap::new();
        for &d in &diag_indices {
            diagonals.insert(d, vec![Complex::with_val(prec, (1.0, 0.0)); slots]);
        }

        let lt = LinearTransformation::new(
            eval.encoder(),
            &diagonals,
            params.max_level(),
            &params.default_scale(),
            log_slots,
            ratio,
        );

        let values = (0..slots)
            .map(|_| {
                Complex::with_val(prec, (rng.gen_range(-1.0f64..1.0), rng.gen_range(-1.0f64..1.0)))
            })
            .collect_vec();
        let pt = eval
            .encoder()
            .encode(&values, params.max_level(), &params.default_scale(), log_slots);
        let ct = ck.encrypt(&pt, &mut rng);

        let mut out = LinearTransformationEvaluator::new(&eval).evaluate(&ct, &lt).unwrap();
        eval.rescale(&mut out).unwrap();

        let expected = reference_apply(&diagonals, &values, prec);
        let decoded = eval.encoder().decode(&ck.decrypt(&out));
        for (i, (got, want)) in decoded.iter().zip(expected.iter()).enumerate() {
            let err = Complex::with_val(prec, got - want).abs().real().to_f64();
            assert!(err < 2f64.powi(-15), "slot {i}: err {err}");
        }
    }

    #[test]
    fn all_ones_diagonals_naive() {
        run_transform(None);
    }

    #[test]
    fn all_ones_diagonals_bsgs() {
        run_transform(Some(1));
    }

    #[test]
    fn random_matrix_bsgs_matches_reference() {
        let log_slots = 4;
        let slots = 1usize << log_slots;
        let diag_indices: Vec<i64> = vec![0, 1, 3, 7, 9, 12];
        let (params, ck, eval, mut rng) = setup(&diag_indices, log_slots, Some(2));
        let prec = params.float_precision();

        let mut diagonals = HashMap::new();
        for &d in &diag_indices {
            let diag: Vec<Complex> = (0..slots)
                .map(|_| {
                    Complex::with_val(
                        prec,
                        (rng.gen_range(-1.0f64..1.0), rng.gen_range(-1.0f64..1.0)),
                    )
                })
                .collect();
            diagonals.insert(d, diag);
        }
        let lt = LinearTransformation::new(
            eval.encoder(),
            &diagonals,
            params.max_level(),
            &params.default_scale(),
            log_slots,
            Some(2),
        );

        let values: Vec<Complex> = (0..slots)
            .map(|_| {
                Complex::with_val(prec, (rng.gen_range(-1.0f64..1.0), rng.gen_range(-1.0f64..1.0)))
            })
            .collect();
        let pt = eval
            .encoder()
            .encode(&values, params.max_level(), &params.default_scale(), log_slots);
        let ct = ck.encrypt(&pt, &mut rng);

        // evaluate twice through the same cache: the second run reuses the
        // pre-rotated ciphertexts and must agree
        let mut cache = PreRotatedCiphertext::new();
        let lt_eval = LinearTransformationEvaluator::new(&eval);
        let mut out1 = lt_eval.evaluate_with_cache(&ct, &lt, &mut cache).unwrap();
        let cached = cache.len();
        let mut out2 = lt_eval.evaluate_with_cache(&ct, &lt, &mut cache).unwrap();
        assert_eq!(cache.len(), cached);
        eval.rescale(&mut out1).unwrap();
        eval.rescale(&mut out2).unwrap();

        let expected = reference_apply(&diagonals, &values, prec);
        for out in [&out1, &out2] {
            let decoded = eval.encoder().decode(&ck.decrypt(out));
            for (i, (got, want)) in decoded.iter().zip(expected.iter()).enumerate() {
                let err = Complex::with_val(prec, got - want).abs().real().to_f64();
                assert!(err < 2f64.powi(-15), "slot {i}: err {err}");
            }
        }
    }
}
