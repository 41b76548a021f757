//! The homomorphic DFT matrices.
//!
//! The canonical-embedding transform over 2^log_slots slots factors into
//! log_slots radix-2 stages, each a linear map with three non-zero
//! diagonals. CoeffsToSlots applies the inverted stages (outputs the
//! coefficient vector in bit-reversed slot order), SlotsToCoeffs the
//! forward stages from that same order, so the permutation cancels across
//! the slot-wise modular reduction in between. Consecutive stages can be
//! merged per the literal's level pattern, trading diagonals for levels.
//! Each merged matrix is encoded at the scale of the prime its rescale
//! spends, so the ciphertext scale is invariant across a stage.

use std::collections::HashMap;

use rug::float::Constant;
use rug::{Complex, Float};
use serde::{Deserialize, Serialize};

use crate::ckks::ciphertext::{Ciphertext, Scale};
use crate::ckks::encoding::Encoder;
use crate::ckks::evaluator::Evaluator;
use crate::ckks::parameters::CkksParameters;
use crate::error::{Error, Result};
use crate::lintrans::{LinearTransformation, LinearTransformationEvaluator};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DftKind {
    CoeffsToSlots,
    SlotsToCoeffs,
}

/// Serializable description of one DFT side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DftMatrixLiteral {
    pub kind: DftKind,
    /// FFT stages merged into each matrix, in application order; the sum
    /// must equal log_slots. One level is consumed per entry.
    pub levels: Vec<usize>,
    #[serde(default)]
    pub bsgs_log_ratio: Option<usize>,
}

impl DftMatrixLiteral {
    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

/// The encoded factor matrices of one DFT side.
pub struct DftMatrix {
    pub(crate) matrices: Vec<LinearTransformation>,
    pub(crate) level_start: usize,
}

type DiagMap = HashMap<i64, Vec<Complex>>;

fn roots(log_slots: usize, prec: u32) -> Vec<Complex> {
    let n = 1usize << log_slots;
    let pi = Float::with_val(prec, Constant::Pi);
    (0..4 * n)
        .map(|t| {
            let angle = Float::with_val(prec, &pi * (t as u64)) / (2 * n) as u64;
            let (sin, cos) = angle.sin_cos(Float::new(prec));
            Complex::with_val(prec, (cos, sin))
        })
        .collect()
}

fn rot_group(log_slots: usize) -> Vec<usize> {
    let n = 1usize << log_slots;
    let mut group = Vec::with_capacity(n);
    let mut g = 1usize;
    for _ in 0..n {
        group.push(g);
        g = g * 5 % (4 * n);
    }
    group
}

fn add_to_diag(map: &mut DiagMap, d: i64, p: usize, v: Complex, n: usize, prec: u32) {
    let entry = map
        .entry(d)
        .or_insert_with(|| vec![Complex::with_val(prec, (0, 0)); n]);
    entry[p] += v;
}

/// The radix-2 stage maps of the forward transform, in application order
/// (bit-reversed input, natural output).
fn forward_stage_maps(log_slots: usize, prec: u32) -> Vec<DiagMap> {
    let n = 1usize << log_slots;
    let roots = roots(log_slots, prec);
    let group = rot_group(log_slots);
    let mut stages = Vec::with_capacity(log_slots);
    let mut len = 2usize;
    while len <= n {
        let lenh = len / 2;
        let mut map = DiagMap::new();
        for p in 0..n {
            let j = p % len;
            if j < lenh {
                let w = roots[(group[j] % (4 * len)) * (n / len)].clone();
                add_to_diag(&mut map, 0, p, Complex::with_val(prec, (1, 0)), n, prec);
                add_to_diag(&mut map, lenh as i64, p, w, n, prec);
            } else {
                let jj = j - lenh;
                let w = roots[(group[jj] % (4 * len)) * (n / len)].clone();
                add_to_diag(&mut map, 0, p, -w, n, prec);
                add_to_diag(
                    &mut map,
                    (n - lenh) as i64 % n as i64,
                    p,
                    Complex::with_val(prec, (1, 0)),
                    n,
                    prec,
                );
            }
        }
        stages.push(map);
        len <<= 1;
    }
    stages
}

/// The inverted stage maps, in application order for CoeffsToSlots
/// (natural input, bit-reversed output). The half factors of the inverse
/// butterflies accumulate to the transform's 1/n normalization.
fn inverse_stage_maps(log_slots: usize, prec: u32) -> Vec<DiagMap> {
    let n = 1usize << log_slots;
    let roots = roots(log_slots, prec);
    let group = rot_group(log_slots);
    let mut stages = Vec::with_capacity(log_slots);
    let mut len = n;
    while len >= 2 {
        let lenh = len / 2;
        let mut map = DiagMap::new();
        let half = Complex::with_val(prec, (0.5, 0.0));
        for p in 0..n {
            let j = p % len;
            if j < lenh {
                add_to_diag(&mut map, 0, p, half.clone(), n, prec);
                add_to_diag(&mut map, lenh as i64, p, half.clone(), n, prec);
            } else {
                let jj = j - lenh;
                // twiddles are unit modulus, the inverse is the conjugate
                let w = &roots[(group[jj] % (4 * len)) * (n / len)];
                let w_inv = Complex::with_val(
                    prec,
                    (w.real().clone(), Float::with_val(prec, -w.imag())),
                );
                let v = Complex::with_val(prec, &w_inv * &half);
                add_to_diag(&mut map, 0, p, -v.clone(), n, prec);
                add_to_diag(&mut map, (n - lenh) as i64 % n as i64, p, v, n, prec);
            }
        }
        stages.push(map);
        len >>= 1;
    }
    stages
}

/// second `after` first, as one diagonal map.
fn compose(second: &DiagMap, first: &DiagMap, n: usize, prec: u32) -> DiagMap {
    let mut out = DiagMap::new();
    for (&d1, a) in second {
        for (&d2, b) in first {
            let d = (d1 + d2).rem_euclid(n as i64);
            for p in 0..n {
                let q = (p as i64 + d1).rem_euclid(n as i64) as usize;
                let v = Complex::with_val(prec, &a[p] * &b[q]);
                add_to_diag(&mut out, d, p, v, n, prec);
            }
        }
    }
    // drop diagonals that cancelled structurally
    out.retain(|_, vec| {
        vec.iter().any(|c| {
            c.real().clone().abs().to_f64() > 1e-30 || c.imag().clone().abs().to_f64() > 1e-30
        })
    });
    out
}

/// The merged group maps of one DFT side, in application order.
pub(crate) fn group_maps(
    kind: DftKind,
    log_slots: usize,
    levels: &[usize],
    prec: u32,
) -> Vec<DiagMap> {
    let n = 1usize << log_slots;
    let stages = match kind {
        DftKind::CoeffsToSlots => inverse_stage_maps(log_slots, prec),
        DftKind::SlotsToCoeffs => forward_stage_maps(log_slots, prec),
    };
    let mut groups = Vec::with_capacity(levels.len());
    let mut next = 0usize;
    for &count in levels {
        let mut acc = stages[next].clone();
        for stage in stages.iter().skip(next + 1).take(count - 1) {
            acc = compose(stage, &acc, n, prec);
        }
        next += count;
        groups.push(acc);
    }
    debug_assert_eq!(next, stages.len());
    groups
}

impl DftMatrix {
    /// Encodes the merged factor matrices. Matrix i is consumed at level
    /// `level_start - i` and is encoded at that prime's scale so the
    /// ciphertext scale survives the stage unchanged. `output_factor` is
    /// multiplied into the last matrix (CoeffsToSlots folds the half of
    /// the conjugation split there, keeping downstream scales pinned to
    /// the prime size).
    pub fn generate(
        params: &CkksParameters,
        encoder: &Encoder,
        literal: &DftMatrixLiteral,
        log_slots: usize,
        level_start: usize,
        output_factor: f64,
    ) -> Result<Self> {
        if literal.levels.iter().sum::<usize>() != log_slots {
            return Err(Error::InvalidParameters(format!(
                "DFT level pattern {:?} does not cover log_slots = {log_slots}",
                literal.levels
            )));
        }
        if level_start + 1 < literal.levels.len() {
            return Err(Error::InsufficientLevels {
                stage: "DFT matrix generation",
                have: level_start,
                need: literal.levels.len(),
            });
        }
        let prec = params.float_precision();
        let mut maps = group_maps(literal.kind, log_slots, &literal.levels, prec);
        if let Some(last) = maps.last_mut() {
            for diag in last.values_mut() {
                for v in diag.iter_mut() {
                    *v *= output_factor;
                }
            }
        }
        let matrices = maps
            .iter()
            .enumerate()
            .map(|(i, map)| {
                let level = level_start - i;
                let scale = Scale::from_f64(params.q_primes()[level] as f64, prec);
                LinearTransformation::new(
                    encoder,
                    map,
                    level,
                    &scale,
                    log_slots,
                    literal.bsgs_log_ratio,
                )
            })
            .collect();
        Ok(Self {
            matrices,
            level_start,
        })
    }

    /// The slot rotations the whole side needs, derivable from the diagonal
    /// index lists alone.
    pub fn rotations(
        literal: &DftMatrixLiteral,
        log_slots: usize,
        prec: u32,
    ) -> Vec<i64> {
        let maps = group_maps(literal.kind, log_slots, &literal.levels, prec);
        let mut out: Vec<i64> = maps
            .iter()
            .flat_map(|map| {
                let indices: Vec<i64> = map.keys().copied().collect();
                LinearTransformation::rotations_for(&indices, log_slots, literal.bsgs_log_ratio)
            })
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Applies every factor matrix, spending one rescale per matrix.
    pub(crate) fn apply(&self, eval: &Evaluator, ct: &Ciphertext) -> Result<Ciphertext> {
        let lt_eval = LinearTransformationEvaluator::new(eval);
        let mut ct = ct.clone();
        for matrix in &self.matrices {
            ct = lt_eval.evaluate(&ct, matrix)?;
            eval.rescale(&mut ct)?;
        }
        Ok(ct)
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn apply_map(map: &DiagMap, v: &[Complex], prec: u32) -> Vec<Complex> {
        let n = v.len();
        let mut out = vec![Complex::with_val(prec, (0, 0)); n];
        for (&d, diag) in map {
            let d = d.rem_euclid(n as i64) as usize;
            for p in 0..n {
                out[p] += Complex::with_val(prec, &diag[p] * &v[(p + d) % n]);
            }
        }
        out
    }

    fn random_vec(n: usize, prec: u32, seed: u64) -> Vec<Complex> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                Complex::with_val(prec, (rng.gen_range(-1.0f64..1.0), rng.gen_range(-1.0f64..1.0)))
            })
            .collect()
    }

    fn max_err(a: &[Complex], b: &[Complex], prec: u32) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| Complex::with_val(prec, x - y).abs().real().to_f64())
            .fold(0.0, f64::max)
    }

    #[test]
    fn forward_stages_compute_the_embedding() {
        let prec = 128;
        let log_slots = 3;
        let n = 1usize << log_slots;
        let v = random_vec(n, prec, 3);

        // reference: z_t = sum_j v_j xi^(j * 5^t mod 4n)
        let roots = roots(log_slots, prec);
        let group = rot_group(log_slots);
        let want: Vec<Complex> = (0..n)
            .map(|t| {
                let mut acc = Complex::with_val(prec, (0, 0));
                for (j, x) in v.iter().enumerate() {
                    acc += Complex::with_val(prec, x * &roots[j * group[t] % (4 * n)]);
                }
                acc
            })
            .collect();

        // stage maps applied to the bit-reversed input
        let mut state: Vec<Complex> = (0..n)
            .map(|p| v[(p as u32).reverse_bits() as usize >> (32 - log_slots)].clone())
            .collect();
        for map in forward_stage_maps(log_slots, prec) {
            state = apply_map(&map, &state, prec);
        }
        assert!(max_err(&state, &want, prec) < 1e-25);
    }

    #[test]
    fn inverse_then_forward_is_identity() {
        let prec = 128;
        let log_slots = 4;
        let n = 1usize << log_slots;
        let v = random_vec(n, prec, 7);

        let mut state = v.clone();
        for map in inverse_stage_maps(log_slots, prec) {
            state = apply_map(&map, &state, prec);
        }
        for map in forward_stage_maps(log_slots, prec) {
            state = apply_map(&map, &state, prec);
        }
        assert!(max_err(&state, &v, prec) < 1e-25);
    }

    #[test]
    fn merged_groups_match_unmerged_stages() {
        let prec = 128;
        let log_slots = 4;
        let n = 1usize << log_slots;
        let v = random_vec(n, prec, 11);

        let mut a = v.clone();
        for map in group_maps(DftKind::CoeffsToSlots, log_slots, &[1, 1, 1, 1], prec) {
            a = apply_map(&map, &a, prec);
        }
        let mut b = v;
        for map in group_maps(DftKind::CoeffsToSlots, log_slots, &[2, 2], prec) {
            b = apply_map(&map, &b, prec);
        }
        assert!(max_err(&a, &b, prec) < 1e-25);
    }
}
