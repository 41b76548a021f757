//! The shadow evaluator: replays the Paterson-Stockmeyer schedule on
//! (level, scale) pairs only.
//!
//! Scale drifts accumulated across the schedule must be known before any
//! ciphertext is touched; the shadow walks the same splits as the real
//! evaluator (shared helpers in the parent module) and reports the output
//! level every chunk target is then derived from.

use std::collections::HashMap;

use rug::Float;

use crate::ckks::parameters::CkksParameters;

use super::{giant_split, power_split, Basis, PolynomialInput};

/// What the shadow tracks instead of a ciphertext. The level is signed so
/// an over-deep schedule shows up as a negative level instead of a panic.
#[derive(Clone, Debug)]
pub struct SimOperand {
    pub level: i64,
    pub scale: Float,
}

pub struct SimEvaluator {
    q_primes: Vec<u64>,
    prec: u32,
}

impl SimEvaluator {
    pub fn new(params: &CkksParameters) -> Self {
        Self {
            q_primes: params.q_primes().to_vec(),
            prec: params.float_precision(),
        }
    }

    /// Multiply-and-rescale on metadata alone.
    pub fn mul_rescale(&self, a: &SimOperand, b: &SimOperand) -> SimOperand {
        let level = a.level.min(b.level);
        let q = self.q_primes[level.max(0) as usize];
        let scale = Float::with_val(self.prec, &a.scale * &b.scale) / q;
        SimOperand {
            level: level - 1,
            scale,
        }
    }

    /// Replays power-basis generation for exponent `k`, mirroring
    /// [`super::evaluator::PowerBasis::gen_power`].
    pub fn gen_power(&self, powers: &mut HashMap<usize, SimOperand>, k: usize, basis: Basis) {
        if k == 0 || powers.contains_key(&k) {
            return;
        }
        let (a, b) = power_split(k);
        self.gen_power(powers, a, basis);
        self.gen_power(powers, b, basis);
        // the Chebyshev doubling and T_{a-b} correction leave the product's
        // (level, scale) unchanged, so both bases share this arithmetic
        let prod = self.mul_rescale(&powers[&a], &powers[&b]);
        powers.insert(k, prod);
    }

    /// Highest target level the recursion rooted at `pol` can be asked to
    /// land on, given the power table. Negative means the input has too few
    /// levels.
    pub fn max_target_level(
        &self,
        pol: &PolynomialInput,
        powers: &HashMap<usize, SimOperand>,
        baby_threshold: usize,
    ) -> i64 {
        let deg = pol.degree();
        if deg < baby_threshold {
            // inner product: every used power must sit one level above
            let mut bound = i64::MAX / 2;
            for i in 1..=deg {
                if !pol.coeff_is_zero(i) {
                    bound = bound.min(powers[&i].level - 1);
                }
            }
            return bound;
        }
        let m = giant_split(deg);
        let (r, q) = pol.split_at(m, self.prec);
        let from_q = self.max_target_level(&q, powers, baby_threshold) - 1;
        let from_r = self.max_target_level(&r, powers, baby_threshold);
        let from_m = powers[&m].level - 1;
        from_q.min(from_r).min(from_m)
    }
}

/// Shadow-walks the whole evaluation (power generation plus recursion) of
/// `pol` on an input at (`level`, `scale`) and returns the output level.
/// Mirrors the generation set of
/// [`super::evaluator::PolynomialEvaluator::evaluate_from_power_basis`].
pub fn simulate_output_level(
    params: &CkksParameters,
    pol: &PolynomialInput,
    level: i64,
    scale: &Float,
) -> i64 {
    let sim = SimEvaluator::new(params);
    let deg = pol.degree();
    let threshold = 1usize << super::baby_step_log(deg);
    let mut powers = HashMap::new();
    powers.insert(
        1,
        SimOperand {
            level,
            scale: scale.clone(),
        },
    );
    for i in 2..=deg.min(threshold - 1) {
        sim.gen_power(&mut powers, i, pol.basis());
    }
    if deg >= threshold {
        let mut m = threshold;
        while m <= giant_split(deg) {
            sim.gen_power(&mut powers, m, pol.basis());
            m <<= 1;
        }
    }
    sim.max_target_level(pol, &powers, threshold).min(level)
}

#[cfg(test)]
mod tests {
    use rug::Complex;

    use crate::ckks::parameters::{CkksParametersLiteral, RingType};
    use crate::polynomial::Polynomial;

    use super::*;

    fn params() -> CkksParameters {
        CkksParameters::from_literal(&CkksParametersLiteral {
            log_n: 6,
            log_q: vec![50, 40, 40, 40, 40, 40],
            log_p: vec![51],
            log_default_scale: 40,
            ring_type: RingType::Standard,
            float_precision: None,
        })
        .unwrap()
    }

    #[test]
    fn power_scales_follow_the_prime_chain() {
        let params = params();
        let sim = SimEvaluator::new(&params);
        let mut powers = HashMap::new();
        powers.insert(
            1,
            SimOperand {
                level: params.max_level() as i64,
                scale: params.default_scale().value().clone(),
            },
        );
        sim.gen_power(&mut powers, 4, Basis::Chebyshev);
        // X^2 = X*X at the top level, X^4 = X^2*X^2 one level down
        assert_eq!(powers[&2].level, params.max_level() as i64 - 1);
        assert_eq!(powers[&4].level, params.max_level() as i64 - 2);
        let q = params.q_primes();
        let expect2 = params.default_scale().value().clone().square() / q[params.max_level()];
        assert_eq!(powers[&2].scale, expect2);
        let expect4 = expect2.clone().square() / q[params.max_level() - 1];
        assert_eq!(powers[&4].scale, expect4);
    }

    #[test]
    fn deep_polynomials_report_negative_levels() {
        let params = params();
        let sim = SimEvaluator::new(&params);
        let prec = params.float_precision();
        let mut powers = HashMap::new();
        // an input with just one level cannot host a degree-15 evaluation
        powers.insert(
            1,
            SimOperand {
                level: 1,
                scale: params.default_scale().value().clone(),
            },
        );
        for k in [2usize, 3, 4, 8] {
            sim.gen_power(&mut powers, k, Basis::Chebyshev);
        }
        let pol = PolynomialInput::Scalar(Polynomial::chebyshev(
            (0..=15)
                .map(|i| Complex::with_val(prec, (1.0 / (i + 1) as f64, 0.0)))
                .collect(),
            (-1.0, 1.0),
        ));
        assert!(sim.max_target_level(&pol, &powers, 4) < 0);
    }
}
