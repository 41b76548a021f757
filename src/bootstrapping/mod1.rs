//! Homomorphic evaluation of x mod 1.
//!
//! [`Mod1Parameters`] derives everything EvalMod needs at construction
//! time: the approximation polynomial, the per-unwind scaling constants,
//! the back-solved evaluation scale and the exact level consumption. The
//! evaluation itself is a polynomial evaluation followed by the
//! double-angle unwind and the optional arcsine correction.

use rug::float::Constant;
use rug::{Complex, Float};
use serde::{Deserialize, Serialize};

use crate::ckks::chebyshev;
use crate::ckks::ciphertext::{Ciphertext, Scale};
use crate::ckks::evaluator::Evaluator;
use crate::ckks::parameters::CkksParameters;
use crate::error::{Error, Result};
use crate::polynomial::simulator::simulate_output_level;
use crate::polynomial::{Polynomial, PolynomialEvaluator, PolynomialInput};

use super::cosine;

/// The shape of the modular-reduction approximation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mod1Type {
    /// Interval interpolation of the scaled cosine, unwound by double-angle
    /// steps. Requires degree >= 2(K - 1).
    CosDiscrete,
    /// Direct Chebyshev approximation of sin(2 pi x); no double-angle.
    SinContinuous,
}

/// Serializable description of the modular-reduction step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mod1ParametersLiteral {
    pub mod1_type: Mod1Type,
    pub log_scale: usize,
    pub k: usize,
    pub mod1_degree: usize,
    pub double_angle: usize,
    pub log_message_ratio: usize,
    #[serde(default)]
    pub mod1_inv_degree: Option<usize>,
}

/// The precomputed bundle EvalMod runs from.
pub struct Mod1Parameters {
    literal: Mod1ParametersLiteral,
    level_start: usize,
    /// 2^log_scale corrected by q_diff = q_0 / 2^round(log2 q_0), so the
    /// chain of scale factors stays a near-integer multiple of the input.
    scaling_factor: Scale,
    sqrt_2pi: Float,
    q_diff: Float,
    poly: PolynomialInput,
    inv_poly: Option<PolynomialInput>,
    poly_output_level: usize,
    depth: usize,
}

impl Mod1Parameters {
    pub fn new(
        params: &CkksParameters,
        literal: &Mod1ParametersLiteral,
        level_start: usize,
    ) -> Result<Self> {
        let prec = params.float_precision();
        if literal.k == 0 {
            return Err(Error::InvalidParameters("Mod1: K must be at least 1".into()));
        }
        match literal.mod1_type {
            Mod1Type::CosDiscrete => {
                if literal.mod1_degree < 2 * (literal.k - 1) {
                    return Err(Error::InvalidParameters(format!(
                        "Mod1: CosDiscrete needs degree >= 2(K-1) = {}, got {}",
                        2 * (literal.k - 1),
                        literal.mod1_degree
                    )));
                }
            }
            Mod1Type::SinContinuous => {
                if literal.double_angle > 0 {
                    return Err(Error::InvalidParameters(
                        "Mod1: SinContinuous admits no double-angle unwind".into(),
                    ));
                }
            }
        }

        let q0 = params.q_primes()[0];
        let log_q0 = (q0 as f64).log2().round() as i32;
        let q_diff =
            Float::with_val(prec, q0) / Float::with_val(prec, Float::i_exp(1, log_q0));
        let scaling_factor = Scale::new(
            Float::with_val(prec, Float::i_exp(1, literal.log_scale as i32)) * &q_diff,
        );

        let eps = 2f64.powi(-(literal.log_message_ratio as i32));
        let double_angle = literal.double_angle;
        let sqrt_2pi = cosine::sqrt_2pi(double_angle, prec);

        let poly = match literal.mod1_type {
            Mod1Type::CosDiscrete => {
                let coeffs = cosine::approximate_cos(
                    literal.k,
                    literal.mod1_degree,
                    eps,
                    double_angle,
                    prec,
                );
                PolynomialInput::Scalar(Polynomial::chebyshev(
                    reals_to_complex(coeffs, prec),
                    (-1.0, 1.0),
                ))
            }
            Mod1Type::SinContinuous => {
                // (1/2pi) sin(2 pi K u) on [-1, 1]
                let k = literal.k as f64;
                let two_pi = Float::with_val(prec, Constant::Pi) * 2u32;
                let coeffs = chebyshev::approximate(
                    |u| {
                        let arg = Float::with_val(prec, u * &two_pi) * k;
                        Float::with_val(prec, arg.sin() / &two_pi)
                    },
                    literal.mod1_degree,
                    -1.0,
                    1.0,
                    prec,
                );
                PolynomialInput::Scalar(Polynomial::chebyshev(
                    reals_to_complex(coeffs, prec),
                    (-1.0, 1.0),
                ))
            }
        };

        let inv_poly = literal.mod1_inv_degree.map(|deg| {
            PolynomialInput::Scalar(Polynomial::monomial(arcsine_coeffs(deg, prec)))
        });

        // shadow the schedule to pin the exact level consumption
        let poly_output_level = simulate_output_level(
            params,
            &poly,
            level_start as i64,
            scaling_factor.value(),
        );
        if poly_output_level < double_angle as i64 {
            let deficit = double_angle as i64 - poly_output_level;
            return Err(Error::InsufficientLevels {
                stage: "EvalMod",
                have: level_start,
                need: level_start + deficit as usize,
            });
        }
        let mut output_level = poly_output_level - double_angle as i64;
        if let Some(inv) = &inv_poly {
            output_level =
                simulate_output_level(params, inv, output_level, scaling_factor.value());
            if output_level < 0 {
                return Err(Error::InsufficientLevels {
                    stage: "EvalMod",
                    have: level_start,
                    need: level_start + 1,
                });
            }
        }

        Ok(Self {
            literal: literal.clone(),
            level_start,
            scaling_factor,
            sqrt_2pi,
            q_diff,
            poly,
            inv_poly,
            poly_output_level: poly_output_level as usize,
            depth: level_start - output_level as usize,
        })
    }

    pub fn literal(&self) -> &Mod1ParametersLiteral {
        &self.literal
    }

    pub fn level_start(&self) -> usize {
        self.level_start
    }

    /// Levels the whole EvalMod stage consumes.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn output_level(&self) -> usize {
        self.level_start - self.depth
    }

    pub fn scaling_factor(&self) -> &Scale {
        &self.scaling_factor
    }

    pub fn q_diff(&self) -> &Float {
        &self.q_diff
    }

    pub fn message_ratio(&self) -> f64 {
        2f64.powi(self.literal.log_message_ratio as i32)
    }

    pub fn k(&self) -> usize {
        self.literal.k
    }
}

fn reals_to_complex(coeffs: Vec<Float>, prec: u32) -> Vec<Complex> {
    coeffs
        .into_iter()
        .map(|c| Complex::with_val(prec, (c, Float::new(prec))))
        .collect()
}

/// Coefficients of arcsin(2 pi y) / 2 pi; the 1/2 pi normalization is
/// folded into the coefficients so the evaluation costs no extra rescale.
fn arcsine_coeffs(degree: usize, prec: u32) -> Vec<Complex> {
    let two_pi = Float::with_val(prec, Constant::Pi) * 2u32;
    let zero = Complex::with_val(prec, (0, 0));
    let mut coeffs = vec![zero; degree + 1];
    let mut n = 0usize;
    while 2 * n + 1 <= degree {
        // C(2n, n) / (4^n (2n + 1)) * (2 pi)^(2n)
        let mut c = Float::with_val(prec, 1u32);
        for i in 0..n {
            c *= ((2 * n - i) as u64) as f64;
            c /= ((i + 1) as u64) as f64;
        }
        c /= Float::with_val(prec, Float::i_exp(1, 2 * n as i32));
        c /= (2 * n + 1) as u32;
        let mut pw = Float::with_val(prec, 1u32);
        for _ in 0..2 * n {
            pw *= &two_pi;
        }
        c *= pw;
        coeffs[2 * n + 1] = Complex::with_val(prec, (c, Float::new(prec)));
        n += 1;
    }
    coeffs
}

/// Applies x mod 1 to every slot. The output carries the scaling factor as
/// its scale; the caller folds the message-ratio reinterpretation.
pub fn evaluate_mod1(
    eval: &Evaluator,
    mod1: &Mod1Parameters,
    ct: &Ciphertext,
) -> Result<Ciphertext> {
    let prec = eval.params().float_precision();
    let mut ct = ct.clone();
    if ct.level() < mod1.level_start {
        return Err(Error::InsufficientLevels {
            stage: "EvalMod",
            have: ct.level(),
            need: mod1.level_start,
        });
    }
    if ct.level() > mod1.level_start {
        ct.drop_levels(ct.level() - mod1.level_start);
    }

    // back-solve the polynomial target through the double-angle unwind
    let r = mod1.literal.double_angle;
    let q = eval.params().q_primes();
    let mut target = mod1.scaling_factor.value().clone();
    for i in (0..r).rev() {
        target *= q[mod1.poly_output_level - i];
        target = target.sqrt();
    }

    let mut out =
        PolynomialEvaluator::new(eval).evaluate(&ct, &mod1.poly, &Scale::new(target))?;

    // y <- 2y^2 - s^2, squaring the sqrt(2 pi) constant each unwind
    let mut s = mod1.sqrt_2pi.clone();
    for _ in 0..r {
        s = s.square();
        let mut sq = eval.mul_relin(&out, &out)?;
        eval.mul_scalar_u64(&mut sq, 2);
        eval.rescale(&mut sq)?;
        let minus_s = Complex::with_val(prec, (-s.clone(), Float::new(prec)));
        out = eval.add_const(&sq, &minus_s);
    }
    out.set_scale(mod1.scaling_factor.clone());

    if let Some(inv) = &mod1.inv_poly {
        out = PolynomialEvaluator::new(eval).evaluate(&out, inv, &mod1.scaling_factor.clone())?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use crate::ckks::parameters::{CkksParametersLiteral, RingType};
    use crate::ckks::{ClientKey, EvaluationKeys};

    use super::*;

    #[test]
    fn cos_discrete_rejects_low_degrees() {
        let params = CkksParameters::from_literal(&CkksParametersLiteral {
            log_n: 6,
            log_q: vec![55, 45],
            log_p: vec![56],
            log_default_scale: 45,
            ring_type: RingType::Standard,
            float_precision: None,
        })
        .unwrap();
        let literal = Mod1ParametersLiteral {
            mod1_type: Mod1Type::CosDiscrete,
            log_scale: 45,
            k: 12,
            mod1_degree: 10,
            double_angle: 2,
            log_message_ratio: 8,
            mod1_inv_degree: None,
        };
        assert!(matches!(
            Mod1Parameters::new(&params, &literal, 1),
            Err(Error::InvalidParameters(_))
        ));
    }

    #[test]
    fn sin_continuous_rejects_double_angle() {
        let params = CkksParameters::from_literal(&CkksParametersLiteral {
            log_n: 6,
            log_q: vec![55, 45],
            log_p: vec![56],
            log_default_scale: 45,
            ring_type: RingType::Standard,
            float_precision: None,
        })
        .unwrap();
        let literal = Mod1ParametersLiteral {
            mod1_type: Mod1Type::SinContinuous,
            log_scale: 45,
            k: 1,
            mod1_degree: 15,
            double_angle: 1,
            log_message_ratio: 8,
            mod1_inv_degree: None,
        };
        assert!(matches!(
            Mod1Parameters::new(&params, &literal, 1),
            Err(Error::InvalidParameters(_))
        ));
    }

    #[test]
    fn arcsine_series_leads_with_identity() {
        let prec = 128;
        let coeffs = arcsine_coeffs(7, prec);
        assert!((coeffs[1].real().to_f64() - 1.0).abs() < 1e-20);
        let two_pi = 2.0 * std::f64::consts::PI;
        let want = two_pi * two_pi / 6.0;
        assert!((coeffs[3].real().to_f64() - want).abs() < 1e-10);
        assert!(coeffs[0].real().to_f64() == 0.0 && coeffs[2].real().to_f64() == 0.0);
    }

    #[test]
    fn literal_roundtrips_through_serde() {
        let literal = Mod1ParametersLiteral {
            mod1_type: Mod1Type::CosDiscrete,
            log_scale: 45,
            k: 12,
            mod1_degree: 30,
            double_angle: 3,
            log_message_ratio: 8,
            mod1_inv_degree: Some(5),
        };
        let json = serde_json::to_string(&literal).unwrap();
        let back: Mod1ParametersLiteral = serde_json::from_str(&json).unwrap();
        assert_eq!(literal, back);
        let bytes = bincode::serialize(&literal).unwrap();
        let back: Mod1ParametersLiteral = bincode::deserialize(&bytes).unwrap();
        assert_eq!(literal, back);
        assert_eq!(bytes, bincode::serialize(&back).unwrap());
    }

    #[test]
    fn homomorphic_modular_reduction() {
        let params = CkksParameters::from_literal(&CkksParametersLiteral {
            log_n: 8,
            log_q: vec![55, 45, 45, 45, 45, 45, 45, 45, 45, 45, 45],
            log_p: vec![56, 56],
            log_default_scale: 45,
            ring_type: RingType::Standard,
            float_precision: None,
        })
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let ck = ClientKey::generate(&params, &mut rng);
        let keys = EvaluationKeys::generate(&params, &ck, &[], false, &mut rng);
        let eval = Evaluator::new(&params, Arc::new(keys));
        let prec = params.float_precision();

        let literal = Mod1ParametersLiteral {
            mod1_type: Mod1Type::CosDiscrete,
            log_scale: 45,
            k: 12,
            mod1_degree: 30,
            double_angle: 3,
            log_message_ratio: 8,
            mod1_inv_degree: None,
        };
        let mod1 = Mod1Parameters::new(&params, &literal, params.max_level()).unwrap();

        // slots hold u = x / K with x = I + m, |m| within the interval radius
        let k = literal.k as f64;
        let log_slots = 3;
        let slots = 1usize << log_slots;
        let xs: Vec<f64> = (0..slots)
            .map(|_| {
                let integer = rng.gen_range(-3i64..=3) as f64;
                let m = rng.gen_range(-0.003f64..0.003);
                integer + m
            })
            .collect();
        let values: Vec<Complex> = xs
            .iter()
            .map(|&x| Complex::with_val(prec, (x / k, 0.0)))
            .collect();
        let pt = eval
            .encoder()
            .encode(&values, params.max_level(), &params.default_scale(), log_slots);
        let ct = ck.encrypt(&pt, &mut rng);

        let out = evaluate_mod1(&eval, &mod1, &ct).unwrap();
        assert_eq!(out.level(), mod1.output_level());

        let decoded = eval.encoder().decode(&ck.decrypt(&out));
        for (x, d) in xs.iter().zip(decoded.iter()) {
            let want = (2.0 * std::f64::consts::PI * x).sin() / (2.0 * std::f64::consts::PI);
            let err = (d.real().to_f64() - want).abs();
            assert!(err < 2f64.powi(-16), "x={x}: err {err}");
        }
    }
}
