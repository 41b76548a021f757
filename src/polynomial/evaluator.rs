//! Paterson-Stockmeyer evaluation on ciphertexts.
//!
//! Powers are generated once into a [`PowerBasis`]; the recursion then
//! walks giant-step splits down to baby-step inner products. Before any
//! ciphertext is touched the shadow evaluator fixes the output level, and
//! every chunk target scale is derived from it so the final scale lands
//! exactly on the caller's request.

use std::collections::HashMap;

use log::trace;
use rug::{Complex, Float};

use crate::ckks::ciphertext::{Ciphertext, Scale};
use crate::ckks::evaluator::Evaluator;
use crate::error::{Error, Result};

use super::simulator::{SimEvaluator, SimOperand};
use super::{baby_step_log, giant_split, power_split, Basis, PolynomialInput};

/// The ciphertext powers X^k (or T_k) generated so far, keyed by exponent.
pub struct PowerBasis {
    basis: Basis,
    powers: HashMap<usize, Ciphertext>,
}

impl PowerBasis {
    pub fn new(ct: &Ciphertext, basis: Basis) -> Self {
        let mut powers = HashMap::new();
        powers.insert(1, ct.clone());
        Self { basis, powers }
    }

    /// A basis with no powers at all; evaluation from it is rejected until
    /// X^1 is inserted.
    pub fn empty(basis: Basis) -> Self {
        Self {
            basis,
            powers: HashMap::new(),
        }
    }

    pub fn basis(&self) -> Basis {
        self.basis
    }

    pub fn power(&self, k: usize) -> Option<&Ciphertext> {
        self.powers.get(&k)
    }

    pub fn insert(&mut self, k: usize, ct: Ciphertext) {
        self.powers.insert(k, ct);
    }

    /// Generates X^k (or T_k) and the powers it depends on.
    ///
    /// Chebyshev powers use T_{a+b} = 2 T_a T_b - T_{a-b}; the split keeps
    /// a - b in {0, 1} so the correction is either the constant one or T_1
    /// equalized onto the product's exact scale.
    pub fn gen_power(&mut self, k: usize, eval: &Evaluator) -> Result<()> {
        if k == 0 || self.powers.contains_key(&k) {
            return Ok(());
        }
        if !self.powers.contains_key(&1) {
            return Err(Error::PolynomialEvaluation(
                "power basis is missing X^1".into(),
            ));
        }
        let (a, b) = power_split(k);
        self.gen_power(a, eval)?;
        self.gen_power(b, eval)?;

        let mut prod = eval.mul_relin(&self.powers[&a], &self.powers[&b])?;
        eval.rescale(&mut prod)?;

        if self.basis == Basis::Chebyshev {
            eval.mul_scalar_u64(&mut prod, 2);
            if a == b {
                prod = eval.add_const_f64(&prod, -1.0);
            } else {
                // subtract T_1, equalized onto the product's scale by one
                // constant multiplication and rescale
                let level = prod.level();
                let t1 = eval.dropped_to(&self.powers[&1], level + 1);
                let q = eval.params().q_primes()[level + 1];
                let prec = eval.params().float_precision();
                let s = Scale::new(
                    Float::with_val(prec, prod.scale().value() * q) / t1.scale().value(),
                );
                let one = Complex::with_val(prec, (1.0, 0.0));
                let mut corr = eval.mul_const(&t1, &one, &s);
                eval.rescale(&mut corr)?;
                prod = eval.sub(&prod, &corr)?;
            }
        }
        trace!(
            "generated power {k} at level {} scale 2^{:.2}",
            prod.level(),
            prod.scale().log2()
        );
        self.powers.insert(k, prod);
        Ok(())
    }
}

pub struct PolynomialEvaluator<'a> {
    eval: &'a Evaluator,
}

impl<'a> PolynomialEvaluator<'a> {
    pub fn new(eval: &'a Evaluator) -> Self {
        Self { eval }
    }

    /// Evaluates `pol` slot-wise on `ct`, producing a ciphertext at scale
    /// exactly `target_scale`.
    pub fn evaluate(
        &self,
        ct: &Ciphertext,
        pol: &PolynomialInput,
        target_scale: &Scale,
    ) -> Result<Ciphertext> {
        let mut basis = PowerBasis::new(ct, pol.basis());
        self.evaluate_from_power_basis(&mut basis, pol, target_scale)
    }

    /// Evaluation over a caller-provided (possibly pre-populated) basis.
    pub fn evaluate_from_power_basis(
        &self,
        basis: &mut PowerBasis,
        pol: &PolynomialInput,
        target_scale: &Scale,
    ) -> Result<Ciphertext> {
        let x1 = basis
            .power(1)
            .ok_or_else(|| Error::PolynomialEvaluation("power basis is missing X^1".into()))?
            .clone();
        let deg = pol.degree();
        if x1.level() < pol.depth() {
            return Err(Error::InsufficientLevels {
                stage: "polynomial evaluation",
                have: x1.level(),
                need: pol.depth(),
            });
        }

        let baby_log = baby_step_log(deg);
        let threshold = 1usize << baby_log;
        for i in 2..=deg.min(threshold - 1) {
            basis.gen_power(i, self.eval)?;
        }
        if deg >= threshold {
            let mut m = threshold;
            while m <= giant_split(deg) {
                basis.gen_power(m, self.eval)?;
                m <<= 1;
            }
        }

        // shadow pass: fix the output level before touching ciphertexts
        let sim = SimEvaluator::new(self.eval.params());
        let sim_powers: HashMap<usize, SimOperand> = basis
            .powers
            .iter()
            .map(|(&k, ct)| {
                (
                    k,
                    SimOperand {
                        level: ct.level() as i64,
                        scale: ct.scale().value().clone(),
                    },
                )
            })
            .collect();
        let out_level = sim
            .max_target_level(pol, &sim_powers, threshold)
            .min(x1.level() as i64);
        if out_level < 0 {
            return Err(Error::InsufficientLevels {
                stage: "polynomial evaluation",
                have: x1.level(),
                need: pol.depth(),
            });
        }
        trace!("polynomial degree {deg} evaluating to level {out_level}");

        self.recurse(basis, pol, threshold, out_level as usize, target_scale)
    }

    fn recurse(
        &self,
        basis: &mut PowerBasis,
        pol: &PolynomialInput,
        threshold: usize,
        target_level: usize,
        target_scale: &Scale,
    ) -> Result<Ciphertext> {
        let deg = pol.degree();
        if deg < threshold {
            return self.inner_product(basis, pol, target_level, target_scale);
        }
        let prec = self.eval.params().float_precision();
        let m = giant_split(deg);
        let (r, q) = pol.split_at(m, prec);
        let t_m = basis.power(m).expect("giant power generated").clone();

        let q_prime = self.eval.params().q_primes()[target_level + 1];
        let q_target = Scale::new(
            Float::with_val(prec, target_scale.value() * q_prime) / t_m.scale().value(),
        );
        let res_q = self.recurse(basis, &q, threshold, target_level + 1, &q_target)?;
        let mut prod = self.eval.mul_relin(&res_q, &t_m)?;
        self.eval.rescale(&mut prod)?;
        prod.set_scale(target_scale.clone());

        let res_r = self.recurse(basis, &r, threshold, target_level, target_scale)?;
        self.eval.add(&prod, &res_r)
    }

    /// A baby-step leaf: sum of coefficient-scaled powers, one rescale, plus
    /// the constant term. Coefficient i is encoded at the scale that makes
    /// c_i * P_i land on target_scale * q exactly.
    fn inner_product(
        &self,
        basis: &PowerBasis,
        pol: &PolynomialInput,
        target_level: usize,
        target_scale: &Scale,
    ) -> Result<Ciphertext> {
        let prec = self.eval.params().float_precision();
        let deg = pol.degree();
        let nonzero: Vec<usize> = (1..=deg).filter(|&i| !pol.coeff_is_zero(i)).collect();

        let x1 = basis.power(1).expect("checked by caller");
        let log_slots = x1.log_slots();
        let slots = 1usize << log_slots;

        let mut acc = if nonzero.is_empty() {
            self.eval
                .zero_ciphertext(target_level, target_scale, log_slots)
        } else {
            let mul_level = target_level + 1;
            let q_prime = self.eval.params().q_primes()[mul_level];
            let mut acc: Option<Ciphertext> = None;
            for &i in &nonzero {
                let p_i = self.eval.dropped_to(basis.power(i).unwrap(), mul_level);
                let s_i = Scale::new(
                    Float::with_val(prec, target_scale.value() * q_prime) / p_i.scale().value(),
                );
                let term = match pol {
                    PolynomialInput::Scalar(p) => self.eval.mul_const(&p_i, &p.coeffs[i], &s_i),
                    PolynomialInput::Vector(v) => {
                        let values = v.coeff_slots(i, slots, prec);
                        let pt = self.eval.encoder().encode(&values, mul_level, &s_i, log_slots);
                        self.eval.mul_plain(&p_i, &pt)
                    }
                };
                acc = Some(match acc {
                    None => term,
                    Some(a) => self.eval.add(&a, &term)?,
                });
            }
            let mut acc = acc.unwrap();
            self.eval.rescale(&mut acc)?;
            acc.set_scale(target_scale.clone());
            acc
        };

        if !pol.coeff_is_zero(0) {
            acc = match pol {
                PolynomialInput::Scalar(p) => self.eval.add_const(&acc, &p.coeffs[0]),
                PolynomialInput::Vector(v) => {
                    let values = v.coeff_slots(0, slots, prec);
                    let pt = self
                        .eval
                        .encoder()
                        .encode(&values, target_level, target_scale, log_slots);
                    self.eval.add_plain(&acc, &pt)?
                }
            };
        }
        Ok(acc)
    }
}
