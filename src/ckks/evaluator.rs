//! The homomorphic evaluator.
//!
//! An evaluator owns its working state and shares the immutable key
//! material; [`Evaluator::shallow_copy`] hands out an instance over the same
//! keys for use by another thread. Operand scales are enforced on addition,
//! multiplication multiplies scales, and rescaling divides by the dropped
//! prime - the accounting the circuit layers above depend on.

use std::sync::Arc;

use rug::{Complex, Float, Integer};

use crate::core_crypto::poly::RnsPoly;
use crate::core_crypto::rlwe::{
    automorphism_decomposition, gadget_product, hoisted_decompose, HoistedDecomposition,
};
use crate::error::{Error, Result};

use super::ciphertext::{Ciphertext, Plaintext, Scale};
use super::encoding::Encoder;
use super::parameters::CkksParameters;
use super::server_key::EvaluationKeys;

pub struct Evaluator {
    params: CkksParameters,
    keys: Arc<EvaluationKeys>,
    encoder: Encoder,
}

impl Evaluator {
    pub fn new(params: &CkksParameters, keys: Arc<EvaluationKeys>) -> Self {
        Self {
            params: params.clone(),
            keys,
            encoder: Encoder::new(params),
        }
    }

    /// A new evaluator sharing the read-only keys, for use by another
    /// thread.
    pub fn shallow_copy(&self) -> Self {
        Self::new(&self.params, Arc::clone(&self.keys))
    }

    pub fn params(&self) -> &CkksParameters {
        &self.params
    }

    pub fn keys(&self) -> &EvaluationKeys {
        &self.keys
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    fn check_scales(&self, op: &'static str, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<()> {
        if !lhs.scale().approx_eq(rhs.scale()) {
            return Err(Error::ScaleMismatch {
                op,
                lhs: lhs.scale().to_f64(),
                rhs: rhs.scale().to_f64(),
            });
        }
        Ok(())
    }

    pub(crate) fn dropped_to(&self, ct: &Ciphertext, level: usize) -> Ciphertext {
        let mut out = ct.clone();
        if out.level() > level {
            out.drop_levels(out.level() - level);
        }
        out
    }

    /// A transparent zero ciphertext at the given level and scale.
    pub fn zero_ciphertext(&self, level: usize, scale: &Scale, log_slots: usize) -> Ciphertext {
        let n = self.params.n();
        let mut c0 = RnsPoly::zero(n, level + 1, 0);
        c0.is_ntt = true;
        let c1 = c0.clone();
        Ciphertext::new(vec![c0, c1], scale.clone(), log_slots)
    }

    // --- addition and subtraction ---

    pub fn add(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<Ciphertext> {
        self.check_scales("add", lhs, rhs)?;
        let level = lhs.level().min(rhs.level());
        let mut out = self.dropped_to(lhs, level);
        let rhs = self.dropped_to(rhs, level);
        self.add_parts(&mut out, &rhs);
        Ok(out)
    }

    pub fn sub(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<Ciphertext> {
        self.check_scales("sub", lhs, rhs)?;
        let level = lhs.level().min(rhs.level());
        let mut out = self.dropped_to(lhs, level);
        let rhs = self.dropped_to(rhs, level);
        let ring = self.params.ring();
        for (i, part) in rhs.parts.iter().enumerate() {
            if i < out.parts.len() {
                ring.sub_assign(&mut out.parts[i], part);
            } else {
                let mut neg = part.clone();
                ring.neg_assign(&mut neg);
                out.parts.push(neg);
            }
        }
        Ok(out)
    }

    fn add_parts(&self, lhs: &mut Ciphertext, rhs: &Ciphertext) {
        let ring = self.params.ring();
        for (i, part) in rhs.parts.iter().enumerate() {
            if i < lhs.parts.len() {
                ring.add_assign(&mut lhs.parts[i], part);
            } else {
                lhs.parts.push(part.clone());
            }
        }
    }

    pub fn neg(&self, ct: &Ciphertext) -> Ciphertext {
        let ring = self.params.ring();
        let mut out = ct.clone();
        for part in &mut out.parts {
            ring.neg_assign(part);
        }
        out
    }

    // --- plaintext and constant operations ---

    /// ct * pt; the output scale is the product of both scales.
    pub fn mul_plain(&self, ct: &Ciphertext, pt: &Plaintext) -> Ciphertext {
        let ring = self.params.ring();
        let level = ct.level().min(pt.level());
        let mut out = self.dropped_to(ct, level);
        let mut pt_poly = pt.poly.clone();
        pt_poly.coeffs.truncate(level + 1);
        for part in &mut out.parts {
            ring.mul_assign(part, &pt_poly);
        }
        out.scale = ct.scale().mul(pt.scale());
        out
    }

    /// ct + pt; scales must match.
    pub fn add_plain(&self, ct: &Ciphertext, pt: &Plaintext) -> Result<Ciphertext> {
        if !ct.scale().approx_eq(pt.scale()) {
            return Err(Error::ScaleMismatch {
                op: "add_plain",
                lhs: ct.scale().to_f64(),
                rhs: pt.scale().to_f64(),
            });
        }
        let level = ct.level().min(pt.level());
        let mut out = self.dropped_to(ct, level);
        let mut pt_poly = pt.poly.clone();
        pt_poly.coeffs.truncate(level + 1);
        self.params.ring().add_assign(&mut out.parts[0], &pt_poly);
        Ok(out)
    }

    /// ct + v for a complex constant, encoded exactly at ct's scale.
    pub fn add_const(&self, ct: &Ciphertext, value: &Complex) -> Ciphertext {
        let pt = self
            .encoder
            .encode_constant(value, ct.level(), ct.scale(), ct.log_slots());
        let mut out = ct.clone();
        self.params.ring().add_assign(&mut out.parts[0], &pt.poly);
        out
    }

    pub fn add_const_f64(&self, ct: &Ciphertext, value: f64) -> Ciphertext {
        let prec = self.params.float_precision();
        self.add_const(ct, &Complex::with_val(prec, (value, 0.0)))
    }

    /// ct * v for a complex constant encoded at `const_scale`; the output
    /// scale is the product.
    pub fn mul_const(&self, ct: &Ciphertext, value: &Complex, const_scale: &Scale) -> Ciphertext {
        let pt = self
            .encoder
            .encode_constant(value, ct.level(), const_scale, ct.log_slots());
        self.mul_plain(ct, &pt)
    }

    /// Multiplies the encrypted message by a small integer without touching
    /// the scale.
    pub fn mul_scalar_u64(&self, ct: &mut Ciphertext, scalar: u64) {
        let ring = self.params.ring();
        for part in &mut ct.parts {
            ring.scalar_mul_assign(part, scalar);
        }
    }

    /// Multiplies the encrypted message by an arbitrary-precision integer
    /// without touching the scale.
    pub fn mul_scalar_bigint(&self, ct: &mut Ciphertext, scalar: &Integer) {
        let ring = self.params.ring();
        for part in &mut ct.parts {
            ring.scalar_mul_bigint_assign(part, scalar);
        }
    }

    /// Multiplies data and scale by the same integer, leaving the message
    /// unchanged. This is the exact scale-up used by ScaleDown and the
    /// iterative refinement.
    pub fn scale_up_bigint(&self, ct: &mut Ciphertext, factor: &Integer) {
        let ring = self.params.ring();
        for part in &mut ct.parts {
            ring.scalar_mul_bigint_assign(part, factor);
        }
        let prec = ct.scale.precision();
        let f = Float::with_val(prec, factor);
        ct.scale = Scale::new(Float::with_val(prec, ct.scale.value() * &f));
    }

    /// Multiplies every slot by i (the X^(N/2) monomial).
    pub fn mul_by_i(&self, ct: &Ciphertext) -> Ciphertext {
        self.mul_by_monomial(ct, (self.params.n() / 2) as u64)
    }

    /// Multiplies every slot by -i.
    pub fn div_by_i(&self, ct: &Ciphertext) -> Ciphertext {
        self.mul_by_monomial(ct, (3 * self.params.n() / 2) as u64)
    }

    fn mul_by_monomial(&self, ct: &Ciphertext, exp: u64) -> Ciphertext {
        let ring = self.params.ring();
        let mut out = ct.clone();
        for part in &mut out.parts {
            ring.intt_assign(part);
            ring.monomial_mul_assign(part, exp);
            ring.ntt_assign(part);
        }
        out
    }

    // --- multiplication ---

    /// lhs * rhs followed by relinearization back to degree one.
    pub fn mul_relin(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<Ciphertext> {
        let ring = self.params.ring();
        let level = lhs.level().min(rhs.level());
        let a = self.dropped_to(lhs, level);
        let b = self.dropped_to(rhs, level);
        debug_assert_eq!(a.degree(), 1);
        debug_assert_eq!(b.degree(), 1);

        let d0 = ring.mul(&a.parts[0], &b.parts[0]);
        let mut d1 = ring.mul(&a.parts[0], &b.parts[1]);
        ring.mul_add_assign(&mut d1, &a.parts[1], &b.parts[0]);
        let d2 = ring.mul(&a.parts[1], &b.parts[1]);

        let relin = self.keys.relin_key()?;
        let (e0, e1) = crate::core_crypto::rlwe::key_switch(ring, &d2, relin);

        let mut c0 = d0;
        ring.add_assign(&mut c0, &e0);
        let mut c1 = d1;
        ring.add_assign(&mut c1, &e1);

        Ok(Ciphertext::new(
            vec![c0, c1],
            a.scale().mul(b.scale()),
            a.log_slots(),
        ))
    }

    pub fn square(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        self.mul_relin(ct, ct)
    }

    // --- rescaling and level management ---

    /// Divides by the top prime and drops a level.
    pub fn rescale(&self, ct: &mut Ciphertext) -> Result<()> {
        if ct.level() == 0 {
            return Err(Error::InsufficientLevels {
                stage: "rescale",
                have: 0,
                need: 1,
            });
        }
        let ring = self.params.ring();
        let q_top = self.params.q_primes()[ct.level()];
        for part in &mut ct.parts {
            ring.rescale_assign(part);
        }
        ct.scale = ct.scale.div_u64(q_top);
        Ok(())
    }

    /// Rescales until the ciphertext reaches `level`.
    pub fn rescale_until(&self, ct: &mut Ciphertext, level: usize) -> Result<()> {
        while ct.level() > level {
            self.rescale(ct)?;
        }
        Ok(())
    }

    // --- automorphisms ---

    /// Rotates the slot vector left by `k`.
    pub fn rotate(&self, ct: &Ciphertext, k: i64) -> Result<Ciphertext> {
        if k == 0 {
            return Ok(ct.clone());
        }
        self.apply_galois(ct, self.params.galois_element(k))
    }

    /// Conjugates every slot.
    pub fn conjugate(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        self.apply_galois(ct, self.params.galois_element_conjugation())
    }

    /// Applies X -> X^g and switches back under the original secret.
    pub fn apply_galois(&self, ct: &Ciphertext, galois_element: u64) -> Result<Ciphertext> {
        debug_assert_eq!(ct.degree(), 1);
        let ring = self.params.ring();
        let key = self.keys.galois_key(galois_element)?;
        let c0 = ring.automorphism(&ct.parts[0], galois_element);
        let c1 = ring.automorphism(&ct.parts[1], galois_element);
        let (mut d0, d1) = crate::core_crypto::rlwe::key_switch(ring, &c1, key);
        ring.add_assign(&mut d0, &c0);
        Ok(Ciphertext::new(
            vec![d0, d1],
            ct.scale().clone(),
            ct.log_slots(),
        ))
    }

    /// Gadget decomposition of the degree-one component, computed once and
    /// reused by every rotation of a hoisted set.
    pub fn decompose(&self, ct: &Ciphertext) -> HoistedDecomposition {
        debug_assert_eq!(ct.degree(), 1);
        hoisted_decompose(self.params.ring(), &ct.parts[1])
    }

    /// One rotation served from a shared decomposition.
    pub fn rotate_from_decomposition(
        &self,
        ct: &Ciphertext,
        decomp: &HoistedDecomposition,
        k: i64,
    ) -> Result<Ciphertext> {
        if k == 0 {
            return Ok(ct.clone());
        }
        let g = self.params.galois_element(k);
        let ring = self.params.ring();
        let key = self.keys.galois_key(g)?;
        let rotated = automorphism_decomposition(ring, decomp, g);
        let (mut d0, d1) = gadget_product(ring, &rotated, key);
        let c0 = ring.automorphism(&ct.parts[0], g);
        ring.add_assign(&mut d0, &c0);
        Ok(Ciphertext::new(
            vec![d0, d1],
            ct.scale().clone(),
            ct.log_slots(),
        ))
    }

    /// Rotates by every offset in `ks`, decomposing the input only once.
    pub fn rotate_hoisted(
        &self,
        ct: &Ciphertext,
        ks: &[i64],
    ) -> Result<std::collections::HashMap<i64, Ciphertext>> {
        let decomp = self.decompose(ct);
        ks.iter()
            .map(|&k| Ok((k, self.rotate_from_decomposition(ct, &decomp, k)?)))
            .collect()
    }

    /// Folds the slot dimensions above `log_slots`: every surviving slot
    /// receives the sum of the N/(2 * slots) positions that alias it.
    pub fn trace(&self, ct: &Ciphertext, log_slots: usize) -> Result<Ciphertext> {
        let mut out = ct.clone();
        for i in log_slots..self.params.log_n() - 1 {
            let rotated = self.rotate(&out, 1i64 << i)?;
            out = self.add(&out, &rotated)?;
        }
        Ok(out)
    }
}
