//! The five-stage bootstrapping circuit and its iterative refinement.
//!
//! A bootstrapper is built once per (parameters, keys) pair. Everything
//! derived at construction (DFT matrices, the modular-reduction bundle,
//! key material) sits behind an Arc and is shared read-only;
//! [`Bootstrapper::shallow_copy`] pairs that shared state with a fresh
//! evaluator so distinct threads can refresh distinct ciphertexts without
//! synchronization.

use std::sync::Arc;

use log::debug;
use rug::{Float, Integer};

use crate::ckks::ciphertext::{Ciphertext, Scale};
use crate::ckks::evaluator::Evaluator;
use crate::ckks::parameters::{CkksParameters, RingType};
use crate::core_crypto::rlwe::key_switch;
use crate::error::{Error, Result};

use super::dft::DftMatrix;
use super::mod1::{evaluate_mod1, Mod1Parameters};
use super::packing::{
    pack, round_to_integer, switch_ring_degree_down, switch_ring_degree_up, unpack,
};
use super::parameters::{
    galois_elements, BootstrappingKeys, BootstrappingParametersLiteral, IterationsParameters,
};

struct BootstrapperInner {
    bt_params: CkksParameters,
    residual_params: CkksParameters,
    literal: BootstrappingParametersLiteral,
    keys: BootstrappingKeys,
    c2s: DftMatrix,
    s2c: DftMatrix,
    mod1: Mod1Parameters,
    log_slots: usize,
    output_level: usize,
}

pub struct Bootstrapper {
    shared: Arc<BootstrapperInner>,
    evaluator: Evaluator,
}

impl Bootstrapper {
    /// Validates the key material and precomputes the circuit. No
    /// partially constructed bootstrapper is ever returned.
    pub fn new(
        residual_params: &CkksParameters,
        literal: &BootstrappingParametersLiteral,
        keys: BootstrappingKeys,
    ) -> Result<Self> {
        literal.validate()?;
        let bt_params = CkksParameters::from_literal(&literal.ckks)?;
        if residual_params.log_n() > bt_params.log_n() {
            return Err(Error::InvalidParameters(
                "residual ring degree exceeds the bootstrapping ring".into(),
            ));
        }
        if residual_params.max_level() > bt_params.max_level()
            || residual_params.q_primes()
                != &bt_params.q_primes()[..=residual_params.max_level()]
        {
            return Err(Error::InvalidParameters(
                "residual modulus chain is not a prefix of the bootstrapping chain".into(),
            ));
        }

        // level layout, top down: ModUp spends one level reaching the
        // evaluation scale, then each stage consumes its depth
        let max_level = bt_params.max_level();
        let c2s_start = max_level - 1;
        let c2s_depth = literal.coeffs_to_slots.depth();
        if c2s_start < c2s_depth {
            return Err(Error::InsufficientLevels {
                stage: "CoeffsToSlots",
                have: c2s_start,
                need: c2s_depth,
            });
        }
        let mod1 = Mod1Parameters::new(&bt_params, &literal.mod1, c2s_start - c2s_depth)?;
        let s2c_start = mod1.output_level();
        let s2c_depth = literal.slots_to_coeffs.depth();
        if s2c_start < s2c_depth {
            return Err(Error::InsufficientLevels {
                stage: "SlotsToCoeffs",
                have: s2c_start,
                need: s2c_depth,
            });
        }
        let output_level = s2c_start - s2c_depth;

        let encoder = crate::ckks::Encoder::new(&bt_params);
        let c2s = DftMatrix::generate(
            &bt_params,
            &encoder,
            &literal.coeffs_to_slots,
            literal.log_slots,
            c2s_start,
            0.5,
        )?;
        let s2c = DftMatrix::generate(
            &bt_params,
            &encoder,
            &literal.slots_to_coeffs,
            literal.log_slots,
            s2c_start,
            1.0,
        )?;

        // key presence is fatal at construction
        keys.evaluation_keys.relin_key()?;
        for g in galois_elements(&bt_params, literal, residual_params.log_n()) {
            if !keys.evaluation_keys.has_galois_key(g) {
                return Err(Error::MissingKey(format!("Galois key for element {g}")));
            }
        }
        if literal.ephemeral_secret_weight.is_some() && keys.encapsulation.is_none() {
            return Err(Error::MissingKey(
                "dense/sparse encapsulation keys".into(),
            ));
        }
        if residual_params.log_n() < bt_params.log_n() && keys.ring_switch.is_none() {
            return Err(Error::MissingKey("ring-degree switching keys".into()));
        }

        let evaluator = Evaluator::new(&bt_params, Arc::clone(&keys.evaluation_keys));
        Ok(Self {
            shared: Arc::new(BootstrapperInner {
                bt_params,
                residual_params: residual_params.clone(),
                literal: literal.clone(),
                keys,
                c2s,
                s2c,
                mod1,
                log_slots: literal.log_slots,
                output_level,
            }),
            evaluator,
        })
    }

    /// A bootstrapper sharing all read-only state, for another thread.
    pub fn shallow_copy(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            evaluator: self.evaluator.shallow_copy(),
        }
    }

    pub fn params(&self) -> &CkksParameters {
        &self.shared.bt_params
    }

    pub fn residual_params(&self) -> &CkksParameters {
        &self.shared.residual_params
    }

    /// Total rescales the circuit consumes.
    pub fn depth(&self) -> usize {
        self.shared.bt_params.max_level() - self.shared.output_level
    }

    pub fn output_level(&self) -> usize {
        self.shared.output_level
    }

    /// Ciphertexts at any level down to zero can be refreshed.
    pub fn minimum_input_level(&self) -> usize {
        0
    }

    /// Refreshes one ciphertext, iterating when configured. The input is
    /// never modified.
    pub fn bootstrap(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        let (out, _err_scale) = self.bootstrap_once(ct)?;
        match &self.shared.literal.iterations {
            None => Ok(out),
            Some(it) => self.iterate(ct, out, it),
        }
    }

    /// Refreshes many ciphertexts; when the residual ring is smaller they
    /// are switched up, interleaved, refreshed together and taken apart
    /// again. Output order matches the input.
    pub fn bootstrap_many(&self, cts: &[Ciphertext]) -> Result<Vec<Ciphertext>> {
        let inner = &*self.shared;
        if inner.residual_params.log_n() == inner.bt_params.log_n() {
            return cts.iter().map(|ct| self.bootstrap(ct)).collect();
        }
        let switch = inner
            .keys
            .ring_switch
            .as_ref()
            .ok_or_else(|| Error::MissingKey("ring-degree switching keys".into()))?;
        if inner.log_slots != inner.bt_params.max_log_slots() {
            return Err(Error::InvalidParameters(
                "packed bootstrapping requires a full-slot configuration".into(),
            ));
        }
        let gap = inner.bt_params.n() / inner.residual_params.n();
        let mut out = Vec::with_capacity(cts.len());
        for chunk in cts.chunks(gap) {
            let mut ups = chunk
                .iter()
                .map(|ct| {
                    switch_ring_degree_up(
                        &inner.residual_params,
                        &inner.bt_params,
                        &switch.to_bootstrapping,
                        ct,
                    )
                })
                .collect::<Result<Vec<_>>>()?;
            let (pad_level, pad_scale, pad_slots) =
                (ups[0].level(), ups[0].scale().clone(), ups[0].log_slots());
            while ups.len() < gap {
                ups.push(self.evaluator.zero_ciphertext(pad_level, &pad_scale, pad_slots));
            }
            let mut packed = pack(&self.evaluator, ups)?;
            packed.log_slots = inner.log_slots;
            let boot = self.bootstrap(&packed)?;
            let mut parts = unpack(&self.evaluator, &boot, gap)?;
            parts.truncate(chunk.len());
            for (orig, mut part) in chunk.iter().zip(parts) {
                part.log_slots = orig.log_slots();
                out.push(switch_ring_degree_down(
                    &inner.bt_params,
                    &inner.residual_params,
                    &switch.to_residual,
                    &part,
                )?);
            }
        }
        Ok(out)
    }

    /// Refreshes one or two real-payload ciphertexts at once: the right
    /// operand rides in the imaginary slots, and the conjugation split
    /// afterwards doubles the scale in place of the intrinsic factor-two
    /// domain switch.
    pub fn evaluate_conjugate_invariant(
        &self,
        ct_left: &Ciphertext,
        ct_right: Option<&Ciphertext>,
    ) -> Result<(Ciphertext, Option<Ciphertext>)> {
        if self.shared.residual_params.ring_type() != RingType::ConjugateInvariant {
            return Err(Error::InvalidParameters(
                "the residual ring does not carry real-only payload".into(),
            ));
        }
        let eval = &self.evaluator;
        let packed = match ct_right {
            Some(right) => {
                let right_i = eval.mul_by_i(right);
                eval.add(ct_left, &right_i)?
            }
            None => ct_left.clone(),
        };
        let boot = self.bootstrap(&packed)?;
        let conj = eval.conjugate(&boot)?;
        let mut left = eval.add(&boot, &conj)?;
        left.set_scale(left.scale().mul_u64(2));
        let right = match ct_right {
            Some(_) => {
                let diff = eval.sub(&boot, &conj)?;
                let mut right = eval.div_by_i(&diff);
                right.set_scale(right.scale().mul_u64(2));
                Some(right)
            }
            None => None,
        };
        Ok((left, right))
    }

    /// The five-stage circuit. Returns the refreshed ciphertext (exact
    /// scale metadata) and the ScaleDown residual errScale.
    fn bootstrap_once(&self, ct_in: &Ciphertext) -> Result<(Ciphertext, Float)> {
        let inner = &*self.shared;
        if ct_in.log_slots() != inner.log_slots {
            return Err(Error::InvalidParameters(format!(
                "ciphertext carries 2^{} slots, the bootstrapper expects 2^{}",
                ct_in.log_slots(),
                inner.log_slots
            )));
        }

        let (ct, err_scale) = self.scale_down(ct_in)?;
        let s0 = ct.scale().value().clone();
        debug!("ScaleDown: level {} scale 2^{:.2}", ct.level(), ct.scale().log2());

        let ct = self.mod_up(&ct)?;
        debug!("ModUp: level {} scale 2^{:.2}", ct.level(), ct.scale().log2());

        let (real, imag) = self.coeffs_to_slots(&ct)?;
        debug!("CoeffsToSlots: level {}", real.level());

        let real = evaluate_mod1(&self.evaluator, &inner.mod1, &real)?;
        let imag = evaluate_mod1(&self.evaluator, &inner.mod1, &imag)?;
        debug!("EvalMod: level {}", real.level());

        let mut out = self.slots_to_coeffs(&real, &imag)?;
        // undo the message-ratio embedding: the slots hold the message
        // times s0/q0
        let prec = inner.bt_params.float_precision();
        let q0 = inner.bt_params.q_primes()[0];
        let final_scale = Float::with_val(
            prec,
            inner.mod1.scaling_factor().value() * &s0,
        ) / q0;
        out.set_scale(Scale::new(final_scale));
        debug!("SlotsToCoeffs: level {} scale 2^{:.2}", out.level(), out.scale().log2());

        debug_assert_eq!(out.level(), inner.output_level);
        Ok((out, err_scale))
    }

    /// Step 1: drop spare levels, scale the message up to q0/ratio, and
    /// land on level zero.
    fn scale_down(&self, ct: &Ciphertext) -> Result<(Ciphertext, Float)> {
        let inner = &*self.shared;
        let prec = inner.bt_params.float_precision();
        let q = inner.bt_params.q_primes();
        let ratio = Float::with_val(
            prec,
            Float::i_exp(1, inner.mod1.literal().log_message_ratio as i32),
        );
        let mut ct = ct.clone();

        // headroom permitting, the top prime is simply discarded
        loop {
            let level = ct.level();
            if level == 0 {
                break;
            }
            let mut q_prod = Float::with_val(prec, 1u32);
            for &qi in &q[..=level] {
                q_prod *= qi;
            }
            let current = Float::with_val(prec, &q_prod / ct.scale().value());
            let bound = Float::with_val(prec, &ratio * q[level]);
            if current >= bound {
                ct.drop_levels(1);
            } else {
                break;
            }
        }

        let mut q_prod = Float::with_val(prec, 1u32);
        for &qi in &q[..=ct.level()] {
            q_prod *= qi;
        }
        let current = Float::with_val(prec, &q_prod / ct.scale().value());
        let scale_up = Float::with_val(prec, &current / &ratio);
        if scale_up < 0.5 {
            return Err(Error::ScaleOutOfRange {
                ratio: scale_up.to_f64(),
            });
        }
        let factor = scale_up.round().to_integer().unwrap();
        self.evaluator.scale_up_bigint(&mut ct, &factor);
        if ct.level() > 0 {
            self.evaluator.rescale_until(&mut ct, 0)?;
        }

        let err_scale = Float::with_val(prec, ct.scale().value() * &ratio) / q[0];
        Ok((ct, err_scale))
    }

    /// Step 2: raise the modulus from q0 to the full chain, fold the
    /// sparse packing, and reach the evaluation scale.
    fn mod_up(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        let inner = &*self.shared;
        let params = &inner.bt_params;
        let ring = params.ring();
        let prec = params.float_precision();
        debug_assert_eq!(ct.level(), 0);
        debug_assert_eq!(ct.degree(), 1);
        let mut ct = ct.clone();

        // a sparse ephemeral secret keeps the centered lift's noise low
        if let Some(enc) = &inner.keys.encapsulation {
            let (d0, d1) = key_switch(ring, &ct.parts[1], &enc.to_sparse);
            ring.add_assign(&mut ct.parts[0], &d0);
            ct.parts[1] = d1;
        }

        for part in &mut ct.parts {
            ring.intt_assign(part);
            ring.mod_up_assign(part, params.max_level());
            ring.ntt_assign(part);
        }

        if inner.keys.encapsulation.is_some() {
            let enc = inner.keys.encapsulation.as_ref().unwrap();
            let (d0, d1) = key_switch(ring, &ct.parts[1], &enc.to_dense);
            ring.add_assign(&mut ct.parts[0], &d0);
            ct.parts[1] = d1;
        }

        // with scale K * q0 the slots read (x / K), x = message/ratio + wrap
        let q0 = params.q_primes()[0];
        let k_scale = Float::with_val(prec, q0) * inner.mod1.k() as u64;
        ct.set_scale(Scale::new(k_scale));

        if inner.log_slots < params.max_log_slots() {
            ct = self.evaluator.trace(&ct, inner.log_slots)?;
            let fold = 1u64 << (params.log_n() - 1 - inner.log_slots);
            ct.set_scale(ct.scale().mul_u64(fold));
        }

        // one multiply-and-rescale to land on the evaluation scale
        let q_top = params.q_primes()[ct.level()];
        let target = Float::with_val(
            prec,
            inner.mod1.scaling_factor().value() * q_top,
        ) / ct.scale().value();
        let factor = round_to_integer(&target);
        self.evaluator.scale_up_bigint(&mut ct, &factor);
        self.evaluator.rescale(&mut ct)?;
        Ok(ct)
    }

    /// Step 3: homomorphic DFT, then the conjugation split into real and
    /// imaginary parts. The split's half lives inside the last DFT matrix,
    /// so no scale adjustment happens here.
    fn coeffs_to_slots(&self, ct: &Ciphertext) -> Result<(Ciphertext, Ciphertext)> {
        let ct = self.shared.c2s.apply(&self.evaluator, ct)?;
        let conj = self.evaluator.conjugate(&ct)?;
        let real = self.evaluator.add(&ct, &conj)?;
        let diff = self.evaluator.sub(&ct, &conj)?;
        let imag = self.evaluator.div_by_i(&diff);
        Ok((real, imag))
    }

    /// Step 5: recombine and apply the inverse DFT.
    fn slots_to_coeffs(&self, real: &Ciphertext, imag: &Ciphertext) -> Result<Ciphertext> {
        let imag_i = self.evaluator.mul_by_i(imag);
        let ct = self.evaluator.add(real, &imag_i)?;
        self.shared.s2c.apply(&self.evaluator, &ct)
    }

    /// Meta-BTS: refresh the residual error of the base refresh, once per
    /// configured iteration.
    fn iterate(
        &self,
        ct_in: &Ciphertext,
        ct_out: Ciphertext,
        it: &IterationsParameters,
    ) -> Result<Ciphertext> {
        let inner = &*self.shared;
        let prec = inner.bt_params.float_precision();
        let q = inner.bt_params.q_primes();

        let diff_scale = Float::with_val(prec, ct_in.scale().value() / ct_out.scale().value());
        let diff_int = diff_scale.clone().round().to_integer().unwrap();
        if diff_int < 1 {
            return Err(Error::IterationStopped {
                completed: 0,
                best: Box::new(ct_out),
            });
        }
        let mut ct_hi = ct_out;
        self.evaluator.mul_scalar_bigint(&mut ct_hi, &diff_int);
        ct_hi.set_scale(ct_in.scale().clone());

        let mut total_log_prec = 0usize;
        let count = it.log_precisions.len();
        for (k, &log_prec) in it.log_precisions.iter().enumerate() {
            total_log_prec += log_prec;
            let prec_k = Integer::from(1) << total_log_prec as u32;

            let mut err = self.evaluator.sub(&ct_hi, ct_in)?;
            self.evaluator.mul_scalar_bigint(&mut err, &prec_k);
            let (mut refreshed, _err_scale) = self.bootstrap_once(&err)?;
            // the refreshed error is prec_k times too large by design
            refreshed.set_scale(Scale::new(Float::with_val(
                prec,
                refreshed.scale().value() * &prec_k,
            )));

            let align = Float::with_val(prec, ct_in.scale().value() / refreshed.scale().value());
            let last = k + 1 == count;
            if last && it.reserved_prime_bit_size.is_some() && refreshed.level() > 0 {
                // reserved-prime division: round against the top prime for
                // sub-integer granularity, then spend it with one rescale
                let q_top = q[refreshed.level()];
                let factor = Float::with_val(prec, &align * q_top)
                    .round()
                    .to_integer()
                    .unwrap();
                if factor < 1 {
                    return Err(Error::IterationStopped {
                        completed: k,
                        best: Box::new(ct_hi),
                    });
                }
                self.evaluator.scale_up_bigint(&mut refreshed, &factor);
                self.evaluator.rescale(&mut refreshed)?;
            } else {
                let factor = align.round().to_integer().unwrap();
                if factor < 1 {
                    return Err(Error::IterationStopped {
                        completed: k,
                        best: Box::new(ct_hi),
                    });
                }
                self.evaluator.scale_up_bigint(&mut refreshed, &factor);
            }
            // any residual mismatch is second order in the corrected error
            refreshed.set_scale(ct_in.scale().clone());
            ct_hi = self.evaluator.sub(&ct_hi, &refreshed)?;
            debug!(
                "Meta-BTS iteration {} done, target precision 2^-{total_log_prec}",
                k + 1
            );
        }

        if ct_hi.level() > inner.residual_params.max_level() {
            let drop = ct_hi.level() - inner.residual_params.max_level();
            ct_hi.drop_levels(drop);
        }
        Ok(ct_hi)
    }
}
