//! Ring-degree packing and switching.
//!
//! When the bootstrapping ring N2 is larger than the residual ring N1,
//! 2^log_gap residual ciphertexts are embedded into N2 (X -> X^(N2/N1)),
//! interleaved into one ciphertext by monomial shifts, refreshed once, and
//! taken apart again. Both rings must share their prime chains so residue
//! rows carry over unchanged.

use rug::Integer;

use crate::ckks::ciphertext::Ciphertext;
use crate::ckks::evaluator::Evaluator;
use crate::ckks::parameters::CkksParameters;
use crate::core_crypto::poly::RnsPoly;
use crate::core_crypto::rlwe::{key_switch, KeySwitchKey};
use crate::error::Result;

/// Maps a small-ring polynomial into the big ring by X -> X^(N2/N1). The
/// residue rows are reused as-is; only coefficient positions change.
pub(crate) fn embed_poly(
    small: &CkksParameters,
    big: &CkksParameters,
    poly: &RnsPoly,
) -> RnsPoly {
    debug_assert!(!poly.is_ntt());
    let gap = big.n() / small.n();
    let mut out = RnsPoly::zero(big.n(), poly.q_rows(), 0);
    for row in 0..poly.rows() {
        for j in 0..small.n() {
            out.coeffs[row][j * gap] = poly.coeffs[row][j];
        }
    }
    out
}

/// Inverse of [`embed_poly`]: keeps the coefficients at multiples of the
/// gap. Exact whenever the encrypted plaintext lives in the sub-ring.
pub(crate) fn subsample_poly(
    big: &CkksParameters,
    small: &CkksParameters,
    poly: &RnsPoly,
) -> RnsPoly {
    debug_assert!(!poly.is_ntt());
    let gap = big.n() / small.n();
    let mut out = RnsPoly::zero(small.n(), poly.q_rows(), 0);
    for row in 0..poly.rows() {
        for j in 0..small.n() {
            out.coeffs[row][j] = poly.coeffs[row][j * gap];
        }
    }
    out
}

/// Switches a residual-ring ciphertext into the bootstrapping ring: embed
/// both components, then key-switch the mask from the embedded residual
/// secret to the big-ring secret.
pub(crate) fn switch_ring_degree_up(
    small: &CkksParameters,
    big: &CkksParameters,
    key: &KeySwitchKey,
    ct: &Ciphertext,
) -> Result<Ciphertext> {
    debug_assert_eq!(ct.degree(), 1);
    let small_ring = small.ring();
    let big_ring = big.ring();

    let mut parts = Vec::with_capacity(2);
    for part in &ct.parts {
        let mut p = part.clone();
        if p.is_ntt() {
            small_ring.intt_assign(&mut p);
        }
        let mut embedded = embed_poly(small, big, &p);
        big_ring.ntt_assign(&mut embedded);
        parts.push(embedded);
    }
    let (mut d0, d1) = key_switch(big_ring, &parts[1], key);
    big_ring.add_assign(&mut d0, &parts[0]);
    Ok(Ciphertext::new(
        vec![d0, d1],
        ct.scale().clone(),
        ct.log_slots(),
    ))
}

/// Switches back: key-switch to the embedded residual secret, then keep
/// the sub-ring coefficients of both components.
pub(crate) fn switch_ring_degree_down(
    big: &CkksParameters,
    small: &CkksParameters,
    key: &KeySwitchKey,
    ct: &Ciphertext,
) -> Result<Ciphertext> {
    debug_assert_eq!(ct.degree(), 1);
    let big_ring = big.ring();
    let small_ring = small.ring();

    let (mut d0, d1) = key_switch(big_ring, &ct.parts[1], key);
    big_ring.add_assign(&mut d0, &ct.parts[0]);

    let mut parts = Vec::with_capacity(2);
    for p in [d0, d1] {
        let mut p = p;
        big_ring.intt_assign(&mut p);
        let mut small_poly = subsample_poly(big, small, &p);
        small_ring.ntt_assign(&mut small_poly);
        parts.push(small_poly);
    }
    Ok(Ciphertext::new(
        parts,
        ct.scale().clone(),
        ct.log_slots(),
    ))
}

/// Galois elements of the unpack projections: N/2^i + 1 for each split.
pub fn unpack_galois_elements(params: &CkksParameters, log_count: usize) -> Vec<u64> {
    (0..log_count)
        .map(|i| (params.n() >> i) as u64 + 1)
        .collect()
}

/// Interleaves 2^k sub-ring-supported ciphertexts into one: at step i,
/// every odd member is shifted by X^(2^i) and folded into its even
/// neighbor.
pub(crate) fn pack(eval: &Evaluator, cts: Vec<Ciphertext>) -> Result<Ciphertext> {
    debug_assert!(cts.len().is_power_of_two());
    let ring = eval.params().ring();
    let mut layer = cts;
    let mut step = 0u32;
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len() / 2);
        for pair in layer.chunks(2) {
            let mut odd = pair[1].clone();
            for part in &mut odd.parts {
                ring.intt_assign(part);
                ring.monomial_mul_assign(part, 1u64 << step);
                ring.ntt_assign(part);
            }
            next.push(eval.add(&pair[0], &odd)?);
        }
        layer = next;
        step += 1;
    }
    Ok(layer.pop().expect("non-empty input"))
}

/// Reverses [`pack`]: each split keeps the sub-ring half via the
/// projection automorphism and shifts the complementary half back by
/// X^(-2^i). Every split doubles the scale in place of the halving.
pub(crate) fn unpack(eval: &Evaluator, ct: &Ciphertext, count: usize) -> Result<Vec<Ciphertext>> {
    debug_assert!(count.is_power_of_two());
    let n = eval.params().n();
    let log_count = count.trailing_zeros() as usize;
    let ring = eval.params().ring();

    let mut layer: Vec<(usize, Ciphertext)> = vec![(0, ct.clone())];
    for i in 0..log_count {
        let galois = (n >> i) as u64 + 1;
        let mut next = Vec::with_capacity(layer.len() * 2);
        for (offset, ct) in layer {
            let image = eval.apply_galois(&ct, galois)?;
            let mut even = eval.add(&ct, &image)?;
            even.set_scale(even.scale().mul_u64(2));
            let mut odd = eval.sub(&ct, &image)?;
            for part in &mut odd.parts {
                ring.intt_assign(part);
                ring.monomial_mul_assign(part, (2 * n) as u64 - (1u64 << i));
                ring.ntt_assign(part);
            }
            odd.set_scale(odd.scale().mul_u64(2));
            next.push((offset, even));
            next.push((offset + (1 << i), odd));
        }
        layer = next;
    }
    layer.sort_by_key(|(offset, _)| *offset);
    Ok(layer.into_iter().map(|(_, ct)| ct).collect())
}

/// Rounds a positive float ratio to the nearest integer, at least one.
pub(crate) fn round_to_integer(value: &rug::Float) -> Integer {
    let rounded = value.clone().round();
    rounded.to_integer().unwrap_or_else(|| Integer::from(1)).max(Integer::from(1))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rug::Complex;

    use crate::ckks::parameters::{CkksParametersLiteral, RingType};
    use crate::ckks::{ClientKey, EvaluationKeys};
    use crate::core_crypto::rlwe::RlweSecretKey;

    use super::*;

    fn big_params() -> CkksParameters {
        CkksParameters::from_literal(&CkksParametersLiteral {
            log_n: 8,
            log_q: vec![50, 40, 40],
            log_p: vec![51],
            log_default_scale: 40,
            ring_type: RingType::Standard,
            float_precision: None,
        })
        .unwrap()
    }

    fn small_params(big: &CkksParameters) -> CkksParameters {
        CkksParameters::from_primes(
            6,
            big.q_primes().to_vec(),
            big.p_primes().to_vec(),
            40,
            RingType::Standard,
            big.float_precision(),
        )
        .unwrap()
    }

    #[test]
    fn embed_subsample_roundtrip() {
        let big = big_params();
        let small = small_params(&big);
        let mut rng = ChaCha8Rng::seed_from_u64(23);
        let mut poly = small.ring().sample_uniform(3, 0, &mut rng);
        poly.is_ntt = false;
        let embedded = embed_poly(&small, &big, &poly);
        assert_eq!(subsample_poly(&big, &small, &embedded), poly);
    }

    #[test]
    fn ring_switch_preserves_slot_values() {
        let big = big_params();
        let small = small_params(&big);
        let prec = big.float_precision();
        let mut rng = ChaCha8Rng::seed_from_u64(29);

        let ck_small = ClientKey::generate(&small, &mut rng);
        let ck_big = ClientKey::generate(&big, &mut rng);

        // switching keys between the embedded small secret and the big one
        let gap = big.n() / small.n();
        let mut embedded_coeffs = vec![0i64; big.n()];
        for (j, &c) in ck_small.secret().coeffs.iter().enumerate() {
            embedded_coeffs[j * gap] = c;
        }
        let embedded_secret = RlweSecretKey::from_coeffs(big.ring(), embedded_coeffs);
        let up_key = KeySwitchKey::generate(
            big.ring(),
            &embedded_secret.poly,
            ck_big.secret(),
            &mut rng,
        );
        let down_key = KeySwitchKey::generate(
            big.ring(),
            &ck_big.secret().poly,
            &embedded_secret,
            &mut rng,
        );

        let log_slots = 4;
        let encoder_small = crate::ckks::Encoder::new(&small);
        let encoder_big = crate::ckks::Encoder::new(&big);
        let values: Vec<Complex> = (0..1 << log_slots)
            .map(|_| Complex::with_val(prec, (rng.gen_range(-1.0f64..1.0), 0.0)))
            .collect();
        let pt = encoder_small.encode(&values, small.max_level(), &small.default_scale(), log_slots);
        let ct = ck_small.encrypt(&pt, &mut rng);

        let up = switch_ring_degree_up(&small, &big, &up_key, &ct).unwrap();
        let decoded = encoder_big.decode(&ck_big.decrypt(&up));
        for (v, d) in values.iter().zip(decoded.iter()) {
            let err = Complex::with_val(prec, v - d).abs().real().to_f64();
            assert!(err < 2f64.powi(-18), "up: {err}");
        }

        let down = switch_ring_degree_down(&big, &small, &down_key, &up).unwrap();
        let decoded = encoder_small.decode(&ck_small.decrypt(&down));
        for (v, d) in values.iter().zip(decoded.iter()) {
            let err = Complex::with_val(prec, v - d).abs().real().to_f64();
            assert!(err < 2f64.powi(-17), "down: {err}");
        }
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let big = big_params();
        let prec = big.float_precision();
        let mut rng = ChaCha8Rng::seed_from_u64(31);
        let ck = ClientKey::generate(&big, &mut rng);
        let count = 4usize;
        let keys = EvaluationKeys::generate_for_elements(
            &big,
            &ck,
            &unpack_galois_elements(&big, 2),
            &mut rng,
        );
        let eval = Evaluator::new(&big, Arc::new(keys));
        let encoder = eval.encoder();

        // sub-ring-supported plaintexts: a gap of at least `count`
        let log_slots = 5;
        let mut cts = Vec::new();
        let mut originals = Vec::new();
        for _ in 0..count {
            let values: Vec<Complex> = (0..1 << log_slots)
                .map(|_| Complex::with_val(prec, (rng.gen_range(-1.0f64..1.0), 0.0)))
                .collect();
            let pt = encoder.encode(&values, big.max_level(), &big.default_scale(), log_slots);
            cts.push(ck.encrypt(&pt, &mut rng));
            originals.push(values);
        }

        let packed = pack(&eval, cts).unwrap();
        let unpacked = unpack(&eval, &packed, count).unwrap();
        assert_eq!(unpacked.len(), count);
        for (values, ct) in originals.iter().zip(unpacked.iter()) {
            let decoded = encoder.decode(&ck.decrypt(ct));
            for (v, d) in values.iter().zip(decoded.iter()) {
                let err = Complex::with_val(prec, v - d).abs().real().to_f64();
                assert!(err < 2f64.powi(-17), "unpacked error {err}");
            }
        }
    }
}
