//! RLWE secrets and the gadget-decomposed key-switching primitive.
//!
//! Key-switching uses the RNS-digit gadget with the auxiliary P chain: each
//! digit of the chain gets one key pair over Q·P, the input polynomial is
//! decomposed into centered per-prime digits lifted to the full chain, and
//! the accumulated product is divided back down by P. The decomposition is
//! exposed on its own so rotation sets can reuse it (hoisting).

use rand::Rng;
use rug::ops::RemRounding;
use rug::Integer;

use super::poly::RnsPoly;
use super::ring::RnsRing;

/// A ternary RLWE secret, kept both as signed coefficients (for deriving
/// automorphism images and ring embeddings) and as an NTT-form polynomial
/// over the full Q·P chain.
pub struct RlweSecretKey {
    pub(crate) coeffs: Vec<i64>,
    pub(crate) poly: RnsPoly,
}

impl RlweSecretKey {
    pub fn generate<R: Rng>(ring: &RnsRing, hamming_weight: Option<usize>, rng: &mut R) -> Self {
        let coeffs = ring.sample_ternary_coeffs(hamming_weight, rng);
        Self::from_coeffs(ring, coeffs)
    }

    pub fn from_coeffs(ring: &RnsRing, coeffs: Vec<i64>) -> Self {
        let mut poly = ring.poly_from_signed(&coeffs, ring.max_level() + 1, ring.p_moduli().len());
        ring.ntt_assign(&mut poly);
        Self { coeffs, poly }
    }

    /// The image of the secret under X -> X^k, as a full-chain NTT polynomial.
    pub fn automorphism_image(&self, ring: &RnsRing, k: u64) -> RnsPoly {
        let (index, sign) = ring.automorphism_map_coeff(k);
        let mut coeffs = vec![0i64; ring.n()];
        for (j, &c) in self.coeffs.iter().enumerate() {
            coeffs[index[j]] = if sign[j] { c } else { -c };
        }
        let mut poly = ring.poly_from_signed(&coeffs, ring.max_level() + 1, ring.p_moduli().len());
        ring.ntt_assign(&mut poly);
        poly
    }

    /// The square of the secret, for relinearization keys.
    pub fn square(&self, ring: &RnsRing) -> RnsPoly {
        ring.mul(&self.poly, &self.poly)
    }
}

/// A key switching an input secret to `s_out`, one key pair per Q digit.
pub struct KeySwitchKey {
    pub(crate) digits: Vec<(RnsPoly, RnsPoly)>,
}

impl KeySwitchKey {
    /// Generates the key switching `s_in` (full-chain NTT polynomial) to
    /// `s_out`. Digit i encrypts `P * (Q/q_i) * [(Q/q_i)^-1]_{q_i} * s_in`.
    pub fn generate<R: Rng>(
        ring: &RnsRing,
        s_in: &RnsPoly,
        s_out: &RlweSecretKey,
        rng: &mut R,
    ) -> Self {
        let q_count = ring.max_level() + 1;
        let p_count = ring.p_moduli().len();
        let q_total = ring.modulus_at_level(ring.max_level());
        let p_total = ring.p_modulus();

        let mut digits = Vec::with_capacity(q_count);
        for i in 0..q_count {
            let q_i = ring.q_moduli()[i];
            let q_hat = Integer::from(&q_total / q_i.value());
            let q_hat_inv = q_hat
                .clone()
                .rem_euc(Integer::from(q_i.value()))
                .to_u64()
                .map(|r| q_i.inv(r))
                .unwrap();
            let gadget = Integer::from(&q_hat * q_hat_inv) * &p_total;

            let a = ring.sample_uniform(q_count, p_count, rng);
            let mut b = ring.poly_from_signed(&ring.sample_gaussian_coeffs(rng), q_count, p_count);
            ring.ntt_assign(&mut b);
            let mut gs = s_in.clone();
            ring.scalar_mul_bigint_assign(&mut gs, &gadget);
            ring.add_assign(&mut b, &gs);
            let a_s = ring.mul(&a, &s_out.poly);
            ring.sub_assign(&mut b, &a_s);
            digits.push((b, a));
        }
        Self { digits }
    }
}

/// The reusable half of a key switch: per-digit centered lifts of the input
/// polynomial onto the extended chain, in NTT form.
pub struct HoistedDecomposition {
    pub(crate) digits: Vec<RnsPoly>,
    pub(crate) level: usize,
}

/// Decomposes an NTT-form level-`l` polynomial into its `l + 1` gadget
/// digits. Performed once per ciphertext and shared by every rotation that
/// follows.
pub fn hoisted_decompose(ring: &RnsRing, poly: &RnsPoly) -> HoistedDecomposition {
    debug_assert!(poly.is_ntt());
    debug_assert_eq!(poly.special_rows, 0);
    let level = poly.level();
    let p_count = ring.p_moduli().len();
    let mut coeff = poly.clone();
    ring.intt_assign(&mut coeff);

    let digits = (0..=level)
        .map(|i| {
            let q_i = ring.q_moduli()[i];
            let base = &coeff.coeffs[i];
            let mut digit = RnsPoly::zero(ring.n(), level + 1, p_count);
            for row in 0..digit.rows() {
                let m = *ring.row_modulus(&digit, row);
                for (dst, &c) in digit.coeffs[row].iter_mut().zip(base.iter()) {
                    *dst = m.reduce_i64(q_i.center(c));
                }
            }
            ring.ntt_assign(&mut digit);
            digit
        })
        .collect();

    HoistedDecomposition { digits, level }
}

/// Permutes a decomposition under X -> X^k (NTT-domain), so one
/// decomposition serves every rotation of a hoisted set.
pub fn automorphism_decomposition(
    ring: &RnsRing,
    decomp: &HoistedDecomposition,
    k: u64,
) -> HoistedDecomposition {
    HoistedDecomposition {
        digits: decomp.digits.iter().map(|d| ring.automorphism(d, k)).collect(),
        level: decomp.level,
    }
}

/// Gadget product of a decomposition with a key, followed by the division
/// by P. Returns the (b, a) halves at the decomposition's level.
pub fn gadget_product(
    ring: &RnsRing,
    decomp: &HoistedDecomposition,
    key: &KeySwitchKey,
) -> (RnsPoly, RnsPoly) {
    let level = decomp.level;
    let p_count = ring.p_moduli().len();
    let q_count = ring.max_level() + 1;

    let mut acc0 = RnsPoly::zero(ring.n(), level + 1, p_count);
    let mut acc1 = RnsPoly::zero(ring.n(), level + 1, p_count);
    acc0.is_ntt = true;
    acc1.is_ntt = true;

    for (i, digit) in decomp.digits.iter().enumerate() {
        let (b, a) = &key.digits[i];
        // acc rows 0..=level map to key rows 0..=level; special rows map to
        // the key's special rows at the top of the full chain.
        for row in 0..acc0.rows() {
            let key_row = if row <= level { row } else { q_count + (row - level - 1) };
            let m = *ring.row_modulus(&acc0, row);
            for j in 0..ring.n() {
                let d = digit.coeffs[row][j];
                acc0.coeffs[row][j] = m.add(acc0.coeffs[row][j], m.mul(d, b.coeffs[key_row][j]));
                acc1.coeffs[row][j] = m.add(acc1.coeffs[row][j], m.mul(d, a.coeffs[key_row][j]));
            }
        }
    }

    ring.mod_down_assign(&mut acc0);
    ring.mod_down_assign(&mut acc1);
    (acc0, acc1)
}

/// Full key switch of an NTT-form polynomial.
pub fn key_switch(ring: &RnsRing, poly: &RnsPoly, key: &KeySwitchKey) -> (RnsPoly, RnsPoly) {
    let decomp = hoisted_decompose(ring, poly);
    gadget_product(ring, &decomp, key)
}

/// Restricts a full-chain polynomial to the first `q_rows` Q rows (for
/// multiplying ciphertext components by key material at lower levels).
pub fn truncated(poly: &RnsPoly, q_rows: usize) -> RnsPoly {
    let mut out = poly.clone();
    out.coeffs.truncate(q_rows);
    out.special_rows = 0;
    out
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::super::modulus::generate_ntt_primes;
    use super::*;

    fn test_ring() -> RnsRing {
        let log_n = 6;
        let q = generate_ntt_primes(log_n, &[50, 40, 40]).unwrap();
        let p = generate_ntt_primes(log_n, &[51]).unwrap();
        RnsRing::new(log_n, &q, &p)
    }

    #[test]
    fn key_switch_preserves_phase() {
        let ring = test_ring();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let s_in = RlweSecretKey::generate(&ring, None, &mut rng);
        let s_out = RlweSecretKey::generate(&ring, None, &mut rng);
        let key = KeySwitchKey::generate(&ring, &s_in.poly, &s_out, &mut rng);

        let c = ring.sample_uniform(3, 0, &mut rng);
        let (d0, d1) = key_switch(&ring, &c, &key);

        // d0 + d1 * s_out should equal c * s_in up to key-switching noise
        let mut got = d0.clone();
        let d1_s = ring.mul(&d1, &truncated(&s_out.poly, 3));
        ring.add_assign(&mut got, &d1_s);
        let expected = ring.mul(&c, &truncated(&s_in.poly, 3));
        let mut diff = got;
        ring.sub_assign(&mut diff, &expected);
        ring.intt_assign(&mut diff);
        for coeff in ring.to_bigint(&diff) {
            assert!(
                coeff.clone().abs() < (rug::Integer::from(1) << 30u32),
                "noise too large: {coeff}"
            );
        }
    }

    #[test]
    fn hoisted_rotation_matches_direct_rotation() {
        let ring = test_ring();
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let s = RlweSecretKey::generate(&ring, None, &mut rng);
        let k = 5u64;
        let s_k = s.automorphism_image(&ring, k);
        let key = KeySwitchKey::generate(&ring, &s_k, &s, &mut rng);

        let c = ring.sample_uniform(3, 0, &mut rng);

        // direct: rotate first, then decompose
        let c_rot = ring.automorphism(&c, k);
        let direct = key_switch(&ring, &c_rot, &key);

        // hoisted: decompose once, permute the digits
        let decomp = hoisted_decompose(&ring, &c);
        let rotated = automorphism_decomposition(&ring, &decomp, k);
        let hoisted = gadget_product(&ring, &rotated, &key);

        // both are valid switches of the same rotated polynomial; their
        // phases under s must agree up to noise
        let phase = |pair: &(RnsPoly, RnsPoly)| {
            let mut ph = pair.0.clone();
            let cs = ring.mul(&pair.1, &truncated(&s.poly, 3));
            ring.add_assign(&mut ph, &cs);
            ph
        };
        let mut diff = phase(&direct);
        let hp = phase(&hoisted);
        ring.sub_assign(&mut diff, &hp);
        ring.intt_assign(&mut diff);
        for coeff in ring.to_bigint(&diff) {
            assert!(coeff.clone().abs() < (rug::Integer::from(1) << 30u32));
        }
    }
}
