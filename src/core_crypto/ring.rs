//! The RNS ring: coefficient-wise arithmetic, transforms, automorphisms,
//! centered lifts, rescaling, CRT reconstruction and sampling.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use rug::ops::RemRounding;
use rug::Integer;

use super::modulus::Modulus;
use super::ntt::{bit_reverse, NttTable};
use super::poly::RnsPoly;

/// Standard deviation of the discrete gaussian error.
pub const ERROR_STD_DEV: f64 = 3.2;

/// A negacyclic ring R = Z[X]/(X^N + 1) over a Q chain and an auxiliary
/// P chain, with one NTT table per prime.
pub struct RnsRing {
    log_n: usize,
    n: usize,
    q_moduli: Vec<Modulus>,
    p_moduli: Vec<Modulus>,
    q_tables: Vec<NttTable>,
    p_tables: Vec<NttTable>,
}

impl RnsRing {
    pub fn new(log_n: usize, q_primes: &[u64], p_primes: &[u64]) -> Self {
        let q_moduli: Vec<Modulus> = q_primes.iter().map(|&q| Modulus::new(q)).collect();
        let p_moduli: Vec<Modulus> = p_primes.iter().map(|&p| Modulus::new(p)).collect();
        let q_tables = q_moduli.iter().map(|&m| NttTable::new(log_n, m)).collect();
        let p_tables = p_moduli.iter().map(|&m| NttTable::new(log_n, m)).collect();
        Self {
            log_n,
            n: 1 << log_n,
            q_moduli,
            p_moduli,
            q_tables,
            p_tables,
        }
    }

    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn log_n(&self) -> usize {
        self.log_n
    }

    #[inline]
    pub fn max_level(&self) -> usize {
        self.q_moduli.len() - 1
    }

    #[inline]
    pub fn q_moduli(&self) -> &[Modulus] {
        &self.q_moduli
    }

    #[inline]
    pub fn p_moduli(&self) -> &[Modulus] {
        &self.p_moduli
    }

    /// Modulus backing a given row of `poly`.
    #[inline]
    pub(crate) fn row_modulus(&self, poly: &RnsPoly, row: usize) -> &Modulus {
        let q_rows = poly.q_rows();
        if row < q_rows {
            &self.q_moduli[row]
        } else {
            &self.p_moduli[row - q_rows]
        }
    }

    #[inline]
    fn row_table(&self, poly: &RnsPoly, row: usize) -> &NttTable {
        let q_rows = poly.q_rows();
        if row < q_rows {
            &self.q_tables[row]
        } else {
            &self.p_tables[row - q_rows]
        }
    }

    /// Product of the Q-chain primes up to `level`, as a big integer.
    pub fn modulus_at_level(&self, level: usize) -> Integer {
        let mut q = Integer::from(1);
        for m in &self.q_moduli[..=level] {
            q *= m.value();
        }
        q
    }

    /// Product of the P-chain primes.
    pub fn p_modulus(&self) -> Integer {
        let mut p = Integer::from(1);
        for m in &self.p_moduli {
            p *= m.value();
        }
        p
    }

    // --- transforms ---

    pub fn ntt_assign(&self, poly: &mut RnsPoly) {
        debug_assert!(!poly.is_ntt);
        for row in 0..poly.rows() {
            let table = self.row_table(poly, row);
            table.forward(&mut poly.coeffs[row]);
        }
        poly.is_ntt = true;
    }

    pub fn intt_assign(&self, poly: &mut RnsPoly) {
        debug_assert!(poly.is_ntt);
        for row in 0..poly.rows() {
            let table = self.row_table(poly, row);
            table.inverse(&mut poly.coeffs[row]);
        }
        poly.is_ntt = false;
    }

    // --- coefficient-wise arithmetic (any form, forms must match) ---

    pub fn add_assign(&self, lhs: &mut RnsPoly, rhs: &RnsPoly) {
        debug_assert_eq!(lhs.rows(), rhs.rows());
        debug_assert_eq!(lhs.is_ntt, rhs.is_ntt);
        for row in 0..lhs.rows() {
            let m = *self.row_modulus(lhs, row);
            for (a, &b) in lhs.coeffs[row].iter_mut().zip(rhs.coeffs[row].iter()) {
                *a = m.add(*a, b);
            }
        }
    }

    pub fn sub_assign(&self, lhs: &mut RnsPoly, rhs: &RnsPoly) {
        debug_assert_eq!(lhs.rows(), rhs.rows());
        debug_assert_eq!(lhs.is_ntt, rhs.is_ntt);
        for row in 0..lhs.rows() {
            let m = *self.row_modulus(lhs, row);
            for (a, &b) in lhs.coeffs[row].iter_mut().zip(rhs.coeffs[row].iter()) {
                *a = m.sub(*a, b);
            }
        }
    }

    pub fn neg_assign(&self, poly: &mut RnsPoly) {
        for row in 0..poly.rows() {
            let m = *self.row_modulus(poly, row);
            for a in poly.coeffs[row].iter_mut() {
                *a = m.neg(*a);
            }
        }
    }

    // --- NTT-domain products ---

    pub fn mul_assign(&self, lhs: &mut RnsPoly, rhs: &RnsPoly) {
        debug_assert!(lhs.is_ntt && rhs.is_ntt);
        debug_assert_eq!(lhs.rows(), rhs.rows());
        for row in 0..lhs.rows() {
            let m = *self.row_modulus(lhs, row);
            for (a, &b) in lhs.coeffs[row].iter_mut().zip(rhs.coeffs[row].iter()) {
                *a = m.mul(*a, b);
            }
        }
    }

    pub fn mul(&self, lhs: &RnsPoly, rhs: &RnsPoly) -> RnsPoly {
        let mut out = lhs.clone();
        self.mul_assign(&mut out, rhs);
        out
    }

    /// acc += a * b, all three in NTT form over the same rows.
    pub fn mul_add_assign(&self, acc: &mut RnsPoly, a: &RnsPoly, b: &RnsPoly) {
        debug_assert!(acc.is_ntt && a.is_ntt && b.is_ntt);
        debug_assert_eq!(acc.rows(), a.rows());
        debug_assert_eq!(acc.rows(), b.rows());
        for row in 0..acc.rows() {
            let m = *self.row_modulus(acc, row);
            for ((c, &x), &y) in acc.coeffs[row]
                .iter_mut()
                .zip(a.coeffs[row].iter())
                .zip(b.coeffs[row].iter())
            {
                *c = m.add(*c, m.mul(x, y));
            }
        }
    }

    // --- scalar products ---

    /// poly *= scalar, the scalar being a plain non-negative integer.
    pub fn scalar_mul_assign(&self, poly: &mut RnsPoly, scalar: u64) {
        for row in 0..poly.rows() {
            let m = *self.row_modulus(poly, row);
            let s = scalar % m.value();
            let s_shoup = m.shoup(s);
            for a in poly.coeffs[row].iter_mut() {
                *a = m.mul_shoup(*a, s, s_shoup);
            }
        }
    }

    /// poly *= scalar for an arbitrary-precision signed integer scalar.
    pub fn scalar_mul_bigint_assign(&self, poly: &mut RnsPoly, scalar: &Integer) {
        for row in 0..poly.rows() {
            let m = *self.row_modulus(poly, row);
            let s = scalar
                .clone()
                .rem_euc(Integer::from(m.value()))
                .to_u64()
                .unwrap();
            let s_shoup = m.shoup(s);
            for a in poly.coeffs[row].iter_mut() {
                *a = m.mul_shoup(*a, s, s_shoup);
            }
        }
    }

    // --- automorphisms ---

    /// Coefficient-domain index/sign map of X -> X^k, phantom-style:
    /// coefficient j lands at `index[j]`, negated when `sign[j]` is false.
    pub fn automorphism_map_coeff(&self, k: u64) -> (Vec<usize>, Vec<bool>) {
        let two_n = (2 * self.n) as u64;
        debug_assert!(k % 2 == 1);
        let mut index = vec![0usize; self.n];
        let mut sign = vec![true; self.n];
        for j in 0..self.n {
            let t = (j as u64 * k) % two_n;
            if t < self.n as u64 {
                index[j] = t as usize;
            } else {
                index[j] = (t - self.n as u64) as usize;
                sign[j] = false;
            }
        }
        (index, sign)
    }

    /// NTT-domain permutation of X -> X^k: output slot i reads input slot
    /// `perm[i]`. Valid because the automorphism permutes the odd powers of
    /// the 2N-th root the transform evaluates at.
    pub fn automorphism_map_ntt(&self, k: u64) -> Vec<usize> {
        let two_n = (2 * self.n) as u64;
        debug_assert!(k % 2 == 1);
        let mut perm = vec![0usize; self.n];
        for i in 0..self.n {
            let j = bit_reverse(i, self.log_n) as u64;
            let jp = ((k * (2 * j + 1)) % two_n - 1) / 2;
            perm[i] = bit_reverse(jp as usize, self.log_n);
        }
        perm
    }

    /// Applies X -> X^k to `poly`, in whichever form it is in.
    pub fn automorphism(&self, poly: &RnsPoly, k: u64) -> RnsPoly {
        let mut out = poly.clone();
        if poly.is_ntt {
            let perm = self.automorphism_map_ntt(k);
            for row in 0..poly.rows() {
                for i in 0..self.n {
                    out.coeffs[row][i] = poly.coeffs[row][perm[i]];
                }
            }
        } else {
            let (index, sign) = self.automorphism_map_coeff(k);
            for row in 0..poly.rows() {
                let m = *self.row_modulus(poly, row);
                for j in 0..self.n {
                    let v = poly.coeffs[row][j];
                    out.coeffs[row][index[j]] = if sign[j] { v } else { m.neg(v) };
                }
            }
        }
        out
    }

    /// poly *= X^exp with exp taken mod 2N (coefficient domain).
    pub fn monomial_mul_assign(&self, poly: &mut RnsPoly, exp: u64) {
        debug_assert!(!poly.is_ntt);
        let two_n = (2 * self.n) as u64;
        let exp = (exp % two_n) as usize;
        let (rot, flip) = if exp >= self.n {
            (exp - self.n, true)
        } else {
            (exp, false)
        };
        for row in 0..poly.rows() {
            let m = *self.row_modulus(poly, row);
            let src = poly.coeffs[row].clone();
            for (j, &v) in src.iter().enumerate() {
                let mut to = j + rot;
                // negacyclic wrap
                let mut neg = flip;
                if to >= self.n {
                    to -= self.n;
                    neg = !neg;
                }
                poly.coeffs[row][to] = if neg { m.neg(v) } else { v };
            }
        }
    }

    // --- lifts, rescaling, CRT ---

    /// Centered lift of the level-0 residue onto rows 1..=target_level: each
    /// coefficient is read as a signed value in (-q0/2, q0/2] and reduced
    /// modulo every added prime. This is the modulus-raising kernel.
    pub fn mod_up_assign(&self, poly: &mut RnsPoly, target_level: usize) {
        debug_assert!(!poly.is_ntt);
        debug_assert_eq!(poly.rows(), 1);
        debug_assert_eq!(poly.special_rows, 0);
        let q0 = self.q_moduli[0];
        let base = poly.coeffs[0].clone();
        for row in 1..=target_level {
            let m = self.q_moduli[row];
            let lifted: Vec<u64> = base.iter().map(|&c| m.reduce_i64(q0.center(c))).collect();
            poly.coeffs.push(lifted);
        }
    }

    /// Divides an NTT-form polynomial by its top Q-chain prime and drops the
    /// row: c_j <- (c_j - [c]_{q_top}) * q_top^{-1} mod q_j. Exact up to the
    /// rounding term of one.
    pub fn rescale_assign(&self, poly: &mut RnsPoly) {
        debug_assert!(poly.is_ntt);
        debug_assert_eq!(poly.special_rows, 0);
        debug_assert!(poly.rows() >= 2);
        let top = poly.rows() - 1;
        let q_top = self.q_moduli[top];
        let mut top_coeffs = poly.coeffs.pop().unwrap();
        self.q_tables[top].inverse(&mut top_coeffs);
        for row in 0..top {
            let m = self.q_moduli[row];
            let inv = m.inv(q_top.value() % m.value());
            let inv_shoup = m.shoup(inv);
            let mut lifted: Vec<u64> = top_coeffs
                .iter()
                .map(|&c| m.reduce_i64(q_top.center(c)))
                .collect();
            self.q_tables[row].forward(&mut lifted);
            for (a, &l) in poly.coeffs[row].iter_mut().zip(lifted.iter()) {
                *a = m.mul_shoup(m.sub(*a, l), inv, inv_shoup);
            }
        }
    }

    /// Divides an NTT-form polynomial by the whole P chain, dropping the
    /// special rows one prime at a time.
    pub fn mod_down_assign(&self, poly: &mut RnsPoly) {
        debug_assert!(poly.is_ntt);
        while poly.special_rows > 0 {
            let top = poly.rows() - 1;
            let p = *self.row_modulus(poly, top);
            let table = self.row_table(poly, top);
            let mut top_coeffs = poly.coeffs.pop().unwrap();
            poly.special_rows -= 1;
            table.inverse(&mut top_coeffs);
            for row in 0..top {
                let m = *self.row_modulus(poly, row);
                let inv = m.inv(p.value() % m.value());
                let inv_shoup = m.shoup(inv);
                let mut lifted: Vec<u64> = top_coeffs
                    .iter()
                    .map(|&c| m.reduce_i64(p.center(c)))
                    .collect();
                self.row_table(poly, row).forward(&mut lifted);
                for (a, &l) in poly.coeffs[row].iter_mut().zip(lifted.iter()) {
                    *a = m.mul_shoup(m.sub(*a, l), inv, inv_shoup);
                }
            }
        }
    }

    /// CRT reconstruction of a coefficient-form polynomial into centered big
    /// integers modulo the level's Q product.
    pub fn to_bigint(&self, poly: &RnsPoly) -> Vec<Integer> {
        debug_assert!(!poly.is_ntt);
        debug_assert_eq!(poly.special_rows, 0);
        let level = poly.level();
        let q = self.modulus_at_level(level);
        let half_q = Integer::from(&q >> 1u32);
        let mut terms = Vec::with_capacity(level + 1);
        for row in 0..=level {
            let m = self.q_moduli[row];
            let q_hat = Integer::from(&q / m.value());
            let q_hat_inv = q_hat
                .clone()
                .rem_euc(Integer::from(m.value()))
                .to_u64()
                .map(|r| m.inv(r))
                .unwrap();
            terms.push((row, q_hat, q_hat_inv, m));
        }
        (0..self.n)
            .map(|j| {
                let mut acc = Integer::new();
                for (row, q_hat, q_hat_inv, m) in &terms {
                    let t = m.mul(poly.coeffs[*row][j], *q_hat_inv);
                    acc += Integer::from(q_hat * t);
                }
                acc = acc.rem_euc(&q);
                if acc > half_q {
                    acc -= &q;
                }
                acc
            })
            .collect()
    }

    /// Inverse of [`Self::to_bigint`]: reduces big-integer coefficients onto
    /// the chain at `level`, producing a coefficient-form polynomial.
    pub fn from_bigint(&self, coeffs: &[Integer], level: usize) -> RnsPoly {
        debug_assert_eq!(coeffs.len(), self.n);
        let mut poly = RnsPoly::zero(self.n, level + 1, 0);
        for row in 0..=level {
            let m = self.q_moduli[row];
            let q = Integer::from(m.value());
            for (j, c) in coeffs.iter().enumerate() {
                poly.coeffs[row][j] = c.clone().rem_euc(&q).to_u64().unwrap();
            }
        }
        poly
    }

    // --- sampling ---

    /// Uniform polynomial over the given rows, in NTT form (a uniform vector
    /// is uniform in either domain).
    pub fn sample_uniform<R: Rng>(&self, q_rows: usize, special_rows: usize, rng: &mut R) -> RnsPoly {
        let mut poly = RnsPoly::zero(self.n, q_rows, special_rows);
        for row in 0..poly.rows() {
            let m = *self.row_modulus(&poly, row);
            for a in poly.coeffs[row].iter_mut() {
                *a = rng.gen_range(0..m.value());
            }
        }
        poly.is_ntt = true;
        poly
    }

    /// Ternary secret coefficients; with `hamming_weight` set, exactly that
    /// many nonzero entries, otherwise density 2/3.
    pub fn sample_ternary_coeffs<R: Rng>(
        &self,
        hamming_weight: Option<usize>,
        rng: &mut R,
    ) -> Vec<i64> {
        let mut coeffs = vec![0i64; self.n];
        match hamming_weight {
            Some(h) => {
                debug_assert!(h <= self.n);
                let mut placed = 0;
                while placed < h {
                    let idx = rng.gen_range(0..self.n);
                    if coeffs[idx] == 0 {
                        coeffs[idx] = if rng.gen::<bool>() { 1 } else { -1 };
                        placed += 1;
                    }
                }
            }
            None => {
                for c in coeffs.iter_mut() {
                    *c = rng.gen_range(-1i64..=1);
                }
            }
        }
        coeffs
    }

    /// Discrete gaussian error coefficients.
    pub fn sample_gaussian_coeffs<R: Rng>(&self, rng: &mut R) -> Vec<i64> {
        let normal = Normal::new(0.0, ERROR_STD_DEV).unwrap();
        (0..self.n).map(|_| normal.sample(rng).round() as i64).collect()
    }

    /// Embeds signed coefficients into an RNS polynomial over the given rows,
    /// coefficient form.
    pub fn poly_from_signed(&self, coeffs: &[i64], q_rows: usize, special_rows: usize) -> RnsPoly {
        debug_assert_eq!(coeffs.len(), self.n);
        let mut poly = RnsPoly::zero(self.n, q_rows, special_rows);
        for row in 0..poly.rows() {
            let m = *self.row_modulus(&poly, row);
            for (a, &c) in poly.coeffs[row].iter_mut().zip(coeffs.iter()) {
                *a = m.reduce_i64(c);
            }
        }
        poly
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rug::Integer;

    use super::super::modulus::generate_ntt_primes;
    use super::*;

    fn test_ring() -> RnsRing {
        let log_n = 5;
        let q = generate_ntt_primes(log_n, &[50, 40, 40]).unwrap();
        let p = generate_ntt_primes(log_n, &[51]).unwrap();
        RnsRing::new(log_n, &q, &p)
    }

    #[test]
    fn bigint_roundtrip_is_exact() {
        let ring = test_ring();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let coeffs: Vec<i64> = (0..ring.n()).map(|_| rng.gen_range(-1000000i64..1000000)).collect();
        let poly = ring.poly_from_signed(&coeffs, 3, 0);
        let big = ring.to_bigint(&poly);
        for (c, b) in coeffs.iter().zip(big.iter()) {
            assert_eq!(Integer::from(*c), *b);
        }
        let back = ring.from_bigint(&big, 2);
        assert_eq!(back, poly);
    }

    #[test]
    fn automorphism_ntt_matches_coefficient_domain() {
        let ring = test_ring();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut poly = ring.sample_uniform(3, 0, &mut rng);
        poly.is_ntt = false; // treat the uniform data as coefficients

        // coefficient-domain automorphism, then NTT
        let k = 5u64;
        let mut expected = ring.automorphism(&poly, k);
        ring.ntt_assign(&mut expected);

        // NTT, then NTT-domain automorphism
        let mut ntt = poly.clone();
        ring.ntt_assign(&mut ntt);
        let got = ring.automorphism(&ntt, k);
        assert_eq!(got, expected);
    }

    #[test]
    fn rescale_divides_by_top_prime() {
        let ring = test_ring();
        let q_top = ring.q_moduli()[2].value();
        // constant polynomial v = q_top * 12345 rescales to exactly 12345
        let v = Integer::from(q_top) * 12345u64;
        let mut coeffs = vec![Integer::new(); ring.n()];
        coeffs[0] = v;
        let mut poly = ring.from_bigint(&coeffs, 2);
        ring.ntt_assign(&mut poly);
        ring.rescale_assign(&mut poly);
        ring.intt_assign(&mut poly);
        let big = ring.to_bigint(&poly);
        assert_eq!(big[0], Integer::from(12345));
        assert!(big[1..].iter().all(|c| c.significant_bits() == 0));
    }

    #[test]
    fn mod_up_preserves_centered_value() {
        let ring = test_ring();
        let q0 = ring.q_moduli()[0];
        let mut poly = RnsPoly::zero(ring.n(), 1, 0);
        // a negative value: q0 - 9 represents -9
        poly.coeffs[0][3] = q0.value() - 9;
        ring.mod_up_assign(&mut poly, 2);
        let big = ring.to_bigint(&poly);
        assert_eq!(big[3], Integer::from(-9));
    }

    #[test]
    fn monomial_multiplication_wraps_negacyclically() {
        let ring = test_ring();
        let mut coeffs = vec![0i64; ring.n()];
        coeffs[ring.n() - 1] = 3;
        let mut poly = ring.poly_from_signed(&coeffs, 1, 0);
        ring.monomial_mul_assign(&mut poly, 1);
        // X^(n-1) * X = X^n = -1
        let big = ring.to_bigint(&poly);
        assert_eq!(big[0], Integer::from(-3));
    }
}
