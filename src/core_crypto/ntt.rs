//! Negacyclic number-theoretic transform over a single prime.
//!
//! Twiddle factors are stored in bit-reversed order with their Shoup
//! companions, so both directions run without a single division. The
//! transform evaluates a polynomial at the odd powers of a primitive 2N-th
//! root of unity; outputs are in bit-reversed evaluation order, which all
//! callers in this crate treat as opaque.

use super::modulus::Modulus;

pub(crate) fn bit_reverse(x: usize, bits: usize) -> usize {
    x.reverse_bits() >> (usize::BITS as usize - bits)
}

/// Precomputed transform tables for one prime of the chain.
pub struct NttTable {
    modulus: Modulus,
    log_n: usize,
    n: usize,
    psi_rev: Vec<u64>,
    psi_rev_shoup: Vec<u64>,
    psi_inv_rev: Vec<u64>,
    psi_inv_rev_shoup: Vec<u64>,
    n_inv: u64,
    n_inv_shoup: u64,
}

impl NttTable {
    pub fn new(log_n: usize, modulus: Modulus) -> Self {
        let n = 1usize << log_n;
        let psi = modulus.primitive_root_2n(log_n);
        let psi_inv = modulus.inv(psi);

        let mut psi_rev = vec![0u64; n];
        let mut psi_inv_rev = vec![0u64; n];
        let mut power = 1u64;
        let mut power_inv = 1u64;
        for i in 0..n {
            let r = bit_reverse(i, log_n);
            psi_rev[r] = power;
            psi_inv_rev[r] = power_inv;
            power = modulus.mul(power, psi);
            power_inv = modulus.mul(power_inv, psi_inv);
        }
        let psi_rev_shoup = psi_rev.iter().map(|&w| modulus.shoup(w)).collect();
        let psi_inv_rev_shoup = psi_inv_rev.iter().map(|&w| modulus.shoup(w)).collect();
        let n_inv = modulus.inv(n as u64);

        Self {
            modulus,
            log_n,
            n,
            psi_rev,
            psi_rev_shoup,
            psi_inv_rev,
            psi_inv_rev_shoup,
            n_inv,
            n_inv_shoup: modulus.shoup(n_inv),
        }
    }

    pub fn modulus(&self) -> &Modulus {
        &self.modulus
    }

    pub fn log_n(&self) -> usize {
        self.log_n
    }

    /// In-place forward transform (Cooley-Tukey, decimation in time).
    pub fn forward(&self, a: &mut [u64]) {
        debug_assert_eq!(a.len(), self.n);
        let q = &self.modulus;
        let mut t = self.n;
        let mut m = 1;
        while m < self.n {
            t >>= 1;
            for i in 0..m {
                let j1 = 2 * i * t;
                let w = self.psi_rev[m + i];
                let w_shoup = self.psi_rev_shoup[m + i];
                for j in j1..j1 + t {
                    let u = a[j];
                    let v = q.mul_shoup(a[j + t], w, w_shoup);
                    a[j] = q.add(u, v);
                    a[j + t] = q.sub(u, v);
                }
            }
            m <<= 1;
        }
    }

    /// In-place inverse transform (Gentleman-Sande, decimation in frequency).
    pub fn inverse(&self, a: &mut [u64]) {
        debug_assert_eq!(a.len(), self.n);
        let q = &self.modulus;
        let mut t = 1;
        let mut m = self.n;
        while m > 1 {
            let h = m >> 1;
            let mut j1 = 0;
            for i in 0..h {
                let w = self.psi_inv_rev[h + i];
                let w_shoup = self.psi_inv_rev_shoup[h + i];
                for j in j1..j1 + t {
                    let u = a[j];
                    let v = a[j + t];
                    a[j] = q.add(u, v);
                    a[j + t] = q.mul_shoup(q.sub(u, v), w, w_shoup);
                }
                j1 += 2 * t;
            }
            t <<= 1;
            m = h;
        }
        for x in a.iter_mut() {
            *x = q.mul_shoup(*x, self.n_inv, self.n_inv_shoup);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::modulus::generate_ntt_primes;
    use super::*;

    fn schoolbook_negacyclic(a: &[u64], b: &[u64], q: &Modulus) -> Vec<u64> {
        let n = a.len();
        let mut out = vec![0u64; n];
        for i in 0..n {
            for j in 0..n {
                let prod = q.mul(a[i], b[j]);
                if i + j < n {
                    out[i + j] = q.add(out[i + j], prod);
                } else {
                    out[i + j - n] = q.sub(out[i + j - n], prod);
                }
            }
        }
        out
    }

    #[test]
    fn forward_inverse_roundtrip() {
        let log_n = 6;
        let q = Modulus::new(generate_ntt_primes(log_n, &[40]).unwrap()[0]);
        let table = NttTable::new(log_n, q);
        let original: Vec<u64> = (0..1u64 << log_n).map(|i| (i * 17 + 3) % q.value()).collect();
        let mut a = original.clone();
        table.forward(&mut a);
        assert_ne!(a, original);
        table.inverse(&mut a);
        assert_eq!(a, original);
    }

    #[test]
    fn pointwise_product_matches_schoolbook() {
        let log_n = 5;
        let q = Modulus::new(generate_ntt_primes(log_n, &[40]).unwrap()[0]);
        let table = NttTable::new(log_n, q);
        let n = 1usize << log_n;
        let a: Vec<u64> = (0..n as u64).map(|i| (i * i + 1) % q.value()).collect();
        let b: Vec<u64> = (0..n as u64).map(|i| (i * 31 + 7) % q.value()).collect();
        let expected = schoolbook_negacyclic(&a, &b, &q);

        let mut fa = a.clone();
        let mut fb = b.clone();
        table.forward(&mut fa);
        table.forward(&mut fb);
        let mut fc: Vec<u64> = fa.iter().zip(&fb).map(|(&x, &y)| q.mul(x, y)).collect();
        table.inverse(&mut fc);
        assert_eq!(fc, expected);
    }
}
