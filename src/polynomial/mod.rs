//! Polynomials and their homomorphic evaluation.
//!
//! Supports the monomial and Chebyshev bases, vectors of polynomials with a
//! slot-index mapping, and Paterson-Stockmeyer scheduling where every
//! coefficient is pre-scaled so the output lands exactly on the requested
//! scale. The scheduling decisions live here; [`simulator`] replays them on
//! (level, scale) pairs and [`evaluator`] runs them on ciphertexts.

pub mod evaluator;
pub mod simulator;

use std::collections::HashMap;

use rug::Complex;

use crate::error::{Error, Result};

pub use evaluator::{PolynomialEvaluator, PowerBasis};

/// The basis a polynomial's coefficients are expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Basis {
    Monomial,
    Chebyshev,
}

/// A polynomial with arbitrary-precision complex coefficients.
///
/// For the Chebyshev basis the interval records the domain the caller's
/// change of basis maps onto [-1, 1]; the evaluator computes the affine map
/// on request but never applies it.
#[derive(Clone, Debug)]
pub struct Polynomial {
    pub coeffs: Vec<Complex>,
    pub basis: Basis,
    pub interval: (f64, f64),
}

impl Polynomial {
    pub fn monomial(coeffs: Vec<Complex>) -> Self {
        Self {
            coeffs,
            basis: Basis::Monomial,
            interval: (-1.0, 1.0),
        }
    }

    pub fn chebyshev(coeffs: Vec<Complex>, interval: (f64, f64)) -> Self {
        Self {
            coeffs,
            basis: Basis::Chebyshev,
            interval,
        }
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    /// Number of rescales a Paterson-Stockmeyer evaluation consumes.
    pub fn depth(&self) -> usize {
        usize::BITS as usize - self.degree().leading_zeros() as usize
    }

    /// The affine change of basis y = scalar * x + constant mapping this
    /// polynomial's interval onto [-1, 1]. The caller applies it before
    /// evaluation; Chebyshev evaluation assumes inputs already mapped.
    pub fn change_of_basis(&self, prec: u32) -> (Complex, Complex) {
        let (a, b) = self.interval;
        match self.basis {
            Basis::Monomial => (
                Complex::with_val(prec, (1.0, 0.0)),
                Complex::with_val(prec, (0.0, 0.0)),
            ),
            Basis::Chebyshev => (
                Complex::with_val(prec, (2.0 / (b - a), 0.0)),
                Complex::with_val(prec, (-(a + b) / (b - a), 0.0)),
            ),
        }
    }
}

/// A vector of polynomials with a mapping from polynomial index to the slot
/// indices it is evaluated in. Slots not named by any polynomial evaluate
/// to zero.
#[derive(Clone, Debug)]
pub struct PolynomialVector {
    pub polys: Vec<Polynomial>,
    pub mapping: HashMap<usize, Vec<usize>>,
}

impl PolynomialVector {
    /// Builds a vector, rejecting slot indices mapped by more than one
    /// polynomial. All polynomials must share basis and interval.
    pub fn new(polys: Vec<Polynomial>, mapping: HashMap<usize, Vec<usize>>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for slots in mapping.values() {
            for &s in slots {
                if !seen.insert(s) {
                    return Err(Error::DuplicateSlotIndex(s));
                }
            }
        }
        debug_assert!(polys
            .windows(2)
            .all(|w| w[0].basis == w[1].basis && w[0].interval == w[1].interval));
        Ok(Self { polys, mapping })
    }

    pub fn basis(&self) -> Basis {
        self.polys[0].basis
    }

    pub fn interval(&self) -> (f64, f64) {
        self.polys[0].interval
    }

    pub fn degree(&self) -> usize {
        self.polys.iter().map(Polynomial::degree).max().unwrap_or(0)
    }

    pub fn depth(&self) -> usize {
        usize::BITS as usize - self.degree().leading_zeros() as usize
    }

    /// Per-slot (scalar, constant) change-of-basis pairs; unmapped slots
    /// receive zero pairs.
    pub fn change_of_basis(&self, slots: usize, prec: u32) -> (Vec<Complex>, Vec<Complex>) {
        let zero = Complex::with_val(prec, (0.0, 0.0));
        let mut scalars = vec![zero.clone(); slots];
        let mut constants = vec![zero; slots];
        for (poly_idx, slot_list) in &self.mapping {
            let (s, c) = self.polys[*poly_idx].change_of_basis(prec);
            for &slot in slot_list {
                scalars[slot] = s.clone();
                constants[slot] = c.clone();
            }
        }
        (scalars, constants)
    }

    /// The coefficient of X^i (or T_i) as a slot vector.
    pub(crate) fn coeff_slots(&self, i: usize, slots: usize, prec: u32) -> Vec<Complex> {
        let zero = Complex::with_val(prec, (0.0, 0.0));
        let mut out = vec![zero; slots];
        for (poly_idx, slot_list) in &self.mapping {
            if let Some(c) = self.polys[*poly_idx].coeffs.get(i) {
                for &slot in slot_list {
                    out[slot] = c.clone();
                }
            }
        }
        out
    }

    pub(crate) fn coeff_is_zero(&self, i: usize) -> bool {
        self.polys
            .iter()
            .all(|p| p.coeffs.get(i).map_or(true, complex_is_zero))
    }
}

/// Either a single polynomial applied to every slot or a slot-mapped vector.
#[derive(Clone, Debug)]
pub enum PolynomialInput {
    Scalar(Polynomial),
    Vector(PolynomialVector),
}

impl PolynomialInput {
    pub fn basis(&self) -> Basis {
        match self {
            PolynomialInput::Scalar(p) => p.basis,
            PolynomialInput::Vector(v) => v.basis(),
        }
    }

    pub fn degree(&self) -> usize {
        match self {
            PolynomialInput::Scalar(p) => p.degree(),
            PolynomialInput::Vector(v) => v.degree(),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            PolynomialInput::Scalar(p) => p.depth(),
            PolynomialInput::Vector(v) => v.depth(),
        }
    }

    pub(crate) fn coeff_is_zero(&self, i: usize) -> bool {
        match self {
            PolynomialInput::Scalar(p) => p.coeffs.get(i).map_or(true, complex_is_zero),
            PolynomialInput::Vector(v) => v.coeff_is_zero(i),
        }
    }

    /// Splits off the part above T_m (or X^m): p = r + T_m * q. In the
    /// Chebyshev basis the product identity folds reflected terms back into
    /// r and doubles q's coefficients.
    pub(crate) fn split_at(&self, m: usize, prec: u32) -> (PolynomialInput, PolynomialInput) {
        match self {
            PolynomialInput::Scalar(p) => {
                let (r, q) = split_poly(p, m, prec);
                (PolynomialInput::Scalar(r), PolynomialInput::Scalar(q))
            }
            PolynomialInput::Vector(v) => {
                let mut rs = Vec::with_capacity(v.polys.len());
                let mut qs = Vec::with_capacity(v.polys.len());
                for p in &v.polys {
                    let (r, q) = split_poly(p, m, prec);
                    rs.push(r);
                    qs.push(q);
                }
                (
                    PolynomialInput::Vector(PolynomialVector {
                        polys: rs,
                        mapping: v.mapping.clone(),
                    }),
                    PolynomialInput::Vector(PolynomialVector {
                        polys: qs,
                        mapping: v.mapping.clone(),
                    }),
                )
            }
        }
    }
}

/// p = r + B_m * q for basis element B_m; r keeps degrees below m. A
/// polynomial already below the split point (a short member of a vector)
/// keeps everything in r.
fn split_poly(p: &Polynomial, m: usize, prec: u32) -> (Polynomial, Polynomial) {
    let deg = p.degree();
    let zero = Complex::with_val(prec, (0.0, 0.0));
    if deg < m {
        return (
            p.clone(),
            Polynomial {
                coeffs: vec![zero],
                basis: p.basis,
                interval: p.interval,
            },
        );
    }
    debug_assert!(deg < 2 * m);

    let mut r_coeffs: Vec<Complex> = p.coeffs.iter().take(m).cloned().collect();
    r_coeffs.resize(m, zero.clone());
    let mut q_coeffs = vec![zero; deg - m + 1];

    match p.basis {
        Basis::Monomial => {
            for j in 0..=deg - m {
                q_coeffs[j] = p.coeffs[m + j].clone();
            }
        }
        Basis::Chebyshev => {
            // T_{m+j} = 2 T_m T_j - T_{m-j}
            q_coeffs[0] = p.coeffs[m].clone();
            for j in 1..=deg - m {
                q_coeffs[j] = Complex::with_val(prec, &p.coeffs[m + j] * 2u32);
                let folded = Complex::with_val(prec, &r_coeffs[m - j] - &p.coeffs[m + j]);
                r_coeffs[m - j] = folded;
            }
        }
    }

    // drop trailing zeros of r so its degree is tight
    while r_coeffs.len() > 1 && r_coeffs.last().map_or(false, complex_is_zero) {
        r_coeffs.pop();
    }

    (
        Polynomial {
            coeffs: r_coeffs,
            basis: p.basis,
            interval: p.interval,
        },
        Polynomial {
            coeffs: q_coeffs,
            basis: p.basis,
            interval: p.interval,
        },
    )
}

/// True when both parts are exactly zero.
pub(crate) fn complex_is_zero(c: &Complex) -> bool {
    c.real().is_zero() && c.imag().is_zero()
}

/// Baby-step count: n = ceil(log2 d / 2) as in the classic schedule.
pub(crate) fn baby_step_log(degree: usize) -> usize {
    let log_d = usize::BITS as usize - degree.leading_zeros() as usize;
    (log_d + 1) / 2
}

/// The split point for a degree: the largest power of two not above it.
pub(crate) fn giant_split(degree: usize) -> usize {
    1 << (usize::BITS as usize - 1 - degree.leading_zeros() as usize)
}

/// Split of an exponent into two smaller generated exponents.
pub(crate) fn power_split(k: usize) -> (usize, usize) {
    debug_assert!(k >= 2);
    ((k + 1) / 2, k / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(prec: u32, v: f64) -> Complex {
        Complex::with_val(prec, (v, 0.0))
    }

    #[test]
    fn chebyshev_split_preserves_the_polynomial() {
        let prec = 128;
        // p = sum_{i<=5} (i+1) T_i, split at m = 4
        let p = Polynomial::chebyshev((0..=5).map(|i| c(prec, (i + 1) as f64)).collect(), (-1.0, 1.0));
        let (r, q) = split_poly(&p, 4, prec);

        // reference: evaluate both sides at a few points
        let cheb = |k: usize, x: f64| (k as f64 * x.acos()).cos();
        for &x in &[-0.9, -0.3, 0.2, 0.7] {
            let direct: f64 = (0..=5).map(|i| (i + 1) as f64 * cheb(i, x)).sum();
            let r_val: f64 = r
                .coeffs
                .iter()
                .enumerate()
                .map(|(i, ci)| ci.real().to_f64() * cheb(i, x))
                .sum();
            let q_val: f64 = q
                .coeffs
                .iter()
                .enumerate()
                .map(|(i, ci)| ci.real().to_f64() * cheb(i, x))
                .sum();
            let split = r_val + cheb(4, x) * q_val;
            assert!((direct - split).abs() < 1e-9, "{direct} vs {split}");
        }
    }

    #[test]
    fn vector_rejects_duplicate_slots() {
        let prec = 128;
        let p = Polynomial::monomial(vec![c(prec, 1.0)]);
        let mut mapping = HashMap::new();
        mapping.insert(0usize, vec![0usize, 1]);
        mapping.insert(1usize, vec![1usize]);
        assert!(matches!(
            PolynomialVector::new(vec![p.clone(), p], mapping),
            Err(Error::DuplicateSlotIndex(1))
        ));
    }

    #[test]
    fn schedule_helpers() {
        assert_eq!(baby_step_log(7), 2); // log2 d = 3
        assert_eq!(baby_step_log(63), 3);
        assert_eq!(giant_split(63), 32);
        assert_eq!(giant_split(32), 32);
        assert_eq!(power_split(7), (4, 3));
        assert_eq!(power_split(8), (4, 4));
    }
}
