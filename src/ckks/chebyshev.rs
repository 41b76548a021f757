//! Chebyshev interpolation of scalar functions on an interval.
//!
//! Used to derive evaluation targets for the polynomial evaluator (and by
//! the smooth variant of the modular-reduction approximation). All
//! arithmetic is at the caller's float precision.

use rug::float::Constant;
use rug::Float;

/// Interpolates `f` at the Chebyshev nodes of [a, b] and returns the
/// coefficients of the degree-`degree` interpolant in the Chebyshev basis
/// of that interval.
pub fn approximate<F>(f: F, degree: usize, a: f64, b: f64, prec: u32) -> Vec<Float>
where
    F: Fn(&Float) -> Float,
{
    let count = degree + 1;
    let pi = Float::with_val(prec, Constant::Pi);
    let half_sum = Float::with_val(prec, (a + b) / 2.0);
    let half_diff = Float::with_val(prec, (b - a) / 2.0);

    // nodes u_j = cos(pi (j + 1/2) / count) and samples f((a+b)/2 + (b-a)/2 u_j)
    let mut nodes = Vec::with_capacity(count);
    let mut samples = Vec::with_capacity(count);
    for j in 0..count {
        let angle = Float::with_val(prec, &pi * (2 * j + 1) as u64) / (2 * count) as u64;
        let u = angle.cos();
        let t = Float::with_val(prec, &half_sum + Float::with_val(prec, &half_diff * &u));
        samples.push(f(&t));
        nodes.push(u);
    }

    (0..count)
        .map(|k| {
            let mut acc = Float::new(prec);
            for j in 0..count {
                let angle =
                    Float::with_val(prec, &pi * ((2 * j + 1) * k) as u64) / (2 * count) as u64;
                acc += Float::with_val(prec, &samples[j] * angle.cos());
            }
            acc *= 2u32;
            acc /= count as u32;
            if k == 0 {
                acc /= 2u32;
            }
            acc
        })
        .collect()
}

/// Evaluates a Chebyshev-basis polynomial on [a, b] at `x` by Clenshaw
/// recurrence.
pub fn evaluate(coeffs: &[Float], x: &Float, a: f64, b: f64, prec: u32) -> Float {
    // map to [-1, 1]
    let u = Float::with_val(prec, 2u32 * x.clone() - Float::with_val(prec, a + b))
        / Float::with_val(prec, b - a);
    let two_u = Float::with_val(prec, 2u32 * &u);
    let mut b1 = Float::new(prec);
    let mut b2 = Float::new(prec);
    for c in coeffs.iter().rev() {
        let next = Float::with_val(prec, &two_u * &b1) - &b2 + c;
        b2 = b1;
        b1 = next;
    }
    Float::with_val(prec, &b1 - Float::with_val(prec, &u * &b2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_sine_to_high_accuracy() {
        let prec = 256;
        let coeffs = approximate(|x| x.clone().sin(), 31, -4.0, 4.0, prec);
        for i in 0..100 {
            let x = Float::with_val(prec, -4.0 + 8.0 * i as f64 / 99.0);
            let got = evaluate(&coeffs, &x, -4.0, 4.0, prec);
            let want = x.clone().sin();
            let err = Float::with_val(prec, &got - &want).abs().to_f64();
            assert!(err < 1e-12, "err {err} at {}", x.to_f64());
        }
    }
}
