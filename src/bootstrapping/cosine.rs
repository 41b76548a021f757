//! Chebyshev approximation of the scaled cosine used by homomorphic
//! modular reduction.
//!
//! The approximated function is G(u) = cos(2 pi (K u - 1/4) / 2^r) on the
//! union of the small intervals around the integers of [-K+1, K-1] (scaled
//! by 1/K onto [-1, 1]). Interpolation nodes are spread over the intervals
//! by a greedy bit-budget heuristic, the interpolant is recovered by Newton
//! divided differences, and the Chebyshev coefficients are solved for at
//! the Chebyshev extrema with a partial-pivoted elimination. Everything
//! runs at the caller's float precision; f64 only steers the node
//! allocation.

use rug::float::Constant;
use rug::ops::Pow;
use rug::Float;

/// Per-interval node counts. Interval 0 holds node pairs around zero so its
/// count stays even; intervals i >= 1 are mirrored onto -i.
fn allocate_nodes(k: usize, degree: usize, eps: f64) -> Vec<usize> {
    let mut deg = vec![1usize; k];
    deg[0] = 2;
    let mut total: usize = deg[0] + 2 * deg[1..].iter().sum::<usize>();

    // expected error bits of interval i under the current allocation: its
    // own nodes contribute log2(eps) each, every other interval contributes
    // its distance, and the denominator grows with the total node count
    let err_bits = |deg: &[usize], i: usize, total: usize| -> f64 {
        let mut bits = deg[i] as f64 * eps.log2() - ((total + 1) as f64).log2();
        for j in 0..k {
            if j != i {
                bits += deg[j] as f64 * ((i as f64 - j as f64).abs() + eps).log2();
            }
            if j != 0 {
                // the mirrored interval at -j
                bits += deg[j] as f64 * ((i + j) as f64 + eps).log2();
            }
        }
        bits
    };

    let mut iterations = 0;
    while total + 2 <= degree + 1 && iterations < 200 {
        let mut best = 0;
        let mut best_bits = f64::NEG_INFINITY;
        for i in 0..k {
            let bits = err_bits(&deg, i, total);
            if bits > best_bits {
                best_bits = bits;
                best = i;
            }
        }
        if best == 0 {
            deg[0] += 2;
        } else {
            deg[best] += 1;
        }
        total += 2;
        iterations += 1;
    }
    deg
}

/// Interpolation nodes in the unscaled variable x, one Chebyshev-like fan
/// per interval, mirrored about zero.
fn place_nodes(deg: &[usize], eps: f64, prec: u32) -> Vec<Float> {
    let pi = Float::with_val(prec, Constant::Pi);
    let mut nodes = Vec::new();
    for j in 0..deg[0] / 2 {
        let angle = Float::with_val(prec, &pi * (j as u64)) / deg[0] as u64;
        let x = Float::with_val(prec, angle.cos() * eps);
        nodes.push(x.clone());
        nodes.push(-x);
    }
    for (i, &d) in deg.iter().enumerate().skip(1) {
        for j in 0..d {
            let angle = Float::with_val(prec, &pi * (j as u64)) / d as u64;
            let x = Float::with_val(prec, angle.cos() * eps) + i as u64;
            nodes.push(x.clone());
            nodes.push(-x);
        }
    }
    nodes
}

/// Newton divided differences, in place over (nodes, values).
fn divided_differences(nodes: &[Float], values: &mut [Float], prec: u32) {
    let n = nodes.len();
    for j in 1..n {
        for l in (j..n).rev() {
            let num = Float::with_val(prec, &values[l] - &values[l - 1]);
            let den = Float::with_val(prec, &nodes[l] - &nodes[l - j]);
            values[l] = num / den;
        }
    }
}

fn newton_eval(nodes: &[Float], coeffs: &[Float], x: &Float, prec: u32) -> Float {
    let n = coeffs.len();
    let mut acc = coeffs[n - 1].clone();
    for j in (0..n - 1).rev() {
        let dx = Float::with_val(prec, x - &nodes[j]);
        acc = Float::with_val(prec, &acc * &dx) + &coeffs[j];
    }
    acc
}

/// Solves T c = p by Gaussian elimination with partial pivoting by absolute
/// value in the current column. Without the pivot the near-zero diagonal
/// entries of the extrema sample matrix lose most of the result's bits.
fn solve_partial_pivot(mut t: Vec<Vec<Float>>, mut p: Vec<Float>, prec: u32) -> Vec<Float> {
    let n = p.len();
    for col in 0..n {
        let mut pivot = col;
        for row in col + 1..n {
            if t[row][col].clone().abs() > t[pivot][col].clone().abs() {
                pivot = row;
            }
        }
        t.swap(col, pivot);
        p.swap(col, pivot);
        for row in col + 1..n {
            let factor = Float::with_val(prec, &t[row][col] / &t[col][col]);
            for j in col..n {
                let delta = Float::with_val(prec, &factor * &t[col][j]);
                t[row][j] -= delta;
            }
            let delta = Float::with_val(prec, &factor * &p[col]);
            p[row] -= delta;
        }
    }
    // back substitution
    let mut c = vec![Float::new(prec); n];
    for row in (0..n).rev() {
        let mut acc = p[row].clone();
        for j in row + 1..n {
            acc -= Float::with_val(prec, &t[row][j] * &c[j]);
        }
        c[row] = acc / &t[row][row];
    }
    c
}

/// The scaling constant (1/2pi)^(1/2^r) the coefficients are multiplied by;
/// squared once per double-angle unwind it ends at 1/2pi.
pub fn sqrt_2pi(double_angle: usize, prec: u32) -> Float {
    let two_pi = Float::with_val(prec, Constant::Pi) * 2u32;
    let base = Float::with_val(prec, 1u32) / two_pi;
    let exponent = Float::with_val(prec, 1f64 / (1u64 << double_angle) as f64);
    base.pow(exponent)
}

/// Chebyshev-basis coefficients (on [-1, 1]) approximating
/// (1/2pi)^(1/2^r) * cos(2 pi (K u - 1/4) / 2^r) around the scaled
/// integers. The resulting degree is at most `degree`.
pub fn approximate_cos(
    k: usize,
    degree: usize,
    eps: f64,
    double_angle: usize,
    prec: u32,
) -> Vec<Float> {
    assert!(k >= 1);
    assert!(eps > 0.0 && eps < 1.0);
    let deg = allocate_nodes(k, degree, eps);
    let nodes_x = place_nodes(&deg, eps, prec);
    let total = nodes_x.len();

    let pi = Float::with_val(prec, Constant::Pi);
    let scfac = (1u64 << double_angle) as f64;

    // samples of the target at the unscaled nodes
    let mut values: Vec<Float> = nodes_x
        .iter()
        .map(|x| {
            let arg = Float::with_val(prec, x - 0.25f64) * 2u32 * &pi / scfac;
            arg.cos()
        })
        .collect();

    // interpolate in the scaled variable u = x / K
    let nodes_u: Vec<Float> = nodes_x
        .iter()
        .map(|x| Float::with_val(prec, x / k as u64))
        .collect();
    divided_differences(&nodes_u, &mut values, prec);

    // sample the interpolant at the Chebyshev extrema and change basis
    let extrema: Vec<Float> = (0..total)
        .map(|i| {
            let angle = Float::with_val(prec, &pi * (i as u64)) / total as u64;
            angle.cos()
        })
        .collect();
    let samples: Vec<Float> = extrema
        .iter()
        .map(|u| newton_eval(&nodes_u, &values, u, prec))
        .collect();

    let mut t = vec![vec![Float::new(prec); total]; total];
    for (i, u) in extrema.iter().enumerate() {
        t[i][0] = Float::with_val(prec, 1u32);
        if total > 1 {
            t[i][1] = u.clone();
        }
        for j in 2..total {
            let two_u = Float::with_val(prec, 2u32 * u);
            t[i][j] = Float::with_val(prec, &two_u * &t[i][j - 1]) - &t[i][j - 2];
        }
    }

    let mut coeffs = solve_partial_pivot(t, samples, prec);
    let factor = sqrt_2pi(double_angle, prec);
    for c in coeffs.iter_mut() {
        *c *= &factor;
    }
    coeffs
}

#[cfg(test)]
mod tests {
    use crate::ckks::chebyshev;

    use super::*;

    #[test]
    fn node_allocation_respects_the_budget() {
        let deg = allocate_nodes(12, 30, 2f64.powi(-8));
        assert_eq!(deg[0] % 2, 0);
        let total: usize = deg[0] + 2 * deg[1..].iter().sum::<usize>();
        assert!(total <= 31);
        assert!(total >= 24);
    }

    #[test]
    fn approximation_is_tight_on_every_interval() {
        let prec = 256;
        let (k, degree, double_angle) = (12usize, 30usize, 3usize);
        let eps = 2f64.powi(-8);
        let coeffs = approximate_cos(k, degree, eps, double_angle, prec);
        assert!(coeffs.len() <= degree + 1);

        let factor = sqrt_2pi(double_angle, prec);
        let pi = Float::with_val(prec, Constant::Pi);
        let scfac = (1u64 << double_angle) as f64;
        let mut sup = 0f64;
        for i in 0..k as i64 {
            for sign in [-1i64, 1] {
                for s in 0..20 {
                    let x = Float::with_val(
                        prec,
                        (sign * i) as f64 + eps * (s as f64 / 9.5 - 1.0),
                    );
                    let u = Float::with_val(prec, &x / k as u64);
                    let got = chebyshev::evaluate(&coeffs, &u, -1.0, 1.0, prec);
                    let arg = Float::with_val(prec, &x - 0.25f64) * 2u32 * &pi / scfac;
                    let want = Float::with_val(prec, arg.cos() * &factor);
                    let err = Float::with_val(prec, &got - &want).abs().to_f64();
                    sup = sup.max(err);
                }
            }
        }
        assert!(sup < 2f64.powi(-20), "sup norm {sup}");
    }
}
