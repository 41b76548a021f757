//! Canonical-embedding encoder.
//!
//! Slot vectors are mapped to ring elements by evaluating at the odd powers
//! of a primitive 2M-th root of unity indexed by the rotation group of 5,
//! where M = 2 * slots. Sparsely packed plaintexts (slots < N/2) live in the
//! sub-ring Y = X^(N/M); the embedding is computed at the parameter set's
//! float precision throughout.

use rug::float::Constant;
use rug::{Complex, Float, Integer};

use super::ciphertext::{Plaintext, Scale};
use super::parameters::CkksParameters;

pub struct Encoder {
    params: CkksParameters,
}

impl Encoder {
    pub fn new(params: &CkksParameters) -> Self {
        Self {
            params: params.clone(),
        }
    }

    fn prec(&self) -> u32 {
        self.params.float_precision()
    }

    /// The rotation group 5^t mod 2M, t in 0..slots.
    fn rot_group(&self, slots: usize) -> Vec<usize> {
        let two_m = 4 * slots;
        let mut group = Vec::with_capacity(slots);
        let mut g = 1usize;
        for _ in 0..slots {
            group.push(g);
            g = g * 5 % two_m;
        }
        group
    }

    /// Roots xi^j = exp(i * pi * j / M), j in 0..2M.
    fn roots(&self, slots: usize) -> Vec<Complex> {
        let prec = self.prec();
        let two_m = 4 * slots;
        let pi = Float::with_val(prec, Constant::Pi);
        (0..two_m)
            .map(|j| {
                let angle = Float::with_val(prec, &pi * (j as u64)) / (2 * slots) as u64;
                let (sin, cos) = angle.sin_cos(Float::new(prec));
                Complex::with_val(prec, (cos, sin))
            })
            .collect()
    }

    /// Encodes a slot vector (padded with zeros up to 2^log_slots) into a
    /// plaintext at the given level and scale, NTT form.
    pub fn encode(
        &self,
        values: &[Complex],
        level: usize,
        scale: &Scale,
        log_slots: usize,
    ) -> Plaintext {
        let prec = self.prec();
        let slots = 1usize << log_slots;
        debug_assert!(values.len() <= slots);
        debug_assert!(slots * 2 <= self.params.n());
        let m = 2 * slots;
        let two_m = 2 * m;
        let gap = self.params.n() / m;
        let group = self.rot_group(slots);
        let roots = self.roots(slots);

        // m_j = (1/slots) * Re( sum_t z_t * xi^(-j*g_t) )
        let mut big_coeffs = vec![Integer::new(); self.params.n()];
        for j in 0..m {
            let mut acc = Complex::with_val(prec, (0, 0));
            for (t, z) in values.iter().enumerate() {
                let idx = (two_m - j * group[t] % two_m) % two_m;
                acc += Complex::with_val(prec, z * &roots[idx]);
            }
            let mut real = Float::with_val(prec, acc.real() / (slots as u64));
            real *= scale.value();
            big_coeffs[j * gap] = real.round().to_integer().unwrap();
        }

        let ring = self.params.ring();
        let mut poly = ring.from_bigint(&big_coeffs, level);
        ring.ntt_assign(&mut poly);
        Plaintext::new(poly, scale.clone(), log_slots)
    }

    /// Encodes the same complex constant into every slot. Exact: a constant
    /// occupies only the degree-0 and degree-N/2 coefficients.
    pub fn encode_constant(
        &self,
        value: &Complex,
        level: usize,
        scale: &Scale,
        log_slots: usize,
    ) -> Plaintext {
        let prec = self.prec();
        let n = self.params.n();
        let mut big_coeffs = vec![Integer::new(); n];
        let re = Float::with_val(prec, value.real() * scale.value());
        let im = Float::with_val(prec, value.imag() * scale.value());
        big_coeffs[0] = re.round().to_integer().unwrap();
        big_coeffs[n / 2] = im.round().to_integer().unwrap();

        let ring = self.params.ring();
        let mut poly = ring.from_bigint(&big_coeffs, level);
        ring.ntt_assign(&mut poly);
        Plaintext::new(poly, scale.clone(), log_slots)
    }

    /// Decodes a plaintext back into its 2^log_slots slot values.
    pub fn decode(&self, plaintext: &Plaintext) -> Vec<Complex> {
        let prec = self.prec();
        let slots = 1usize << plaintext.log_slots;
        let m = 2 * slots;
        let two_m = 2 * m;
        let gap = self.params.n() / m;
        let group = self.rot_group(slots);
        let roots = self.roots(slots);
        let ring = self.params.ring();

        let mut poly = plaintext.poly.clone();
        if poly.is_ntt() {
            ring.intt_assign(&mut poly);
        }
        let big = ring.to_bigint(&poly);
        let coeffs: Vec<Float> = (0..m)
            .map(|j| {
                let mut f = Float::with_val(prec, &big[j * gap]);
                f /= plaintext.scale.value();
                f
            })
            .collect();

        (0..slots)
            .map(|t| {
                let mut acc = Complex::with_val(prec, (0, 0));
                for (j, c) in coeffs.iter().enumerate() {
                    let idx = j * group[t] % two_m;
                    acc += Complex::with_val(prec, c * &roots[idx]);
                }
                acc
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::parameters::{CkksParametersLiteral, RingType};
    use super::*;

    fn test_params() -> CkksParameters {
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

    fn random_values(prec: u32, count: usize, seed: u64) -> Vec<Complex> {
        use rand::{Rng, SeedableRng};
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                Complex::with_val(
                    prec,
                    (rng.gen_range(-1.0f64..1.0), rng.gen_range(-1.0f64..1.0)),
                )
            })
            .collect()
    }

    #[test]
    fn encode_decode_roundtrip_full_packing() {
        let params = test_params();
        let encoder = Encoder::new(&params);
        let log_slots = params.max_log_slots();
        let values = random_values(params.float_precision(), 1 << log_slots, 1);
        let pt = encoder.encode(&values, params.max_level(), &params.default_scale(), log_slots);
        let decoded = encoder.decode(&pt);
        for (v, d) in values.iter().zip(decoded.iter()) {
            let err = Complex::with_val(params.float_precision(), v - d).abs().real().to_f64();
            assert!(err < 2f64.powi(-25), "slot error {err}");
        }
    }

    #[test]
    fn encode_decode_roundtrip_sparse_packing() {
        let params = test_params();
        let encoder = Encoder::new(&params);
        let log_slots = 3;
        let values = random_values(params.float_precision(), 1 << log_slots, 2);
        let pt = encoder.encode(&values, 1, &params.default_scale(), log_slots);
        let decoded = encoder.decode(&pt);
        for (v, d) in values.iter().zip(decoded.iter()) {
            let err = Complex::with_val(params.float_precision(), v - d).abs().real().to_f64();
            assert!(err < 2f64.powi(-25), "slot error {err}");
        }
    }

    #[test]
    fn constants_occupy_two_coefficients() {
        let params = test_params();
        let encoder = Encoder::new(&params);
        let value = Complex::with_val(params.float_precision(), (0.5, -0.25));
        let pt = encoder.encode_constant(&value, params.max_level(), &params.default_scale(), 4);
        let decoded = encoder.decode(&pt);
        for d in decoded {
            let err = Complex::with_val(params.float_precision(), &value - &d).abs().real().to_f64();
            assert!(err < 2f64.powi(-25));
        }
    }
}
