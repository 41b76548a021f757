//! Ciphertexts, plaintexts and the arbitrary-precision scale they carry.

use rug::ops::Pow;
use rug::Float;

use crate::core_crypto::poly::RnsPoly;

/// The scaling factor tying a plaintext's numerical value to its encoded
/// ring element. Kept at the parameter set's float precision; every
/// multiplication multiplies scales and every rescale divides by the
/// dropped prime.
#[derive(Clone, Debug)]
pub struct Scale {
    value: Float,
}

impl Scale {
    pub fn new(value: Float) -> Self {
        debug_assert!(value > 0u32);
        Self { value }
    }

    pub fn from_f64(value: f64, precision: u32) -> Self {
        Self::new(Float::with_val(precision, value))
    }

    pub fn from_log2(log2: f64, precision: u32) -> Self {
        Self::new(Float::with_val(precision, 2f64).pow(Float::with_val(precision, log2)))
    }

    #[inline]
    pub fn value(&self) -> &Float {
        &self.value
    }

    #[inline]
    pub fn precision(&self) -> u32 {
        self.value.prec()
    }

    pub fn to_f64(&self) -> f64 {
        self.value.to_f64()
    }

    pub fn log2(&self) -> f64 {
        self.value.to_f64().log2()
    }

    pub fn mul(&self, other: &Scale) -> Scale {
        Scale::new(Float::with_val(self.precision(), &self.value * &other.value))
    }

    pub fn mul_f64(&self, factor: f64) -> Scale {
        Scale::new(Float::with_val(self.precision(), &self.value * factor))
    }

    pub fn mul_u64(&self, factor: u64) -> Scale {
        Scale::new(Float::with_val(self.precision(), &self.value * factor))
    }

    pub fn div(&self, other: &Scale) -> Scale {
        Scale::new(Float::with_val(self.precision(), &self.value / &other.value))
    }

    pub fn div_u64(&self, divisor: u64) -> Scale {
        Scale::new(Float::with_val(self.precision(), &self.value / divisor))
    }

    /// Scales are considered equal up to a relative difference of 2^-30;
    /// exact equality is too strict once rescaling quantization enters.
    pub fn approx_eq(&self, other: &Scale) -> bool {
        let prec = self.precision();
        let ratio = Float::with_val(prec, &self.value / &other.value);
        let diff = Float::with_val(prec, &ratio - 1u32);
        diff.abs() < Float::with_val(prec, 2f64.powi(-30))
    }
}

/// A ciphertext: a short list of ring polynomials (two after
/// relinearization, three transiently after multiplication) plus the
/// metadata every operation keeps consistent.
#[derive(Clone)]
pub struct Ciphertext {
    pub(crate) parts: Vec<RnsPoly>,
    pub(crate) scale: Scale,
    pub(crate) log_slots: usize,
}

impl std::fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ciphertext")
            .field("degree", &self.degree())
            .field("level", &self.level())
            .field("log_slots", &self.log_slots)
            .field("log_scale", &self.scale.log2())
            .finish()
    }
}

impl Ciphertext {
    pub fn new(parts: Vec<RnsPoly>, scale: Scale, log_slots: usize) -> Self {
        debug_assert!(!parts.is_empty());
        Self {
            parts,
            scale,
            log_slots,
        }
    }

    #[inline]
    pub fn degree(&self) -> usize {
        self.parts.len() - 1
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.parts[0].level()
    }

    #[inline]
    pub fn scale(&self) -> &Scale {
        &self.scale
    }

    pub fn set_scale(&mut self, scale: Scale) {
        self.scale = scale;
    }

    #[inline]
    pub fn log_slots(&self) -> usize {
        self.log_slots
    }

    #[inline]
    pub fn slots(&self) -> usize {
        1 << self.log_slots
    }

    #[inline]
    pub fn is_ntt(&self) -> bool {
        self.parts[0].is_ntt()
    }

    /// Drops `count` levels without rescaling (the primes are simply
    /// discarded).
    pub fn drop_levels(&mut self, count: usize) {
        let target = self.level() - count;
        for part in &mut self.parts {
            part.drop_to_level(target);
        }
    }
}

/// A plaintext: one ring polynomial with ciphertext metadata.
#[derive(Clone)]
pub struct Plaintext {
    pub(crate) poly: RnsPoly,
    pub(crate) scale: Scale,
    pub(crate) log_slots: usize,
}

impl Plaintext {
    pub fn new(poly: RnsPoly, scale: Scale, log_slots: usize) -> Self {
        Self {
            poly,
            scale,
            log_slots,
        }
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.poly.level()
    }

    #[inline]
    pub fn scale(&self) -> &Scale {
        &self.scale
    }

    #[inline]
    pub fn log_slots(&self) -> usize {
        self.log_slots
    }
}
