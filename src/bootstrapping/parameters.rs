//! Bootstrapping parameter literals and evaluation-key bundle.
//!
//! The bootstrapping parameter set is independent of (and larger than) the
//! residual set the user computes under between refreshes. Level layout is
//! derived, never declared: ModUp spends one level to reach the evaluation
//! scale, CoeffsToSlots and SlotsToCoeffs one per factor matrix, and
//! EvalMod whatever its shadow schedule reports.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ckks::parameters::{CkksParameters, CkksParametersLiteral, RingType};
use crate::ckks::{ClientKey, EvaluationKeys};
use crate::core_crypto::rlwe::{KeySwitchKey, RlweSecretKey};
use crate::error::{Error, Result};

use std::sync::Arc;

use super::dft::{DftKind, DftMatrix, DftMatrixLiteral};
use super::mod1::Mod1ParametersLiteral;
use super::packing::unpack_galois_elements;

/// Meta-BTS configuration: one entry per refinement iteration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationsParameters {
    /// Additional bits of precision targeted by each iteration.
    pub log_precisions: Vec<usize>,
    /// Bit size of the prime reserved for the final iteration's exact
    /// division; without it the last iteration stops once its correction
    /// factor rounds below one.
    #[serde(default)]
    pub reserved_prime_bit_size: Option<usize>,
}

/// Serializable description of a full bootstrapping configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BootstrappingParametersLiteral {
    /// The bootstrapping-ring CKKS parameters (Q_N2 / P_N2).
    pub ckks: CkksParametersLiteral,
    pub log_slots: usize,
    pub coeffs_to_slots: DftMatrixLiteral,
    pub slots_to_coeffs: DftMatrixLiteral,
    pub mod1: Mod1ParametersLiteral,
    /// Hamming weight of the ephemeral sparse secret used to reduce ModUp
    /// noise; None disables the encapsulation.
    #[serde(default)]
    pub ephemeral_secret_weight: Option<usize>,
    #[serde(default)]
    pub iterations: Option<IterationsParameters>,
}

impl BootstrappingParametersLiteral {
    pub fn validate(&self) -> Result<()> {
        if self.coeffs_to_slots.kind != DftKind::CoeffsToSlots {
            return Err(Error::InvalidParameters(
                "coeffs_to_slots literal carries the wrong kind".into(),
            ));
        }
        if self.slots_to_coeffs.kind != DftKind::SlotsToCoeffs {
            return Err(Error::InvalidParameters(
                "slots_to_coeffs literal carries the wrong kind".into(),
            ));
        }
        if self.log_slots + 1 > self.ckks.log_n {
            return Err(Error::InvalidParameters(format!(
                "log_slots {} exceeds the ring capacity",
                self.log_slots
            )));
        }
        Ok(())
    }

    /// Residual parameters sharing the bottom of the bootstrapping chain,
    /// for a (possibly smaller) residual ring degree.
    pub fn residual_parameters(
        &self,
        bt_params: &CkksParameters,
        log_n: usize,
        max_level: usize,
        ring_type: RingType,
    ) -> Result<CkksParameters> {
        CkksParameters::from_primes(
            log_n,
            bt_params.q_primes()[..=max_level].to_vec(),
            bt_params.p_primes().to_vec(),
            self.ckks.log_default_scale,
            ring_type,
            bt_params.float_precision(),
        )
    }
}

/// Dense/sparse encapsulation keys for the reduced-noise ModUp variant.
pub struct EncapsulationKeys {
    pub(crate) to_sparse: KeySwitchKey,
    pub(crate) to_dense: KeySwitchKey,
}

/// N1 <-> N2 switching keys, both living in the bootstrapping ring.
pub struct RingSwitchKeys {
    pub(crate) to_bootstrapping: KeySwitchKey,
    pub(crate) to_residual: KeySwitchKey,
}

/// Everything a bootstrapper needs besides the parameters.
pub struct BootstrappingKeys {
    pub(crate) evaluation_keys: Arc<EvaluationKeys>,
    pub(crate) encapsulation: Option<EncapsulationKeys>,
    pub(crate) ring_switch: Option<RingSwitchKeys>,
}

/// The Galois elements a bootstrapper built from `literal` will consult:
/// both DFT sides, the sparse-packing trace, conjugation, and (when the
/// residual ring is smaller) the unpack projections. Derivable from the
/// literal alone.
pub fn galois_elements(
    params: &CkksParameters,
    literal: &BootstrappingParametersLiteral,
    residual_log_n: usize,
) -> Vec<u64> {
    let prec = params.float_precision();
    let mut rotations: Vec<i64> = DftMatrix::rotations(
        &literal.coeffs_to_slots,
        literal.log_slots,
        prec,
    );
    rotations.extend(DftMatrix::rotations(
        &literal.slots_to_coeffs,
        literal.log_slots,
        prec,
    ));
    // trace folding of the sparse packing
    for i in literal.log_slots..params.log_n() - 1 {
        rotations.push(1i64 << i);
    }
    let mut elements: Vec<u64> = rotations
        .into_iter()
        .map(|k| params.galois_element(k))
        .filter(|&g| g != 1)
        .collect();
    elements.push(params.galois_element_conjugation());
    if residual_log_n < params.log_n() {
        let log_gap = params.log_n() - residual_log_n;
        elements.extend(unpack_galois_elements(params, log_gap));
    }
    elements.sort_unstable();
    elements.dedup();
    elements
}

/// Generates the complete key bundle for `literal` under `client_key` (a
/// bootstrapping-ring key). `residual_key` is required exactly when the
/// residual ring degree differs.
pub fn generate_bootstrapping_keys<R: Rng>(
    params: &CkksParameters,
    literal: &BootstrappingParametersLiteral,
    client_key: &ClientKey,
    residual_key: Option<&ClientKey>,
    rng: &mut R,
) -> Result<BootstrappingKeys> {
    literal.validate()?;
    let ring = params.ring();
    let residual_log_n = residual_key
        .map(|ck| ck.params().log_n())
        .unwrap_or(params.log_n());

    let elements = galois_elements(params, literal, residual_log_n);
    let evaluation_keys = Arc::new(EvaluationKeys::generate_for_elements(
        params, client_key, &elements, rng,
    ));

    let encapsulation = literal.ephemeral_secret_weight.map(|weight| {
        let sparse = RlweSecretKey::generate(ring, Some(weight), rng);
        let to_sparse = KeySwitchKey::generate(ring, &client_key.secret().poly, &sparse, rng);
        let to_dense = KeySwitchKey::generate(ring, &sparse.poly, client_key.secret(), rng);
        EncapsulationKeys {
            to_sparse,
            to_dense,
        }
    });

    let ring_switch = match residual_key {
        Some(res) if res.params().log_n() < params.log_n() => {
            let gap = params.n() / res.params().n();
            let mut embedded = vec![0i64; params.n()];
            for (j, &c) in res.secret().coeffs.iter().enumerate() {
                embedded[j * gap] = c;
            }
            let embedded = RlweSecretKey::from_coeffs(ring, embedded);
            let to_bootstrapping =
                KeySwitchKey::generate(ring, &embedded.poly, client_key.secret(), rng);
            let to_residual =
                KeySwitchKey::generate(ring, &client_key.secret().poly, &embedded, rng);
            Some(RingSwitchKeys {
                to_bootstrapping,
                to_residual,
            })
        }
        _ => None,
    };

    Ok(BootstrappingKeys {
        evaluation_keys,
        encapsulation,
        ring_switch,
    })
}

#[cfg(test)]
mod tests {
    use super::super::dft::DftKind;
    use super::super::mod1::Mod1Type;
    use super::*;

    fn literal() -> BootstrappingParametersLiteral {
        BootstrappingParametersLiteral {
            ckks: CkksParametersLiteral {
                log_n: 10,
                log_q: vec![55, 45, 45, 45, 45, 45, 45, 45, 45, 45, 45],
                log_p: vec![56, 56],
                log_default_scale: 45,
                ring_type: RingType::Standard,
                float_precision: None,
            },
            log_slots: 4,
            coeffs_to_slots: DftMatrixLiteral {
                kind: DftKind::CoeffsToSlots,
                levels: vec![2, 2],
                bsgs_log_ratio: Some(1),
            },
            slots_to_coeffs: DftMatrixLiteral {
                kind: DftKind::SlotsToCoeffs,
                levels: vec![2, 2],
                bsgs_log_ratio: Some(1),
            },
            mod1: Mod1ParametersLiteral {
                mod1_type: Mod1Type::CosDiscrete,
                log_scale: 45,
                k: 12,
                mod1_degree: 30,
                double_angle: 3,
                log_message_ratio: 8,
                mod1_inv_degree: None,
            },
            ephemeral_secret_weight: None,
            iterations: Some(IterationsParameters {
                log_precisions: vec![10],
                reserved_prime_bit_size: Some(30),
            }),
        }
    }

    #[test]
    fn literal_roundtrips_through_serde() {
        let lit = literal();
        let json = serde_json::to_string(&lit).unwrap();
        let back: BootstrappingParametersLiteral = serde_json::from_str(&json).unwrap();
        assert_eq!(lit, back);
        let bytes = bincode::serialize(&lit).unwrap();
        let back: BootstrappingParametersLiteral = bincode::deserialize(&bytes).unwrap();
        assert_eq!(lit, back);
        assert_eq!(bytes, bincode::serialize(&back).unwrap());
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let mut lit = literal();
        lit.coeffs_to_slots.kind = DftKind::SlotsToCoeffs;
        assert!(matches!(
            lit.validate(),
            Err(Error::InvalidParameters(_))
        ));
    }

    #[test]
    fn galois_elements_cover_trace_and_conjugation() {
        let lit = literal();
        let params = CkksParameters::from_literal(&lit.ckks).unwrap();
        let elements = galois_elements(&params, &lit, params.log_n());
        assert!(elements.contains(&params.galois_element_conjugation()));
        for i in lit.log_slots..params.log_n() - 1 {
            assert!(elements.contains(&params.galois_element(1i64 << i)));
        }
        // derivable twice, identically
        assert_eq!(elements, galois_elements(&params, &lit, params.log_n()));
    }
}
