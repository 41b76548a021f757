//! Bootstrapping: refreshes ciphertexts whose modulus budget is exhausted.
//!
//! The circuit is ScaleDown, ModUp, CoeffsToSlots, EvalMod, SlotsToCoeffs,
//! optionally followed by Meta-BTS refinement iterations. Construction
//! derives every precomputation (DFT factor matrices, the modular-reduction
//! polynomial and its scale schedule, the level layout) from a serializable
//! literal; the five stages then run against read-only shared state.

pub mod bootstrapper;
pub mod cosine;
pub mod dft;
pub mod mod1;
pub mod packing;
pub mod parameters;

pub use bootstrapper::Bootstrapper;
pub use dft::{DftKind, DftMatrixLiteral};
pub use mod1::{Mod1ParametersLiteral, Mod1Type};
pub use packing::unpack_galois_elements;
pub use parameters::{
    galois_elements, generate_bootstrapping_keys, BootstrappingKeys,
    BootstrappingParametersLiteral, IterationsParameters,
};
