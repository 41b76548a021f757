//! Low-level polynomial arithmetic over residue-number-system modulus chains.
//!
//! This layer provides the ring collaborator the scheme-level code builds on:
//! word-sized NTT-friendly primes, the negacyclic NTT, RNS polynomials and
//! their coefficient-wise operations, automorphisms, the centered lift used
//! by modulus raising, rescaling, and the gadget-decomposed key-switching
//! primitive.

pub mod modulus;
pub mod ntt;
pub mod poly;
pub mod ring;
pub mod rlwe;

pub use modulus::Modulus;
pub use ntt::NttTable;
pub use poly::RnsPoly;
pub use ring::RnsRing;
