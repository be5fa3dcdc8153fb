//! Core primitives.
//!
//! Seeded randomness shared by deck generation and tests.

pub mod rng;

// Re-export core types
pub use rng::{DeterministicRng, derive_deck_seed};
