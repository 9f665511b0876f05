//! Per-song analysis passes, run in declaration order

pub mod timing;
pub mod features;
pub mod roles;
pub mod keys;
pub mod chords;
pub mod chunker;
pub mod fingerprint;
