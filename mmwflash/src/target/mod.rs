//! Device targets.

pub mod mmwave;
pub mod part;

pub use part::{PartFamily, PartNumber, RevisionEra, SUPPORTED_PARTS};
