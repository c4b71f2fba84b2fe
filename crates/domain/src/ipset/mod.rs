//! Set lifecycle core: taxonomy, entities, and the reference-counting
//! engine that decides what the kernel dataplane must contain.

pub mod engine;
pub mod entity;
pub mod error;
pub mod taxonomy;
pub mod translated;
