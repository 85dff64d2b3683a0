//! TrustMesh Core - Target identity, signal schema and scoring engine
//!
//! This crate provides the pure, I/O-free parts of the pipeline:
//! - Target classification and canonical domain resolution
//! - The typed raw signal schema, one slot per evidence source
//! - The evidence-accumulation scoring engine with category and hard caps
//! - Result, grade and recommendation types

pub mod target;
pub mod signals;
pub mod scoring;
pub mod result;

pub use target::*;
pub use signals::*;
pub use scoring::*;
pub use result::*;

/// Version tag stamped on every score result
pub const ENGINE_VERSION: &str = "3.0.0";

/// Minimum score at which an entity is shown as verified
pub const VERIFIED_THRESHOLD: u32 = 650;
