//! TrustMesh Runtime
//!
//! Composes collectors, scoring and the ledger into the trust pipeline:
//! - **Orchestrator**: breaker-gated concurrent collection
//! - **Cache**: tiered result cache and computation lock
//! - **Registry**: optional first-party entity data
//! - **Persistence**: background score history writer
//! - **Pipeline**: compute, batch, compare, verify, refresh, status

pub mod config;
pub mod cache;
pub mod orchestrator;
pub mod registry;
pub mod persistence;
pub mod pipeline;
pub mod bootstrap;

pub use config::*;
pub use cache::*;
pub use orchestrator::*;
pub use registry::*;
pub use persistence::*;
pub use pipeline::*;
pub use bootstrap::*;
