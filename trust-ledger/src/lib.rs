//! TrustMesh Ledger - Hash-chained observation records
//!
//! Every sensor observation about an entity becomes an immutable block
//! linked to its predecessor by SHA-256. Recent chain state lives in a hot
//! store; every block is also appended to a date-partitioned JSON Lines
//! lake when one is configured.

pub mod canonical;
pub mod delta;
pub mod block;
pub mod store;
pub mod ledger;

pub use canonical::*;
pub use delta::*;
pub use block::*;
pub use store::*;
pub use ledger::*;

/// Version stamped on blocks produced by this build's sensors
pub const SENSOR_VERSION: &str = "3.0.0";

/// Sensor id of the block recording a computed score
pub const SCORE_SENSOR: &str = "score_computed";

/// Recent blocks retained per entity in the hot store
pub const DEFAULT_MAX_RECENT: usize = 1000;
