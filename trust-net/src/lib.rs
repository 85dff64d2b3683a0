//! TrustMesh networking layer
//!
//! Builds the HTTP clients and DNS resolvers shared by all collectors.

pub mod client;
pub mod dns;

pub use client::*;
pub use dns::*;
