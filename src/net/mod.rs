//! Network Module
//!
//! Connection-level plumbing shared by the vendor adapters.

pub mod balancer;

pub use balancer::*;
