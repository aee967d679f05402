//! Domain layer - Core types and port definitions
//!
//! This module defines the vendor client trait (port) that adapters implement
//! and the request context threaded through every vendor call.

pub mod context;
pub mod ports;

pub use context::*;
pub use ports::*;
