//! API Module
//!
//! REST transport for the federation service.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
