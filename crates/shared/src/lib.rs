//! Convoy shared library — typed IDs, error type, and protocol constants
//! shared between the client crates.

pub mod constants;
pub mod error;
pub mod ids;
