//! Testing utilities
//!
//! An in-memory broker that lets the session core be exercised without a
//! running message broker.

pub mod mocks;

pub use mocks::*;
