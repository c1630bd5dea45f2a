//! Testing utilities and mock implementations
//!
//! Public so integration tests under `tests/` can drive every phase without
//! an Automation Server, SMTP relay or desktop session.

pub mod mocks;

pub use mocks::*;
