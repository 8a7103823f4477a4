//! Utilities for tests and examples.
pub mod mock;
