//! Shared helpers and protocol constants.

pub mod constants;

pub use constants::*;
