//! Integration test crate for Splice.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! It depends on the other splice crates to verify they work together
//! through their public APIs only.

#[cfg(test)]
mod fixtures;

#[cfg(test)]
mod seek;

#[cfg(test)]
mod export;
