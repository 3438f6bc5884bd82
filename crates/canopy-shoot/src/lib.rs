//! Shoot control logic for Canopy
//!
//! - [`maintenance`]: window scheduling and the automated update pass
//! - [`encryption`]: etcd encryption configuration lifecycle and secret rewrite
//! - [`osc`]: per-worker operating system config generation and node bootstrap
//!
//! Store access goes through the traits in [`client`].

#![deny(missing_docs)]

pub mod client;
pub mod encryption;
pub mod maintenance;
pub mod osc;

#[cfg(test)]
pub(crate) mod testing;
