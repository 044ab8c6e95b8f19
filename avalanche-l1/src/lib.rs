//! Converts an Avalanche subnet into a sovereign L1 and initializes its
//! Validator Manager contract.
pub mod aggregator;
pub mod bootstrap;
pub mod errors;
pub mod health;
pub mod orchestrator;
pub mod pchain;
pub mod rpc;
pub mod sidecar;
pub mod validator_manager;
pub mod warp;

#[cfg(test)]
pub(crate) mod testutil;

pub use errors::{Error, Result};
